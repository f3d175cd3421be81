use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub unit_price_tzs: i64,
}

/// Static product catalog. Content is configuration data, not code: an
/// optional JSON file overrides the built-in list.
#[derive(Debug, Clone)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// Loads the catalog file when configured, falling back to the built-in
    /// list on any failure.
    pub fn load(path: Option<&str>) -> Self {
        if let Some(path) = path {
            match Self::from_file(Path::new(path)) {
                Ok(catalog) => {
                    info!(path, count = catalog.products.len(), "catalog loaded");
                    return catalog;
                }
                Err(err) => {
                    warn!(path, error = %err, "failed to load catalog file, using built-in products");
                }
            }
        }
        Self::builtin()
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let products: Vec<Product> = serde_json::from_str(&raw)?;
        anyhow::ensure!(!products.is_empty(), "catalog file contains no products");
        Ok(Self::new(products))
    }

    fn builtin() -> Self {
        Self::new(vec![
            Product {
                id: "rice-5kg".to_string(),
                title: "Mchele 5kg".to_string(),
                unit_price_tzs: 18000,
            },
            Product {
                id: "sugar-1kg".to_string(),
                title: "Sukari 1kg".to_string(),
                unit_price_tzs: 3200,
            },
            Product {
                id: "oil-1l".to_string(),
                title: "Mafuta ya Alizeti 1L".to_string(),
                unit_price_tzs: 7500,
            },
            Product {
                id: "flour-2kg".to_string(),
                title: "Unga wa Ngano 2kg".to_string(),
                unit_price_tzs: 5600,
            },
            Product {
                id: "water-12pk".to_string(),
                title: "Maji 12x500ml".to_string(),
                unit_price_tzs: 6000,
            },
        ])
    }

    pub fn get(&self, product_id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == product_id)
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }
}
