use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::models::order::QuoteSource;

/// One row of the static street reference dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreetRow {
    pub region: String,
    pub district: String,
    pub ward: String,
    pub street: String,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedDistance {
    pub distance_km: f64,
    pub source: QuoteSource,
}

/// Resolves a location descriptor to a distance from the business origin,
/// walking a hierarchy of data sources: GPS great-circle, exact street row,
/// ward median, district mean, configured default. Loaded once at startup; a
/// missing dataset degrades every query to the default tier.
#[derive(Debug)]
pub struct DistanceResolver {
    rows: Vec<StreetRow>,
    origin: (f64, f64),
    default_km: f64,
}

impl DistanceResolver {
    pub fn new(rows: Vec<StreetRow>, origin: (f64, f64), default_km: f64) -> Self {
        Self {
            rows,
            origin,
            default_km,
        }
    }

    /// Loads the dataset from a JSON file. Failure must not crash the
    /// process: the resolver degrades to the default tier with one warning.
    pub fn load(path: Option<&str>, origin: (f64, f64), default_km: f64) -> Self {
        let rows = match path {
            Some(path) => match Self::read_rows(Path::new(path)) {
                Ok(rows) => {
                    info!(path, count = rows.len(), "street reference dataset loaded");
                    rows
                }
                Err(err) => {
                    warn!(
                        path,
                        error = %err,
                        "street reference dataset unavailable; all quotes will use the default distance"
                    );
                    Vec::new()
                }
            },
            None => {
                warn!("no street dataset configured; all quotes will use the default distance");
                Vec::new()
            }
        };
        Self::new(rows, origin, default_km)
    }

    fn read_rows(path: &Path) -> anyhow::Result<Vec<StreetRow>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Resolution order, first match wins: GPS, exact street, ward median,
    /// district mean, configured default.
    pub fn resolve(
        &self,
        district: Option<&str>,
        ward: Option<&str>,
        street: Option<&str>,
        gps: Option<(f64, f64)>,
    ) -> ResolvedDistance {
        if let Some((lat, lng)) = gps {
            // Round up to 100 m so two fixes at the same address quote the
            // same fee.
            let raw = haversine_km(self.origin, (lat, lng));
            return ResolvedDistance {
                distance_km: round_up_to_100m(raw),
                source: QuoteSource::Gps,
            };
        }

        let district = match district {
            Some(d) => normalize(d),
            None => {
                return ResolvedDistance {
                    distance_km: self.default_km,
                    source: QuoteSource::Default,
                }
            }
        };

        if let Some(ward) = ward.map(normalize) {
            let ward_rows: Vec<&StreetRow> = self
                .rows
                .iter()
                .filter(|r| normalize(&r.district) == district && normalize(&r.ward) == ward)
                .collect();

            if let Some(street) = street.map(normalize) {
                if let Some(row) = match_street(&ward_rows, &street) {
                    return ResolvedDistance {
                        distance_km: row.distance_km,
                        source: QuoteSource::ExactStreet,
                    };
                }
            }

            if !ward_rows.is_empty() {
                let distances: Vec<f64> = ward_rows.iter().map(|r| r.distance_km).collect();
                return ResolvedDistance {
                    distance_km: median(&distances),
                    source: QuoteSource::WardMedian,
                };
            }
        }

        let district_distances: Vec<f64> = self
            .rows
            .iter()
            .filter(|r| normalize(&r.district) == district)
            .map(|r| r.distance_km)
            .collect();
        if !district_distances.is_empty() {
            let mean = district_distances.iter().sum::<f64>() / district_distances.len() as f64;
            return ResolvedDistance {
                distance_km: mean,
                source: QuoteSource::DistrictAverage,
            };
        }

        ResolvedDistance {
            distance_km: self.default_km,
            source: QuoteSource::Default,
        }
    }

    pub fn has_dataset(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Distinct district names for the narrowing menu, sorted.
    pub fn districts(&self) -> Vec<String> {
        let mut names = Vec::new();
        for row in &self.rows {
            if !names
                .iter()
                .any(|n: &String| normalize(n) == normalize(&row.district))
            {
                names.push(row.district.clone());
            }
        }
        names.sort();
        names
    }

    pub fn wards(&self, district: &str) -> Vec<String> {
        let district = normalize(district);
        let mut names = Vec::new();
        for row in self
            .rows
            .iter()
            .filter(|r| normalize(&r.district) == district)
        {
            if !names
                .iter()
                .any(|n: &String| normalize(n) == normalize(&row.ward))
            {
                names.push(row.ward.clone());
            }
        }
        names.sort();
        names
    }

    pub fn streets(&self, district: &str, ward: &str) -> Vec<String> {
        let district = normalize(district);
        let ward = normalize(ward);
        let mut names = Vec::new();
        for row in self
            .rows
            .iter()
            .filter(|r| normalize(&r.district) == district && normalize(&r.ward) == ward)
        {
            if !names
                .iter()
                .any(|n: &String| normalize(n) == normalize(&row.street))
            {
                names.push(row.street.clone());
            }
        }
        names.sort();
        names
    }

    /// Resolves a free-text district name against the dataset, preferring
    /// exact over prefix over substring matches.
    pub fn match_district(&self, input: &str) -> Option<String> {
        let names = self.districts();
        match_name(&names, input)
    }
}

/// Falls back from exact to prefix to substring match on the street name.
fn match_street<'a>(rows: &[&'a StreetRow], street: &str) -> Option<&'a StreetRow> {
    rows.iter()
        .find(|r| normalize(&r.street) == street)
        .or_else(|| rows.iter().find(|r| normalize(&r.street).starts_with(street)))
        .or_else(|| rows.iter().find(|r| normalize(&r.street).contains(street)))
        .copied()
}

/// Exact, then prefix, then substring match over a list of names.
pub fn match_name(names: &[String], input: &str) -> Option<String> {
    let needle = normalize(input);
    if needle.is_empty() {
        return None;
    }
    names
        .iter()
        .find(|n| normalize(n) == needle)
        .or_else(|| names.iter().find(|n| normalize(n).starts_with(&needle)))
        .or_else(|| names.iter().find(|n| normalize(n).contains(&needle)))
        .cloned()
}

/// Lowercases, strips the diacritics that show up in local place names, and
/// collapses whitespace.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = true;
    for c in input.trim().chars() {
        let mapped = match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'Á' | 'À' | 'Â' | 'Ä' | 'Ã' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
            'ñ' | 'Ñ' => 'n',
            'ç' | 'Ç' => 'c',
            other => other,
        };
        if mapped.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            for lower in mapped.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Great-circle distance between two WGS84 points.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1, lng1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lng2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Rounds a distance up to the nearest 100 metres.
pub fn round_up_to_100m(km: f64) -> f64 {
    (km * 10.0).ceil() / 10.0
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(district: &str, ward: &str, street: &str, km: f64) -> StreetRow {
        StreetRow {
            region: "Dar es Salaam".to_string(),
            district: district.to_string(),
            ward: ward.to_string(),
            street: street.to_string(),
            distance_km: km,
        }
    }

    fn resolver() -> DistanceResolver {
        DistanceResolver::new(
            vec![
                row("Kinondoni", "Mikocheni", "Haile Selassie", 6.2),
                row("Kinondoni", "Mikocheni", "Rose Garden", 6.8),
                row("Kinondoni", "Mikocheni", "Old Bagamoyo", 7.4),
                row("Kinondoni", "Msasani", "Chole Road", 8.1),
                row("Ilala", "Kariakoo", "Msimbazi", 1.2),
            ],
            (-6.8235, 39.2695),
            12.0,
        )
    }

    #[test]
    fn exact_street_match() {
        let r = resolver().resolve(
            Some("Kinondoni"),
            Some("Mikocheni"),
            Some("Haile Selassie"),
            None,
        );
        assert_eq!(r.source, QuoteSource::ExactStreet);
        assert!((r.distance_km - 6.2).abs() < 1e-9);
    }

    #[test]
    fn matching_is_case_and_diacritic_insensitive() {
        let r = resolver().resolve(
            Some("KINONDONI"),
            Some("Mikochéni"),
            Some("haile selassie"),
            None,
        );
        assert_eq!(r.source, QuoteSource::ExactStreet);
    }

    #[test]
    fn street_prefix_and_substring_fallback() {
        let resolver = resolver();
        let r = resolver.resolve(Some("Kinondoni"), Some("Mikocheni"), Some("Haile"), None);
        assert_eq!(r.source, QuoteSource::ExactStreet);
        assert!((r.distance_km - 6.2).abs() < 1e-9);

        let r = resolver.resolve(Some("Kinondoni"), Some("Mikocheni"), Some("Bagamoyo"), None);
        assert_eq!(r.source, QuoteSource::ExactStreet);
        assert!((r.distance_km - 7.4).abs() < 1e-9);
    }

    #[test]
    fn unknown_street_falls_back_to_ward_median() {
        let r = resolver().resolve(
            Some("Kinondoni"),
            Some("Mikocheni"),
            Some("No Such Street"),
            None,
        );
        assert_eq!(r.source, QuoteSource::WardMedian);
        // Median of 6.2, 6.8, 7.4 (median, not mean, to resist outliers)
        assert!((r.distance_km - 6.8).abs() < 1e-9);
    }

    #[test]
    fn unknown_ward_falls_back_to_district_mean() {
        let r = resolver().resolve(Some("Kinondoni"), Some("Kawe"), None, None);
        assert_eq!(r.source, QuoteSource::DistrictAverage);
        let expected = (6.2 + 6.8 + 7.4 + 8.1) / 4.0;
        assert!((r.distance_km - expected).abs() < 1e-9);
    }

    #[test]
    fn unknown_district_uses_default() {
        let r = resolver().resolve(Some("Dodoma Mjini"), None, None, None);
        assert_eq!(r.source, QuoteSource::Default);
        assert!((r.distance_km - 12.0).abs() < 1e-9);
    }

    #[test]
    fn gps_wins_over_everything_and_rounds_up() {
        let resolver = resolver();
        // Mikocheni-ish pin; exact value does not matter, rounding does.
        let r = resolver.resolve(
            Some("Kinondoni"),
            Some("Mikocheni"),
            Some("Haile Selassie"),
            Some((-6.7735, 39.2627)),
        );
        assert_eq!(r.source, QuoteSource::Gps);
        let hundreds = r.distance_km * 10.0;
        assert!((hundreds - hundreds.round()).abs() < 1e-9);
    }

    #[test]
    fn nearby_gps_fixes_quote_identically() {
        let resolver = resolver();
        let a = resolver.resolve(None, None, None, Some((-6.77350, 39.26270)));
        let b = resolver.resolve(None, None, None, Some((-6.77352, 39.26268)));
        assert!((a.distance_km - b.distance_km).abs() < 1e-9);
    }

    #[test]
    fn haversine_zero_at_origin() {
        let origin = (-6.8235, 39.2695);
        assert!(haversine_km(origin, origin) < 1e-9);
    }

    #[test]
    fn haversine_known_pair() {
        // Dar es Salaam to Zanzibar town is roughly 70 km.
        let d = haversine_km((-6.8160, 39.2803), (-6.1659, 39.2026));
        assert!((60.0..80.0).contains(&d), "got {}", d);
    }

    #[test]
    fn missing_dataset_degrades_to_default() {
        let resolver = DistanceResolver::load(Some("/no/such/file.json"), (-6.8235, 39.2695), 12.0);
        assert!(!resolver.has_dataset());
        let r = resolver.resolve(Some("Kinondoni"), Some("Mikocheni"), None, None);
        assert_eq!(r.source, QuoteSource::Default);
    }

    #[test]
    fn narrowing_lists_are_deduped_and_sorted() {
        let resolver = resolver();
        assert_eq!(resolver.districts(), vec!["Ilala", "Kinondoni"]);
        assert_eq!(resolver.wards("kinondoni"), vec!["Mikocheni", "Msasani"]);
        assert_eq!(
            resolver.streets("Kinondoni", "Mikocheni"),
            vec!["Haile Selassie", "Old Bagamoyo", "Rose Garden"]
        );
    }

    #[test]
    fn district_free_text_matching() {
        let resolver = resolver();
        assert_eq!(
            resolver.match_district("kinon").as_deref(),
            Some("Kinondoni")
        );
        assert_eq!(resolver.match_district("xyz"), None);
    }
}
