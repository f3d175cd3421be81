use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Business origin used for GPS distance calculations. Defaults to the shop's
/// location in Kariakoo, Dar es Salaam.
const DEFAULT_ORIGIN_LAT: f64 = -6.8235;
const DEFAULT_ORIGIN_LNG: f64 = 39.2695;

const DEFAULT_DISTANCE_KM: f64 = 12.0;
const DEFAULT_RATE_PER_KM_TZS: i64 = 700;
const DEFAULT_ROUNDING_STEP_TZS: i64 = 500;
const DEFAULT_MENU_PAGE_SIZE: usize = 8;

/// A marginal-rate relief band: distance travelled beyond `beyond_km` is
/// charged at `multiplier` times the base per-km rate.
#[derive(Clone, Debug, Deserialize)]
pub struct ReliefBand {
    pub beyond_km: f64,
    pub multiplier: f64,
}

/// Delivery-fee schedule. The fee is integrated over the per-km rate (with
/// relief bands applied to the marginal rate), then rounded half-up to
/// `rounding_step_tzs` exactly once.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct QuoteConfig {
    /// Base delivery rate in TZS per kilometre
    #[serde(default = "default_rate_per_km")]
    pub rate_per_km_tzs: i64,

    /// Final fee is rounded half-up to the nearest multiple of this step
    #[serde(default = "default_rounding_step")]
    pub rounding_step_tzs: i64,

    /// Long-distance relief bands, applied to the marginal rate
    #[serde(default = "default_relief")]
    pub relief: Vec<ReliefBand>,

    /// Quotes beyond this radius are flagged out-of-service; 0 disables the limit
    #[serde(default)]
    pub service_radius_km: f64,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            rate_per_km_tzs: default_rate_per_km(),
            rounding_step_tzs: default_rounding_step(),
            relief: default_relief(),
            service_radius_km: 0.0,
        }
    }
}

fn default_rate_per_km() -> i64 {
    DEFAULT_RATE_PER_KM_TZS
}

fn default_rounding_step() -> i64 {
    DEFAULT_ROUNDING_STEP_TZS
}

fn default_relief() -> Vec<ReliefBand> {
    // Beyond 15 km the marginal rate drops, so upcountry-edge customers are
    // not priced out entirely.
    vec![ReliefBand {
        beyond_km: 15.0,
        multiplier: 0.7,
    }]
}

/// Application configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Display name used in outbound copy
    #[serde(default = "default_business_name")]
    pub business_name: String,

    /// Token echoed back during the WhatsApp webhook GET handshake
    pub whatsapp_verify_token: String,

    /// Meta app secret for X-Hub-Signature-256 verification; unset disables
    /// verification (development only)
    #[serde(default)]
    pub whatsapp_app_secret: Option<String>,

    /// Shared secret for PSP callback checksum/signature verification
    #[serde(default)]
    pub psp_webhook_secret: Option<String>,

    /// Manual-payment instructions shown to the customer (bank account,
    /// mobile-money till number)
    #[serde(default = "default_payment_instructions")]
    pub payment_instructions: String,

    /// Business origin for great-circle distance
    #[serde(default = "default_origin_lat")]
    pub origin_lat: f64,
    #[serde(default = "default_origin_lng")]
    pub origin_lng: f64,

    /// Fallback distance when no dataset tier matches
    #[serde(default = "default_distance_km")]
    pub default_distance_km: f64,

    /// Path to the street reference dataset (JSON rows); absence degrades to
    /// the default distance for every query
    #[serde(default)]
    pub street_dataset_path: Option<String>,

    /// Path to a catalog file overriding the built-in product list
    #[serde(default)]
    pub catalog_path: Option<String>,

    /// Rows per page in interactive list menus
    #[serde(default = "default_menu_page_size")]
    pub menu_page_size: usize,

    /// Delivery-fee schedule
    #[serde(default)]
    #[validate]
    pub quote: QuoteConfig,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_business_name() -> String {
    "Duka Bot".to_string()
}

fn default_payment_instructions() -> String {
    "Lipa kwa M-Pesa: 555222 (Duka Bot) au NMB A/C 2011-0045-6789".to_string()
}

fn default_origin_lat() -> f64 {
    DEFAULT_ORIGIN_LAT
}

fn default_origin_lng() -> f64 {
    DEFAULT_ORIGIN_LNG
}

fn default_distance_km() -> f64 {
    DEFAULT_DISTANCE_KM
}

fn default_menu_page_size() -> usize {
    DEFAULT_MENU_PAGE_SIZE
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("dev")
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Constraints that cannot be expressed as field-level validators.
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationError> {
        if self.quote.rate_per_km_tzs <= 0 {
            return Err(ValidationError::new("rate_per_km_tzs must be positive"));
        }
        if self.quote.rounding_step_tzs <= 0 {
            return Err(ValidationError::new("rounding_step_tzs must be positive"));
        }
        if self.quote.relief.iter().any(|b| b.multiplier <= 0.0) {
            return Err(ValidationError::new("relief multipliers must be positive"));
        }
        if self.default_distance_km < 0.0 {
            return Err(ValidationError::new("default_distance_km must be >= 0"));
        }
        if self.menu_page_size == 0 || self.menu_page_size > 9 {
            // WhatsApp list messages carry at most 10 rows; one is reserved
            // for the pagination row.
            return Err(ValidationError::new("menu_page_size must be 1..=9"));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("dukabot_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads configuration from `config/{default,<env>}` files plus `APP__*`
/// environment variables (`__` separator).
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("whatsapp_verify_token", "dukabot-dev-verify-token")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e.to_string())
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e.to_string())
    })?;

    if app_config.whatsapp_app_secret.is_none() {
        info!("WhatsApp app secret not configured; inbound signature verification disabled");
    }
    if app_config.psp_webhook_secret.is_none() {
        info!("PSP webhook secret not configured; callback checksum verification disabled");
    }

    Ok(app_config)
}

impl AppConfig {
    /// Plain config for unit and integration tests.
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            log_level: "debug".to_string(),
            log_json: false,
            business_name: "Duka Bot".to_string(),
            whatsapp_verify_token: "test-verify-token".to_string(),
            whatsapp_app_secret: Some("test-app-secret".to_string()),
            psp_webhook_secret: Some("test-psp-secret".to_string()),
            payment_instructions: default_payment_instructions(),
            origin_lat: DEFAULT_ORIGIN_LAT,
            origin_lng: DEFAULT_ORIGIN_LNG,
            default_distance_km: DEFAULT_DISTANCE_KM,
            street_dataset_path: None,
            catalog_path: None,
            menu_page_size: DEFAULT_MENU_PAGE_SIZE,
            quote: QuoteConfig::default(),
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::for_tests();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn rejects_zero_rounding_step() {
        let mut cfg = AppConfig::for_tests();
        cfg.quote.rounding_step_tzs = 0;
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn rejects_oversized_menu_page() {
        let mut cfg = AppConfig::for_tests();
        cfg.menu_page_size = 10;
        assert!(cfg.validate_additional_constraints().is_err());
    }
}
