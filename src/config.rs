use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_TOSS_API_BASE_URL: &str = "https://api.tosspayments.com";

/// Checkout pricing knobs.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PricingConfig {
    /// Subtotal at or above which delivery is free
    #[serde(default = "default_free_delivery_threshold")]
    pub free_delivery_threshold: i64,

    /// Delivery fee charged below the threshold
    #[serde(default = "default_base_delivery_fee")]
    pub base_delivery_fee: i64,

    /// Rate used for the `expected_point` preview figure
    #[serde(default = "default_rate")]
    #[validate(custom = "validate_rate")]
    pub reward_rate: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            free_delivery_threshold: default_free_delivery_threshold(),
            base_delivery_fee: default_base_delivery_fee(),
            reward_rate: default_rate(),
        }
    }
}

/// Rounding applied to the settlement reward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointRounding {
    #[default]
    Floor,
    Ceil,
    /// Half-up
    Round,
}

/// Loyalty point policy.
#[derive(Clone, Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_point_clamps"))]
pub struct PointsConfig {
    /// Balance a user must hold before any point can be spent
    #[serde(default = "default_min_balance_to_use")]
    pub min_balance_to_use: i64,

    /// Reward rate applied to `total_payment` once an order completes
    #[serde(default = "default_rate")]
    #[validate(custom = "validate_rate")]
    pub earn_rate: Decimal,

    #[serde(default)]
    pub round: PointRounding,

    #[serde(default)]
    pub min: Option<i64>,

    #[serde(default)]
    pub max: Option<i64>,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            min_balance_to_use: default_min_balance_to_use(),
            earn_rate: default_rate(),
            round: PointRounding::Floor,
            min: None,
            max: None,
        }
    }
}

/// Toss Payments credentials and endpoints.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct TossConfig {
    /// Server-held secret, sent as the basic-auth user name
    #[serde(default)]
    pub secret_key: String,

    /// Public key handed to the payment widget
    #[serde(default)]
    pub client_key: Option<String>,

    #[serde(default = "default_toss_api_base_url")]
    #[validate(length(min = 1))]
    pub api_base_url: String,

    #[serde(default = "default_toss_timeout_secs")]
    pub timeout_secs: u64,

    /// Redirect target after approval; defaults to this service's success bridge
    #[serde(default)]
    pub success_url: Option<String>,

    /// Redirect target after rejection; defaults to this service's fail bridge
    #[serde(default)]
    pub fail_url: Option<String>,
}

impl Default for TossConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            client_key: None,
            api_base_url: default_toss_api_base_url(),
            timeout_secs: default_toss_timeout_secs(),
            success_url: None,
            fail_url: None,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma-separated list of allowed CORS origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub pricing: PricingConfig,

    #[serde(default)]
    #[validate]
    pub points: PointsConfig,

    #[serde(default)]
    #[validate]
    pub toss: TossConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            pricing: PricingConfig::default(),
            points: PointsConfig::default(),
            toss: TossConfig::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Origins parsed from `cors_allowed_origins`, empty entries dropped
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Base URL this service is reachable on, used for default redirect targets
    pub fn public_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_free_delivery_threshold() -> i64 {
    50_000
}

fn default_base_delivery_fee() -> i64 {
    3_500
}

fn default_min_balance_to_use() -> i64 {
    5_000
}

fn default_rate() -> Decimal {
    dec!(0.01)
}

fn default_toss_api_base_url() -> String {
    DEFAULT_TOSS_API_BASE_URL.to_string()
}

fn default_toss_timeout_secs() -> u64 {
    10
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_rate(rate: &Decimal) -> Result<(), ValidationError> {
    if rate.is_sign_negative() || *rate > Decimal::ONE {
        let mut err = ValidationError::new("rate");
        err.message = Some("rate must be between 0 and 1".into());
        return Err(err);
    }
    Ok(())
}

fn validate_point_clamps(points: &PointsConfig) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (points.min, points.max) {
        if min > max {
            let mut err = ValidationError::new("points_clamp");
            err.message = Some("points.min must not exceed points.max".into());
            return Err(err);
        }
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. `config/default.*`
/// 3. `config/{RUN_ENV}.*`
/// 4. Environment variables (`APP__*`, nested with `__`)
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

    let builder = base_builder(&run_env)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    finish(builder.build()?)
}

/// Loads configuration from a single file layered over the built-in defaults.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig, AppConfigError> {
    let builder = base_builder(DEFAULT_ENV)?.add_source(File::from(path));
    finish(builder.build()?)
}

fn base_builder(
    run_env: &str,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)
}

fn finish(config: Config) -> Result<AppConfig, AppConfigError> {
    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if app_config.toss.secret_key.is_empty() {
        tracing::warn!("toss.secret_key is empty; payment confirmation will be rejected by the gateway");
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_checkout_policy() {
        let cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        assert_eq!(cfg.pricing.free_delivery_threshold, 50_000);
        assert_eq!(cfg.pricing.base_delivery_fee, 3_500);
        assert_eq!(cfg.pricing.reward_rate, dec!(0.01));
        assert_eq!(cfg.points.min_balance_to_use, 5_000);
        assert_eq!(cfg.points.round, PointRounding::Floor);
        assert_eq!(cfg.toss.timeout_secs, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_rate() {
        let mut cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        cfg.points.earn_rate = dec!(1.5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_point_clamps() {
        let mut cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        cfg.points.min = Some(100);
        cfg.points.max = Some(10);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cors_origins_skip_blank_entries() {
        let mut cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        cfg.cors_allowed_origins = Some("https://a.example, ,https://b.example".into());
        assert_eq!(
            cfg.cors_origins(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn loads_nested_sections_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp config");
        writeln!(
            file,
            r#"
database_url = "sqlite::memory:"
port = 9090

[points]
earn_rate = "0.05"
round = "ceil"
max = 1000

[toss]
secret_key = "test_sk_abc"
client_key = "test_ck_abc"
"#
        )
        .expect("write config");

        let cfg = load_config_from_file(file.path()).expect("config should load");
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.points.earn_rate, dec!(0.05));
        assert_eq!(cfg.points.round, PointRounding::Ceil);
        assert_eq!(cfg.points.max, Some(1000));
        assert_eq!(cfg.toss.secret_key, "test_sk_abc");
        assert_eq!(cfg.toss.api_base_url, DEFAULT_TOSS_API_BASE_URL);
        assert_eq!(cfg.pricing.base_delivery_fee, 3_500);
    }
}
