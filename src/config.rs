use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
pub const CONFIG_DIR: &str = "config";
const DEFAULT_UNDO_WINDOW_SECS: u64 = 120;
const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 5;
const DEFAULT_ALERT_LIMIT: usize = 10;
const DEFAULT_ACTIVITY_WINDOW_DAYS: i64 = 7;
const DEFAULT_SESSION_TTL_SECS: u64 = 12 * 60 * 60;
const DEFAULT_ROSTER_CACHE_PATH: &str = "data/roster-cache.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
// Argon2 defaults (19 MiB, 2 passes)
const DEFAULT_PIN_HASH_MEMORY_KIB: u32 = 19 * 1024;
const DEFAULT_PIN_HASH_ITERATIONS: u32 = 2;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Seconds during which the last transfer can be undone
    #[serde(default = "default_undo_window_secs")]
    #[validate(range(min = 1))]
    pub undo_window_secs: u64,

    /// Attempts at a conditional ledger write before giving up
    #[serde(default = "default_max_commit_attempts")]
    #[validate(range(min = 1, max = 50))]
    pub max_commit_attempts: u32,

    /// Maximum entries in the dashboard alert list
    #[serde(default = "default_alert_limit")]
    #[validate(range(min = 1))]
    pub alert_limit: usize,

    /// Trailing window of the activity summary
    #[serde(default = "default_activity_window_days")]
    #[validate(range(min = 1, max = 366))]
    pub activity_window_days: i64,

    /// Delete an item when its last location is removed
    #[serde(default = "default_true_bool")]
    pub cascade_delete_empty_items: bool,

    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl_secs")]
    #[validate(range(min = 60))]
    pub session_ttl_secs: u64,

    /// Roster cache file for offline login
    #[serde(default = "default_roster_cache_path")]
    pub roster_cache_path: PathBuf,

    /// Administrator created when the roster is empty
    #[serde(default)]
    pub bootstrap_admin_name: Option<String>,
    #[serde(default)]
    pub bootstrap_admin_pin: Option<String>,

    /// Argon2 cost for new PIN hashes
    #[serde(default = "default_pin_hash_memory_kib")]
    #[validate(range(min = 8))]
    pub pin_hash_memory_kib: u32,
    #[serde(default = "default_pin_hash_iterations")]
    #[validate(range(min = 1))]
    pub pin_hash_iterations: u32,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            undo_window_secs: DEFAULT_UNDO_WINDOW_SECS,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            alert_limit: DEFAULT_ALERT_LIMIT,
            activity_window_days: DEFAULT_ACTIVITY_WINDOW_DAYS,
            cascade_delete_empty_items: true,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            roster_cache_path: default_roster_cache_path(),
            bootstrap_admin_name: None,
            bootstrap_admin_pin: None,
            pin_hash_memory_kib: DEFAULT_PIN_HASH_MEMORY_KIB,
            pin_hash_iterations: DEFAULT_PIN_HASH_ITERATIONS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cors_allowed_origins: None,
        }
    }
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn undo_window(&self) -> Duration {
        Duration::from_secs(self.undo_window_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Bootstrap administrator credentials, when both are configured.
    pub fn bootstrap_admin(&self) -> Option<(&str, &str)> {
        Some((
            self.bootstrap_admin_name.as_deref()?,
            self.bootstrap_admin_pin.as_deref()?,
        ))
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        match (&self.bootstrap_admin_name, &self.bootstrap_admin_pin) {
            (Some(_), None) | (None, Some(_)) => {
                let mut err = ValidationError::new("bootstrap_admin");
                err.message =
                    Some("bootstrap_admin_name and bootstrap_admin_pin must be set together".into());
                errors.add("bootstrap_admin_pin", err);
            }
            (Some(_), Some(pin)) if crate::auth::validate_pin(pin).is_err() => {
                let mut err = ValidationError::new("bootstrap_admin_pin");
                err.message = Some("Must be exactly 6 digits".into());
                errors.add("bootstrap_admin_pin", err);
            }
            _ => {}
        }
        if self.is_production() && self.cors_origins().is_empty() {
            let mut err = ValidationError::new("cors_allowed_origins");
            err.message = Some("Production requires explicit CORS origins".into());
            errors.add("cors_allowed_origins", err);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true_bool() -> bool {
    true
}

fn default_undo_window_secs() -> u64 {
    DEFAULT_UNDO_WINDOW_SECS
}

fn default_max_commit_attempts() -> u32 {
    DEFAULT_MAX_COMMIT_ATTEMPTS
}

fn default_alert_limit() -> usize {
    DEFAULT_ALERT_LIMIT
}

fn default_activity_window_days() -> i64 {
    DEFAULT_ACTIVITY_WINDOW_DAYS
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_roster_cache_path() -> PathBuf {
    PathBuf::from(DEFAULT_ROSTER_CACHE_PATH)
}

fn default_pin_hash_memory_kib() -> u32 {
    DEFAULT_PIN_HASH_MEMORY_KIB
}

fn default_pin_hash_iterations() -> u32 {
    DEFAULT_PIN_HASH_ITERATIONS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Validates log level values
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

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("aidstock={},tower_http=debug", level);
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

/// Loads configuration from `config/` under the working directory.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Layers built-in defaults, `{dir}/default.*`, `{dir}/{RUN_ENV|APP_ENV}.*`
/// and `APP__*` environment variables, then validates the result.
pub fn load_config_from(dir: &Path) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn config_dir(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("default.toml"), content).unwrap();
        dir
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let dir = config_dir("port = 9090\n");
        let config = load_config_from(dir.path()).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.undo_window(), Duration::from_secs(120));
        assert_eq!(config.max_commit_attempts, 5);
        assert_eq!(config.alert_limit, 10);
        assert!(config.cascade_delete_empty_items);
        assert!(config.bootstrap_admin().is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = config_dir("jwt_secret = \"nope\"\n");
        assert_matches!(load_config_from(dir.path()), Err(AppConfigError::Load(_)));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = config_dir("log_level = \"loud\"\nundo_window_secs = 0\n");
        let result = load_config_from(dir.path());
        assert_matches!(result, Err(AppConfigError::Validation(ref errors)) => {
            assert!(errors.field_errors().contains_key("log_level"));
            assert!(errors.field_errors().contains_key("undo_window_secs"));
        });
    }

    #[test]
    fn bootstrap_admin_needs_both_values_and_a_valid_pin() {
        let mut config = AppConfig {
            bootstrap_admin_name: Some("Admin".into()),
            ..Default::default()
        };
        assert!(config.validate_additional_constraints().is_err());
        config.bootstrap_admin_pin = Some("12ab56".into());
        assert!(config.validate_additional_constraints().is_err());
        config.bootstrap_admin_pin = Some("123456".into());
        assert!(config.validate_additional_constraints().is_ok());
        assert_eq!(config.bootstrap_admin(), Some(("Admin", "123456")));
    }

    #[test]
    fn production_requires_cors_origins() {
        let mut config = AppConfig {
            environment: "production".into(),
            ..Default::default()
        };
        assert!(config.validate_additional_constraints().is_err());
        config.cors_allowed_origins = Some("https://aid.example.org, https://ops.example.org".into());
        assert!(config.validate_additional_constraints().is_ok());
        assert_eq!(config.cors_origins().len(), 2);
    }
}
