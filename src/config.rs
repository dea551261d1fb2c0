use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::{AssignCursor, AssignSettings, DemandOrder, PoolScope};
use crate::services::AssignOptions;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_DATABASE_URL: &str = "sqlite://autoassign.db?mode=rwc";
const CONFIG_DIR: &str = "config";
const KNOWN_ENVIRONMENTS: [&str; 4] = ["development", "test", "staging", "production"];

/// Assignment tunables. The first three seed the settings record the first
/// time it is created; afterwards the record is authoritative.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AssignConfig {
    #[serde(default = "default_true_bool")]
    pub try_wait_to_assign: bool,

    /// Shipments per sweep block, 0 = whole backlog in one block
    #[serde(default = "default_block_size")]
    #[validate(range(max = 2147483647))]
    pub block_size: u32,

    /// Blocks per sweep run, 0 = until the backlog wraps
    #[serde(default = "default_repeat_blocks")]
    #[validate(range(max = 2147483647))]
    pub repeat_blocks: u32,

    /// Lock gate poll interval (milliseconds)
    #[serde(default = "default_lock_poll_interval_ms")]
    #[validate(range(min = 1, max = 600000))]
    pub lock_poll_interval_ms: u64,

    #[serde(default)]
    pub pool_scope: PoolScope,

    #[serde(default)]
    pub demand_order: DemandOrder,

    /// Count inbound stock still in transit as available
    #[serde(default)]
    pub forecast: bool,

    /// Seconds between sweeps in watch mode
    #[serde(default = "default_sweep_interval_secs")]
    #[validate(range(min = 1))]
    pub sweep_interval_secs: u64,
}

impl Default for AssignConfig {
    fn default() -> Self {
        Self {
            try_wait_to_assign: true,
            block_size: default_block_size(),
            repeat_blocks: default_repeat_blocks(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            pool_scope: PoolScope::default(),
            demand_order: DemandOrder::default(),
            forecast: false,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl AssignConfig {
    /// Settings record written when none exists yet.
    pub fn settings_seed(&self) -> AssignSettings {
        AssignSettings {
            try_wait_to_assign: self.try_wait_to_assign,
            block_size: Some(self.block_size),
            repeat_blocks: Some(self.repeat_blocks),
            cursor: AssignCursor::default(),
        }
    }

    pub fn options(&self) -> AssignOptions {
        AssignOptions {
            scope: self.pool_scope,
            order: self.demand_order,
            forecast: self.forecast,
        }
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    #[validate(custom = "validate_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1, max = 1000000))]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub assign: AssignConfig,
}

impl AppConfig {
    /// Built-in defaults pointed at `database_url`.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            assign: AssignConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.database_url.starts_with("sqlite:") {
            let mut err = ValidationError::new("database_url_sqlite_in_production");
            err.message = Some(
                "SQLite has no table locks to back off from; set APP__DATABASE_URL to a PostgreSQL database in production"
                    .into(),
            );
            errors.add("database_url", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections_above_max");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validate_environment(value: &str) -> Result<(), ValidationError> {
    if KNOWN_ENVIRONMENTS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(value))
    {
        Ok(())
    } else {
        let mut err = ValidationError::new("environment");
        err.message = Some("Must be one of: development, test, staging, production".into());
        Err(err)
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_true_bool() -> bool {
    true
}
fn default_block_size() -> u32 {
    crate::models::DEFAULT_BLOCK_SIZE
}
fn default_repeat_blocks() -> u32 {
    crate::models::DEFAULT_REPEAT_BLOCKS
}
fn default_lock_poll_interval_ms() -> u64 {
    1_000
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_db_max_connections() -> u32 {
    16
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

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Initialise the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stock_autoassign={},sea_orm=warn,sqlx=warn", level);
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

/// Layered load: built-in defaults, `config/default`, `config/{RUN_ENV}`,
/// then `APP__*` environment variables (`APP__ASSIGN__BLOCK_SIZE=200`).
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
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint check failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
