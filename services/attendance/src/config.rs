use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the attendance service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Inference service endpoints
    pub inference: InferenceConfig,
    /// API configuration
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Downstream inference service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Endpoint receiving multipart frame sets for prediction
    #[serde(default)]
    pub prediction_url: String,
    /// Endpoint polled for the pending attendance result
    #[serde(default)]
    pub frame_status_url: String,
    /// Endpoint notified after a successful registration
    #[serde(default)]
    pub success_url: String,
    /// Multipart field name every relayed frame is attached under
    #[serde(default = "default_frame_field")]
    pub frame_field: String,
    /// Request timeout in seconds (unset = transport default)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// API configuration for the device-facing endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

// Default value functions
fn default_service_name() -> String {
    "attendance-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_frame_field() -> String {
    "img".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024 // 32MB
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "attendance-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .set_default("database.url", "")?
            .set_default("inference.prediction_url", "")?
            .set_default("api.port", 8080)?
            // Add config file if present
            .add_source(config::File::with_name("config/attendance").required(false))
            .add_source(config::File::with_name("/etc/attendance/service").required(false))
            // Override with environment variables
            // ATTENDANCE__INFERENCE__PREDICTION_URL -> inference.prediction_url
            .add_source(
                config::Environment::with_prefix("ATTENDANCE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate that every endpoint the service depends on is present and usable
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingField("database.url".to_string()));
        }

        validate_endpoint("inference.prediction_url", &self.inference.prediction_url)?;
        validate_endpoint("inference.frame_status_url", &self.inference.frame_status_url)?;
        validate_endpoint("inference.success_url", &self.inference.success_url)?;

        if self.inference.frame_field.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "inference.frame_field".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue {
                field: "database.min_connections".to_string(),
                message: "must not exceed max_connections".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_endpoint(field: &str, value: &str) -> Result<(), ConfigValidationError> {
    if value.is_empty() {
        return Err(ConfigValidationError::MissingField(field.to_string()));
    }

    let url = Url::parse(value).map_err(|e| ConfigValidationError::InvalidValue {
        field: field.to_string(),
        message: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigValidationError::InvalidValue {
            field: field.to_string(),
            message: format!("unsupported scheme '{}'", other),
        }),
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl InferenceConfig {
    /// Request timeout, if one is configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Configuration pointing every endpoint at one base URL
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            prediction_url: format!("{}/predict", base_url),
            frame_status_url: format!("{}/frame-status", base_url),
            success_url: format!("{}/success", base_url),
            frame_field: default_frame_field(),
            request_timeout_secs: None,
        }
    }
}
