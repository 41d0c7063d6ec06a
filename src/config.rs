//! Configuration for response governance
//!
//! Values come from built-in defaults, an optional TOML file, a `.env` file and
//! `GOVERNOR_*` environment variables, in increasing order of precedence.

use crate::error::{GovernanceError, Result};
use config::{Config, Environment, File, FileFormat};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default config file name, looked up relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "governor";

/// Prefix for environment overrides (`GOVERNOR_TOKEN_THRESHOLD`, ...)
pub const ENV_PREFIX: &str = "GOVERNOR";

/// Token estimation backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// Character heuristic (chars / 4, +20%)
    #[default]
    Heuristic,
    /// cl100k BPE tokenizer, +20%
    Cl100k,
}

/// Essential field list for one response type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProfile {
    /// Ordered essential fields
    pub fields: Vec<String>,

    /// Primary identifier, always projected
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Endpoint that serves the full object; defaults to the type name
    #[serde(default)]
    pub details_endpoint: Option<String>,
}

impl FieldProfile {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            id_field: default_id_field(),
            details_endpoint: None,
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_details_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.details_endpoint = Some(endpoint.into());
        self
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Response governor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GovernorConfig {
    /// Soft token limit
    #[serde(default = "default_token_threshold")]
    pub token_threshold: usize,

    /// Absolute token limit
    #[serde(default = "default_token_hard_cap")]
    pub token_hard_cap: usize,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Larger page requests are clamped to this
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    #[serde(default = "default_cursor_ttl")]
    pub cursor_ttl_seconds: u64,

    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// How far back from the byte limit a chunk boundary may be; half the chunk when unset
    #[serde(default)]
    pub chunk_lookback_bytes: Option<usize>,

    /// Scalar fields kept for types without a field profile
    #[serde(default = "default_fallback_field_count")]
    pub fallback_field_count: usize,

    #[serde(default)]
    pub estimator: EstimatorKind,

    /// HMAC key for cursors; a per-process random key is used when unset
    #[serde(default)]
    pub cursor_secret: Option<SecretString>,

    /// Keys still accepted for verification while rotating
    #[serde(default)]
    pub previous_cursor_secrets: Vec<SecretString>,

    #[serde(default = "default_telemetry_capacity")]
    pub telemetry_channel_capacity: usize,

    /// Type name -> essential fields
    #[serde(default)]
    pub essential_fields: HashMap<String, FieldProfile>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_id_field() -> String { "id".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_token_threshold() -> usize { 4000 }
fn default_token_hard_cap() -> usize { 12000 }
fn default_page_size() -> usize { 50 }
fn default_max_page_size() -> usize { 200 }
fn default_cursor_ttl() -> u64 { 600 }
fn default_max_chunk_bytes() -> usize { 12000 }
fn default_fallback_field_count() -> usize { 8 }
fn default_telemetry_capacity() -> usize { 1024 }

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            token_threshold: default_token_threshold(),
            token_hard_cap: default_token_hard_cap(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            cursor_ttl_seconds: default_cursor_ttl(),
            max_chunk_bytes: default_max_chunk_bytes(),
            chunk_lookback_bytes: None,
            fallback_field_count: default_fallback_field_count(),
            estimator: EstimatorKind::default(),
            cursor_secret: None,
            previous_cursor_secrets: Vec::new(),
            telemetry_channel_capacity: default_telemetry_capacity(),
            essential_fields: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GovernorConfig {
    /// Load configuration from an optional file plus `.env` and `GOVERNOR_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Self = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text, without consulting the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check that limits are consistent
    pub fn validate(&self) -> Result<()> {
        if self.token_threshold == 0 {
            return Err(GovernanceError::Configuration(
                "token_threshold must be positive".to_string(),
            ));
        }
        if self.token_hard_cap < self.token_threshold {
            return Err(GovernanceError::Configuration(format!(
                "token_hard_cap ({}) must be >= token_threshold ({})",
                self.token_hard_cap, self.token_threshold
            )));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(GovernanceError::Configuration(format!(
                "default_page_size ({}) must be in 1..={}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.max_chunk_bytes == 0 {
            return Err(GovernanceError::Configuration(
                "max_chunk_bytes must be positive".to_string(),
            ));
        }
        if self.cursor_ttl_seconds == 0 {
            return Err(GovernanceError::Configuration(
                "cursor_ttl_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Cursor TTL as Duration
    pub fn cursor_ttl(&self) -> Duration {
        Duration::from_secs(self.cursor_ttl_seconds)
    }

    /// Effective boundary lookback for the chunker
    pub fn chunk_lookback(&self) -> usize {
        self.chunk_lookback_bytes
            .unwrap_or(self.max_chunk_bytes / 2)
            .clamp(1, self.max_chunk_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_config() {
        let config = GovernorConfig::default();
        assert_eq!(config.token_threshold, 4000);
        assert_eq!(config.token_hard_cap, 12000);
        assert_eq!(config.cursor_ttl_seconds, 600);
        assert_eq!(config.estimator, EstimatorKind::Heuristic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hard_cap_below_threshold_rejected() {
        let config = GovernorConfig {
            token_threshold: 5000,
            token_hard_cap: 4000,
            ..GovernorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GovernanceError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_toml_with_field_profiles() {
        let config = GovernorConfig::from_toml_str(
            r#"
            token_threshold = 2000
            token_hard_cap = 6000
            max_page_size = 100
            cursor_secret = "s3cret"
            estimator = "cl100k"

            [essential_fields.property]
            fields = ["name", "address", "status"]
            details_endpoint = "/api/v1/properties"

            [essential_fields.tenant]
            fields = ["full_name"]
            id_field = "tenant_id"

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.token_threshold, 2000);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.estimator, EstimatorKind::Cl100k);
        assert_eq!(
            config.cursor_secret.as_ref().map(|s| s.expose_secret().as_str()),
            Some("s3cret")
        );

        let property = &config.essential_fields["property"];
        assert_eq!(property.fields, vec!["name", "address", "status"]);
        assert_eq!(property.id_field, "id");
        assert_eq!(property.details_endpoint.as_deref(), Some("/api/v1/properties"));
        assert_eq!(config.essential_fields["tenant"].id_field, "tenant_id");
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_toml_values_rejected() {
        let result = GovernorConfig::from_toml_str("default_page_size = 500\nmax_page_size = 100");
        assert!(result.is_err());
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let config = GovernorConfig::from_toml_str(r#"cursor_secret = "do-not-print""#).unwrap();
        assert!(!format!("{:?}", config).contains("do-not-print"));
    }

    #[test]
    fn test_chunk_lookback_defaults_to_half() {
        let config = GovernorConfig::default();
        assert_eq!(config.chunk_lookback(), 6000);

        let config = GovernorConfig {
            chunk_lookback_bytes: Some(50_000),
            ..GovernorConfig::default()
        };
        assert_eq!(config.chunk_lookback(), 12000);
    }

    #[test]
    fn test_duration_conversions() {
        let config = GovernorConfig::default();
        assert_eq!(config.cursor_ttl(), Duration::from_secs(600));
    }
}
