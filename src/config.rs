use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::datastore::Envelope;
use crate::sql_builder::{is_plain_identifier, DEFAULT_ALIAS_PREFIX};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Engine configuration with validation
#[derive(Clone, Debug, Validate, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of generated table aliases (`X1`, `X2`, ...)
    #[validate(custom(function = "validate_alias_prefix"))]
    pub alias_prefix: String,

    /// Result limit applied when a query does not set one
    #[validate(range(min = 1, message = "Default max features must be at least 1"))]
    pub default_max_features: usize,

    /// Coordinate system assumed for envelopes that carry none
    #[validate(length(min = 1, message = "Default SRS cannot be empty"))]
    pub default_srs: String,

    /// Box bound to the query bounding box variable when the filter has none
    #[validate(custom(function = "validate_bbox"))]
    pub fallback_bbox: [f64; 4],

    /// Name of the synthetic envelope property added to features
    #[validate(length(min = 1, message = "Envelope property name cannot be empty"))]
    pub envelope_property_name: String,

    /// Transform function template (`$1` geometry, `$2` SRS code), if the backend has one
    pub transform_function: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alias_prefix: DEFAULT_ALIAS_PREFIX.to_string(),
            default_max_features: 1000,
            default_srs: "EPSG:4326".to_string(),
            fallback_bbox: [0.0, 0.0, 0.0, 0.0],
            envelope_property_name: "boundedBy".to_string(),
            transform_function: None,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            alias_prefix: env::var("FEATURESTORE_ALIAS_PREFIX")
                .unwrap_or_else(|_| DEFAULT_ALIAS_PREFIX.to_string()),
            default_max_features: parse_env_var("FEATURESTORE_MAX_FEATURES", "1000")?,
            default_srs: env::var("FEATURESTORE_DEFAULT_SRS")
                .unwrap_or_else(|_| "EPSG:4326".to_string()),
            fallback_bbox: parse_bbox_env_var("FEATURESTORE_FALLBACK_BBOX", "0,0,0,0")?,
            envelope_property_name: env::var("FEATURESTORE_ENVELOPE_PROPERTY")
                .unwrap_or_else(|_| "boundedBy".to_string()),
            transform_function: env::var("FEATURESTORE_TRANSFORM_FUNCTION").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn fallback_envelope(&self) -> Envelope {
        let [min_x, min_y, max_x, max_y] = self.fallback_bbox;
        Envelope::new(min_x, min_y, max_x, max_y).with_srs(self.default_srs.clone())
    }
}

fn validate_alias_prefix(prefix: &str) -> Result<(), ValidationError> {
    if is_plain_identifier(prefix) {
        Ok(())
    } else {
        Err(ValidationError::new("alias_prefix")
            .with_message("Alias prefix must be a plain SQL identifier".into()))
    }
}

fn validate_bbox(bbox: &[f64; 4]) -> Result<(), ValidationError> {
    let [min_x, min_y, max_x, max_y] = *bbox;
    if min_x <= max_x && min_y <= max_y {
        Ok(())
    } else {
        Err(ValidationError::new("fallback_bbox")
            .with_message("Fallback bbox minimum must not exceed its maximum".into()))
    }
}

/// Parse an environment variable with a default value
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}

/// Parse `minx,miny,maxx,maxy` from an environment variable
fn parse_bbox_env_var(key: &str, default: &str) -> Result<[f64; 4], ConfigError> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    let ordinates = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Parse {
            field: key.to_string(),
            value: value.clone(),
            source: Box::new(e),
        })?;
    <[f64; 4]>::try_from(ordinates).map_err(|parsed| ConfigError::Parse {
        field: key.to_string(),
        value: value.clone(),
        source: format!("expected 4 ordinates, got {}", parsed.len()).into(),
    })
}
