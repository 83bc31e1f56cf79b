//! Input parameters of [`CibFeMethod`](crate::method::CibFeMethod).
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CibFeConfig {
    /// Name used to identify the method in error messages and restart records.
    pub object_name: String,
    /// Polynomial degree integrated exactly by the element quadrature rules.
    #[serde(default = "default_quadrature_order")]
    pub quadrature_order: usize,
    /// Relative tolerance used when matching a requested time against the step window.
    #[serde(default = "default_time_epsilon")]
    pub time_epsilon: f64,
}

fn default_quadrature_order() -> usize {
    5
}

fn default_time_epsilon() -> f64 {
    1e-12
}

/// The highest quadrature order supported by the element rules.
pub const MAX_QUADRATURE_ORDER: usize = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The input could not be parsed, e.g. because a required key is missing.
    Parse(String),
    InvalidValue { key: &'static str, reason: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(message) => write!(f, "Failed to parse input database: {message}"),
            ConfigError::InvalidValue { key, reason } => write!(f, "Invalid value for key `{key}`: {reason}"),
        }
    }
}

impl Error for ConfigError {}

impl CibFeConfig {
    /// A configuration with default values for everything except the object name.
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            quadrature_order: default_quadrature_order(),
            time_epsilon: default_time_epsilon(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.object_name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "object_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.quadrature_order > MAX_QUADRATURE_ORDER {
            return Err(ConfigError::InvalidValue {
                key: "quadrature_order",
                reason: format!(
                    "order {} exceeds the maximum supported order {}",
                    self.quadrature_order, MAX_QUADRATURE_ORDER
                ),
            });
        }
        if !(self.time_epsilon > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "time_epsilon",
                reason: format!("must be positive, got {}", self.time_epsilon),
            });
        }
        Ok(())
    }
}
