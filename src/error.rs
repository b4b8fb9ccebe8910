//! Error types for Warden.
//!
//! Only construction and configuration can fail. Admission checks always
//! produce a decision.

use thiserror::Error;

/// Main error type for Warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rule definition that can never be enforced
    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule {
        /// Name of the offending rule
        rule: String,
        /// What is wrong with it
        reason: String,
    },

    /// Layered configuration source errors
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    /// YAML parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    pub(crate) fn invalid_rule(rule: &str, reason: impl Into<String>) -> Self {
        WardenError::InvalidRule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
