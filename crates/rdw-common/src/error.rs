//! Error types shared by RDW crates

use thiserror::Error;

/// Result type alias for common RDW operations
pub type Result<T> = std::result::Result<T, RdwError>;

/// Errors raised while reading the environment or setting up logging
#[derive(Error, Debug)]
pub enum RdwError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidVar {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid {kind}: {value}")]
    InvalidSetting { kind: &'static str, value: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl RdwError {
    /// Create an error for an environment variable that failed to parse
    pub fn invalid_var(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidVar {
            name: name.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
