//! Typed access to environment variables
//!
//! Every loader setting can come from the process environment or a `.env`
//! file in the working directory. Unset and empty variables are treated the
//! same way; a variable that is set but does not parse is an error rather
//! than a silent fallback.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{RdwError, Result};

/// Load a `.env` file from the working directory, if there is one.
///
/// A missing file is normal in production, so it is only noted at debug level.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(err) => tracing::debug!(error = %err, "No .env file loaded"),
    }
}

/// Read a variable, treating unset and blank values as absent
pub fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a variable into `T`, returning `None` when it is not set
pub fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|err| RdwError::invalid_var(name, raw, err)),
        None => Ok(None),
    }
}

/// Parse a variable into `T`, falling back to `default` when it is not set
pub fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_var(name)?.unwrap_or(default))
}

/// Read a boolean flag. Accepts `true/false`, `yes/no`, `on/off` and `1/0`.
pub fn flag_or(name: &str, default: bool) -> Result<bool> {
    let Some(raw) = var(name) else {
        return Ok(default);
    };

    match raw.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(RdwError::invalid_var(name, raw, "expected a boolean")),
    }
}
