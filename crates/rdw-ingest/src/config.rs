//! Configuration management
//!
//! Settings come from the environment (optionally through a `.env` file) and
//! can be overridden by command-line flags before validation.

use std::path::PathBuf;

use rdw_common::env;
use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};

// ============================================================================
// Defaults
// ============================================================================

/// Default source file, as published by the RDW open data portal.
pub const DEFAULT_SOURCE_PATH: &str = "rdw-full.csv";

/// Default rows per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Default number of batches committed at the same time.
pub const DEFAULT_MAX_CONCURRENT_BATCHES: usize = 100;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/rdw";

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default pool acquire timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Loader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub pipeline: PipelineConfig,
    pub database: DatabaseConfig,
}

/// Where records come from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub skip_header: bool,
    pub delimiter: u8,
    /// TOML column mapping; the built-in `voertuigen` mapping when unset
    pub schema_path: Option<PathBuf>,
}

/// Batching and concurrency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
}

/// Database connection pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SOURCE_PATH),
            skip_header: true,
            delimiter: b',',
            schema_path: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_batches: DEFAULT_MAX_CONCURRENT_BATCHES,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONCURRENT_BATCHES as u32,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: Some(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
        }
    }
}

impl IngestConfig {
    /// Load `.env`, read the environment and validate
    pub fn load() -> IngestResult<Self> {
        env::load_dotenv();
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Read the environment on top of defaults, without validating
    ///
    /// - `RDW_SOURCE_PATH`, `RDW_SKIP_HEADER`, `RDW_DELIMITER`, `RDW_SCHEMA_PATH`
    /// - `RDW_BATCH_SIZE`, `RDW_MAX_CONCURRENT_BATCHES`
    /// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `DATABASE_MIN_CONNECTIONS`,
    ///   `DATABASE_CONNECT_TIMEOUT`, `DATABASE_IDLE_TIMEOUT`
    ///
    /// When `DATABASE_MAX_CONNECTIONS` is unset the pool gets one connection
    /// per admission slot.
    pub fn from_env() -> IngestResult<Self> {
        let source = SourceConfig {
            path: env::var("RDW_SOURCE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_PATH)),
            skip_header: env::flag_or("RDW_SKIP_HEADER", true)?,
            delimiter: match env::var("RDW_DELIMITER") {
                Some(raw) => parse_delimiter(&raw)?,
                None => b',',
            },
            schema_path: env::var("RDW_SCHEMA_PATH").map(PathBuf::from),
        };

        let pipeline = PipelineConfig {
            batch_size: env::parse_or("RDW_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            max_concurrent_batches: env::parse_or(
                "RDW_MAX_CONCURRENT_BATCHES",
                DEFAULT_MAX_CONCURRENT_BATCHES,
            )?,
        };

        let pool_default = u32::try_from(pipeline.max_concurrent_batches).unwrap_or(u32::MAX);
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env::parse_or("DATABASE_MAX_CONNECTIONS", pool_default)?,
            min_connections: env::parse_or(
                "DATABASE_MIN_CONNECTIONS",
                DEFAULT_DATABASE_MIN_CONNECTIONS,
            )?,
            connect_timeout_secs: env::parse_or(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            )?,
            idle_timeout_secs: Some(env::parse_or(
                "DATABASE_IDLE_TIMEOUT",
                DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            )?),
        };

        Ok(Self {
            source,
            pipeline,
            database,
        })
    }

    pub fn validate(&self) -> IngestResult<()> {
        if self.pipeline.batch_size == 0 {
            return Err(IngestError::Config("batch size must be greater than 0".into()));
        }

        if self.pipeline.max_concurrent_batches == 0 {
            return Err(IngestError::Config(
                "max concurrent batches must be greater than 0".into(),
            ));
        }

        if self.database.url.is_empty() {
            return Err(IngestError::Config("database URL cannot be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "database max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(IngestError::Config(format!(
                "database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        // Slots beyond the pool size would queue on the pool instead of on admission.
        if (self.database.max_connections as usize) < self.pipeline.max_concurrent_batches {
            return Err(IngestError::Config(format!(
                "database max_connections ({}) must be at least max concurrent batches ({})",
                self.database.max_connections, self.pipeline.max_concurrent_batches
            )));
        }

        Ok(())
    }
}

/// Accepts a single ASCII character, or `tab` / `\t`
pub fn parse_delimiter(raw: &str) -> IngestResult<u8> {
    match raw {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        _ if raw.len() == 1 && raw.is_ascii() => Ok(raw.as_bytes()[0]),
        _ => Err(IngestError::Config(format!(
            "delimiter must be a single ASCII character, got '{raw}'"
        ))),
    }
}
