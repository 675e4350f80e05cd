//! RDW Ingest Library
//!
//! Bulk loader for the RDW (Dutch vehicle authority) open data export. A CSV
//! file is streamed record by record, every record is decoded into a typed row
//! through a [`schema::TableSchema`], rows are grouped into fixed-size batches
//! and each batch is committed in its own transaction, with a bounded number
//! of batches in flight at once.
//!
//! # Modules
//!
//! - [`convert`]: field conversion (compact dates, timestamps, numbers)
//! - [`decoder`]: raw record to typed row
//! - [`batch`]: batch accumulation
//! - [`dispatcher`]: bounded concurrent commit tasks
//! - [`committer`]: one batch, one transaction
//! - [`pipeline`]: orchestration and the run report
//! - [`store`]: transactional store trait, PostgreSQL and in-memory backends
//!
//! # Example
//!
//! ```no_run
//! use rdw_ingest::config::IngestConfig;
//! use rdw_ingest::pipeline;
//! use rdw_ingest::schema::TableSchema;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let progress = indicatif::ProgressBar::hidden();
//!     let report = pipeline::ingest(&config, TableSchema::voertuigen(), progress).await;
//!     report.log();
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod committer;
pub mod config;
pub mod convert;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod row;
pub mod schema;
pub mod source;
pub mod store;

pub use error::{IngestError, IngestResult, Severity};
pub use pipeline::{Pipeline, RunOutcome, RunReport};
