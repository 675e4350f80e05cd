//! RDW Common Library
//!
//! Ambient plumbing shared by the RDW loader binaries.
//!
//! - **Error Handling**: [`RdwError`] and the [`Result`] alias
//! - **Environment**: typed lookups of configuration variables
//! - **Logging**: `tracing` subscriber setup with console and rotating file output
//!
//! # Example
//!
//! ```no_run
//! use rdw_common::env;
//! use rdw_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> rdw_common::Result<()> {
//!     env::load_dotenv();
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let batch_size: usize = env::parse_or("RDW_BATCH_SIZE", 2000)?;
//!     tracing::info!(batch_size, "Configured");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod env;
pub mod error;
pub mod logging;

pub use error::{RdwError, Result};
