//! Error types for the ingestion pipeline
//!
//! Every failure is classified by [`Severity`]. Row-local failures are logged
//! and absorbed where they happen; fatal ones end the run, but only after the
//! batches already in flight have finished.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type IngestResult<T> = Result<T, IngestError>;

/// How far a failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Ends the run after draining in-flight batches
    Fatal,
    /// Affects a single row; the batch carries on
    RowLocal,
}

/// Failure reported by a [`crate::store::BatchStore`] implementation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("transaction already finished")]
    Finished,

    /// A savepoint step failed; the transaction can no longer be trusted
    #[error("savepoint failed: {0}")]
    Savepoint(#[source] sqlx::Error),

    #[error("{0}")]
    Rejected(String),
}

impl StoreError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Whether the transaction is unusable after this error, so that no
    /// further row of the batch may be attempted
    pub fn aborts_transaction(&self) -> bool {
        matches!(self, StoreError::Savepoint(_) | StoreError::Finished)
    }
}

/// Pipeline error
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Env(#[from] rdw_common::RdwError),

    #[error("Invalid schema: {0}")]
    Schema(String),

    #[error("Failed to open source {path}: {source}")]
    SourceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read record {record}: {source}")]
    SourceRead {
        record: u64,
        #[source]
        source: csv_async::Error,
    },

    #[error("Failed to connect to the store: {0}")]
    Connect(#[source] StoreError),

    #[error("Record {record}: column '{column}' has malformed date '{value}' (expected YYYYMMDD)")]
    MalformedDate {
        record: u64,
        column: String,
        value: String,
    },

    #[error(
        "Record {record}: column '{column}' has malformed timestamp '{value}' \
         (expected YYYY-MM-DDTHH:MM:SS.mmm)"
    )]
    MalformedTimestamp {
        record: u64,
        column: String,
        value: String,
    },

    #[error("Record {record} has {actual} columns, schema needs at least {expected}")]
    ShortRecord {
        record: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Batch {batch}: failed to begin transaction: {source}")]
    Begin {
        batch: u64,
        #[source]
        source: StoreError,
    },

    #[error("Batch {batch}: insert of record {record} failed: {source}")]
    Insert {
        batch: u64,
        record: u64,
        #[source]
        source: StoreError,
    },

    #[error("Batch {batch}: transaction broken at record {record}, rolled back: {source}")]
    Transaction {
        batch: u64,
        record: u64,
        #[source]
        source: StoreError,
    },

    #[error("Batch {batch}: commit failed, transaction rolled back: {source}")]
    Commit {
        batch: u64,
        #[source]
        source: StoreError,
    },

    #[error("Commit task panicked: {0}")]
    TaskPanicked(String),

    #[error("Admission semaphore closed")]
    Dispatcher,
}

impl IngestError {
    pub fn severity(&self) -> Severity {
        match self {
            IngestError::Insert { .. } => Severity::RowLocal,
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
