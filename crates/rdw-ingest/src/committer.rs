//! Batch committer
//!
//! One batch, one transaction. Rows whose insert fails are logged and skipped;
//! the rest of the batch still commits. A failed begin or commit fails the
//! whole batch, and so does a store error that leaves the transaction
//! unusable.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::error::{IngestError, IngestResult};
use crate::schema::InsertStatement;
use crate::store::{BatchStore, StoreTransaction};

/// Outcome of a committed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub sequence: u64,
    pub inserted: usize,
    pub skipped: usize,
}

pub struct BatchCommitter<S> {
    store: Arc<S>,
    statement: Arc<InsertStatement>,
}

impl<S> Clone for BatchCommitter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            statement: Arc::clone(&self.statement),
        }
    }
}

impl<S: BatchStore> BatchCommitter<S> {
    pub fn new(store: Arc<S>, statement: InsertStatement) -> Self {
        Self {
            store,
            statement: Arc::new(statement),
        }
    }

    #[tracing::instrument(
        skip(self, batch),
        fields(batch = batch.sequence(), rows = batch.len())
    )]
    pub async fn commit(&self, batch: Batch) -> IngestResult<BatchReport> {
        let sequence = batch.sequence();
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|source| IngestError::Begin {
                batch: sequence,
                source,
            })?;

        let mut report = BatchReport {
            sequence,
            inserted: 0,
            skipped: 0,
        };

        for row in batch.rows() {
            match tx.execute(&self.statement, row).await {
                Ok(()) => report.inserted += 1,
                Err(source) if source.aborts_transaction() => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "Rollback of broken transaction failed");
                    }
                    return Err(IngestError::Transaction {
                        batch: sequence,
                        record: row.record(),
                        source,
                    });
                }
                Err(source) => {
                    let err = IngestError::Insert {
                        batch: sequence,
                        record: row.record(),
                        source,
                    };
                    warn!(record = row.record(), error = %err, "Row skipped");
                    report.skipped += 1;
                }
            }
        }

        if let Err(source) = tx.commit().await {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback after failed commit also failed");
            }
            return Err(IngestError::Commit {
                batch: sequence,
                source,
            });
        }

        debug!(
            inserted = report.inserted,
            skipped = report.skipped,
            "Batch committed"
        );
        Ok(report)
    }
}
