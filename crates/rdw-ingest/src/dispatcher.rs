//! Concurrency dispatcher
//!
//! Commits run as independent tokio tasks. A semaphore with one permit per
//! slot bounds how many are in flight: [`Dispatcher::schedule`] waits for a
//! free slot before spawning, and the permit travels into the task so the slot
//! is released exactly when the task ends, whether it succeeded, failed or
//! panicked.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

use crate::batch::Batch;
use crate::committer::{BatchCommitter, BatchReport};
use crate::error::{IngestError, IngestResult};
use crate::store::BatchStore;

/// Log a progress line every this many committed batches
const PROGRESS_INTERVAL: u64 = 100;

/// Running totals over finished commit tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchTotals {
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub rows_inserted: u64,
    pub rows_skipped: u64,
}

/// Everything [`Dispatcher::await_all`] learned
#[derive(Debug)]
pub struct DispatchOutcome {
    pub totals: DispatchTotals,
    /// First failure observed among the commit tasks
    pub error: Option<IngestError>,
}

pub struct Dispatcher<S> {
    committer: BatchCommitter<S>,
    slots: Arc<Semaphore>,
    capacity: usize,
    tasks: JoinSet<IngestResult<BatchReport>>,
    totals: DispatchTotals,
    first_error: Option<IngestError>,
}

impl<S: BatchStore> Dispatcher<S> {
    pub fn new(committer: BatchCommitter<S>, max_concurrent_batches: usize) -> Self {
        let capacity = max_concurrent_batches.max(1);
        Self {
            committer,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            tasks: JoinSet::new(),
            totals: DispatchTotals::default(),
            first_error: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Commit tasks currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Spawned tasks not yet reaped, finished or not
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// Whether a finished task has reported a failure
    pub fn has_failed(&self) -> bool {
        self.first_error.is_some()
    }

    /// Wait for a free slot, then commit `batch` in the background
    pub async fn schedule(&mut self, batch: Batch) -> IngestResult<()> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| IngestError::Dispatcher)?;

        let committer = self.committer.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            committer.commit(batch).await
        });

        self.reap();
        Ok(())
    }

    /// Collect results of tasks that already finished, without waiting
    pub fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.record(joined);
        }
    }

    /// Wait for every outstanding task; never cancels one
    pub async fn await_all(mut self) -> DispatchOutcome {
        while let Some(joined) = self.tasks.join_next().await {
            self.record(joined);
        }

        DispatchOutcome {
            totals: self.totals,
            error: self.first_error,
        }
    }

    fn record(&mut self, joined: Result<IngestResult<BatchReport>, JoinError>) {
        let result = joined.unwrap_or_else(|join_err| {
            Err(IngestError::TaskPanicked(join_err.to_string()))
        });

        match result {
            Ok(report) => {
                self.totals.batches_committed += 1;
                self.totals.rows_inserted += report.inserted as u64;
                self.totals.rows_skipped += report.skipped as u64;

                if self.totals.batches_committed % PROGRESS_INTERVAL == 0 {
                    info!(
                        batches = self.totals.batches_committed,
                        rows = self.totals.rows_inserted,
                        skipped = self.totals.rows_skipped,
                        "Commit progress"
                    );
                }
            }
            Err(err) => {
                error!(error = %err, "Batch failed");
                self.totals.batches_failed += 1;
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::row::{FieldValue, TypedRow};
    use crate::schema::{ColumnKind, ColumnSpec, TableSchema};
    use crate::store::MemoryStore;

    fn dispatcher(store: &Arc<MemoryStore>, slots: usize) -> Dispatcher<MemoryStore> {
        let schema =
            TableSchema::new("voertuigen", vec![ColumnSpec::new("kenteken", 0, ColumnKind::Text)])
                .unwrap();
        let committer = BatchCommitter::new(Arc::clone(store), schema.insert_statement());
        Dispatcher::new(committer, slots)
    }

    fn batch(sequence: u64, size: usize) -> Batch {
        let rows = (0..size)
            .map(|i| {
                let record = (sequence - 1) * size as u64 + i as u64 + 1;
                TypedRow::new(record, vec![FieldValue::Text(format!("K{record:05}"))])
            })
            .collect();
        Batch::new(sequence, rows)
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_slots() {
        let store = Arc::new(MemoryStore::new().with_commit_latency(Duration::from_millis(20)));
        let mut dispatcher = dispatcher(&store, 3);

        for sequence in 1..=12 {
            dispatcher.schedule(batch(sequence, 5)).await.unwrap();
            assert!(dispatcher.in_flight() <= 3);
        }
        let outcome = dispatcher.await_all().await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.totals.batches_committed, 12);
        assert_eq!(outcome.totals.rows_inserted, 60);
        assert!(store.peak_open_transactions() <= 3);
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_single_slot_serializes_commits() {
        let store = Arc::new(MemoryStore::new().with_commit_latency(Duration::from_millis(5)));
        let mut dispatcher = dispatcher(&store, 1);

        for sequence in 1..=4 {
            dispatcher.schedule(batch(sequence, 2)).await.unwrap();
        }
        dispatcher.await_all().await;

        assert_eq!(store.peak_open_transactions(), 1);
        let records: Vec<_> = store.committed_rows().iter().map(TypedRow::record).collect();
        assert_eq!(records, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failure_is_kept_and_others_still_finish() {
        let store = Arc::new(
            MemoryStore::new()
                .with_commit_latency(Duration::from_millis(5))
                .fail_commits(|row| row.record() == 3),
        );
        let mut dispatcher = dispatcher(&store, 4);

        for sequence in 1..=4 {
            dispatcher.schedule(batch(sequence, 2)).await.unwrap();
        }
        let outcome = dispatcher.await_all().await;

        assert!(matches!(outcome.error, Some(IngestError::Commit { batch: 2, .. })));
        assert_eq!(outcome.totals.batches_failed, 1);
        assert_eq!(outcome.totals.batches_committed, 3);
        assert_eq!(store.committed_count(), 6);
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_panicking_commit_releases_its_slot() {
        let store = Arc::new(MemoryStore::new().fail_commits(|row| {
            if row.record() == 1 {
                panic!("store crashed during commit");
            }
            false
        }));
        let mut dispatcher = dispatcher(&store, 1);

        dispatcher.schedule(batch(1, 2)).await.unwrap();
        // Only one slot: this waits until the panicked task has given it back
        tokio::time::timeout(Duration::from_secs(5), dispatcher.schedule(batch(2, 2)))
            .await
            .expect("slot of the panicked task was never released")
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.outstanding() > 0 {
                tokio::task::yield_now().await;
                dispatcher.reap();
            }
        })
        .await
        .unwrap();
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(dispatcher.has_failed());

        let outcome = dispatcher.await_all().await;
        assert!(matches!(outcome.error, Some(IngestError::TaskPanicked(_))));
        assert_eq!(outcome.totals.batches_failed, 1);
        assert_eq!(outcome.totals.batches_committed, 1);
        assert_eq!(store.committed_count(), 2);
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_await_all_without_batches() {
        let store = Arc::new(MemoryStore::new());
        let outcome = dispatcher(&store, 2).await_all().await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.totals, DispatchTotals::default());
    }
}
