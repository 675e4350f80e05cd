//! Pipeline orchestration
//!
//! A single producer reads records in source order, decodes them and fills
//! batches; the [`Dispatcher`] commits full batches concurrently. The run
//! moves through `Idle -> Streaming -> Draining -> Done`:
//!
//! - **Streaming** ends at end of input or at the first fatal error, whether
//!   the producer hit it (read or decode) or a finished commit task reported it.
//! - **Draining** hands off the rows already decoded, then waits for every
//!   commit task. Nothing in flight is cancelled.
//! - **Done** builds the [`RunReport`] with the first fatal error: a commit
//!   failure already finished when the producer stopped, else the producer's
//!   own error, else the first commit failure observed while draining.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::{debug, error, info};

use crate::batch::BatchAccumulator;
use crate::committer::BatchCommitter;
use crate::config::{IngestConfig, PipelineConfig};
use crate::decoder::RecordDecoder;
use crate::dispatcher::{DispatchTotals, Dispatcher};
use crate::error::IngestError;
use crate::schema::TableSchema;
use crate::source::CsvSource;
use crate::store::{BatchStore, MemoryStore, PgStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Streaming,
    Draining,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Streaming => "streaming",
            PipelineState::Draining => "draining",
            PipelineState::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    /// The first fatal error of the run
    Aborted(IngestError),
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub records_read: u64,
    pub rows_committed: u64,
    pub rows_skipped: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub elapsed: Duration,
}

/// Serializable form of a [`RunReport`], written by `--report`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub records_read: u64,
    pub rows_committed: u64,
    pub rows_skipped: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub elapsed_secs: f64,
}

impl RunReport {
    /// A run that ended before any record was read
    pub fn aborted(error: IngestError, elapsed: Duration) -> Self {
        Self {
            outcome: RunOutcome::Aborted(error),
            records_read: 0,
            rows_committed: 0,
            rows_skipped: 0,
            batches_committed: 0,
            batches_failed: 0,
            elapsed,
        }
    }

    fn from_totals(
        error: Option<IngestError>,
        records_read: u64,
        totals: DispatchTotals,
        elapsed: Duration,
    ) -> Self {
        Self {
            outcome: match error {
                Some(err) => RunOutcome::Aborted(err),
                None => RunOutcome::Completed,
            },
            records_read,
            rows_committed: totals.rows_inserted,
            rows_skipped: totals.rows_skipped,
            batches_committed: totals.batches_committed,
            batches_failed: totals.batches_failed,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }

    pub fn error(&self) -> Option<&IngestError> {
        match &self.outcome {
            RunOutcome::Completed => None,
            RunOutcome::Aborted(err) => Some(err),
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            outcome: if self.is_success() { "completed" } else { "aborted" },
            error: self.error().map(ToString::to_string),
            records_read: self.records_read,
            rows_committed: self.rows_committed,
            rows_skipped: self.rows_skipped,
            batches_committed: self.batches_committed,
            batches_failed: self.batches_failed,
            elapsed_secs: self.elapsed.as_secs_f64(),
        }
    }

    /// Emit the completion report
    pub fn log(&self) {
        let elapsed_secs = self.elapsed.as_secs_f64();
        match &self.outcome {
            RunOutcome::Completed => info!(
                records = self.records_read,
                committed = self.rows_committed,
                skipped = self.rows_skipped,
                batches = self.batches_committed,
                elapsed_secs,
                "Ingestion completed"
            ),
            RunOutcome::Aborted(err) => error!(
                error = %err,
                records = self.records_read,
                committed = self.rows_committed,
                skipped = self.rows_skipped,
                batches = self.batches_committed,
                failed_batches = self.batches_failed,
                elapsed_secs,
                "Ingestion aborted"
            ),
        }
    }
}

/// Streams one source into one store
pub struct Pipeline<S> {
    store: Arc<S>,
    schema: Arc<TableSchema>,
    config: PipelineConfig,
    progress: ProgressBar,
    state: PipelineState,
}

impl<S: BatchStore> Pipeline<S> {
    pub fn new(store: Arc<S>, schema: Arc<TableSchema>, config: PipelineConfig) -> Self {
        Self {
            store,
            schema,
            config,
            progress: ProgressBar::hidden(),
            state: PipelineState::Idle,
        }
    }

    /// Tick `progress` once per record read
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }

    pub async fn run<R>(mut self, mut source: CsvSource<R>) -> RunReport
    where
        R: AsyncRead + Unpin + Send,
    {
        let started = Instant::now();
        self.transition(PipelineState::Streaming);

        let decoder = RecordDecoder::new(Arc::clone(&self.schema));
        let statement = self.schema.insert_statement();
        let committer = BatchCommitter::new(Arc::clone(&self.store), statement);
        let mut dispatcher = Dispatcher::new(committer, self.config.max_concurrent_batches);
        let mut accumulator = BatchAccumulator::new(self.config.batch_size);

        info!(
            table = %self.schema.table,
            batch_size = accumulator.batch_size(),
            max_concurrent_batches = dispatcher.capacity(),
            "Streaming records"
        );

        let mut stopped_by = self
            .stream(&mut source, &decoder, &mut accumulator, &mut dispatcher)
            .await;
        if let Some(err) = &stopped_by {
            error!(error = %err, record = source.records_read(), "Stopped reading");
        }

        // A commit failure that finished before the producer stopped came first
        dispatcher.reap();
        if dispatcher.has_failed() {
            stopped_by = None;
        }

        self.transition(PipelineState::Draining);
        if let Some(batch) = accumulator.flush() {
            if let Err(err) = dispatcher.schedule(batch).await {
                stopped_by.get_or_insert(err);
            }
        }
        debug!(outstanding = dispatcher.outstanding(), "Waiting for commit tasks");
        let drained = dispatcher.await_all().await;

        self.transition(PipelineState::Done);
        self.progress.finish();

        RunReport::from_totals(
            stopped_by.or(drained.error),
            source.records_read(),
            drained.totals,
            started.elapsed(),
        )
    }

    /// Read until end of input or the first fatal error. Returns the error
    /// only when the producer hit it; a failed commit task just stops the loop.
    async fn stream<R>(
        &self,
        source: &mut CsvSource<R>,
        decoder: &RecordDecoder,
        accumulator: &mut BatchAccumulator,
        dispatcher: &mut Dispatcher<S>,
    ) -> Option<IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        loop {
            if dispatcher.has_failed() {
                return None;
            }

            let record = match source.next_record().await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(records = source.records_read(), "End of input");
                    return None;
                }
                Err(err) => return Some(err),
            };
            self.progress.inc(1);

            let row = match decoder.decode(&record) {
                Ok(row) => row,
                Err(err) => return Some(err),
            };

            if let Some(batch) = accumulator.append(row) {
                if let Err(err) = dispatcher.schedule(batch).await {
                    return Some(err);
                }
            }
        }
    }
}

/// Load the configured file into PostgreSQL
pub async fn ingest(
    config: &IngestConfig,
    schema: TableSchema,
    progress: ProgressBar,
) -> RunReport {
    let started = Instant::now();

    let source = match CsvSource::open(&config.source).await {
        Ok(source) => source,
        Err(err) => return RunReport::aborted(err, started.elapsed()),
    };

    let store = match PgStore::connect(&config.database).await {
        Ok(store) => Arc::new(store),
        Err(err) => return RunReport::aborted(IngestError::Connect(err), started.elapsed()),
    };

    let pipeline = Pipeline::new(Arc::clone(&store), Arc::new(schema), config.pipeline.clone());
    let mut report = pipeline
        .with_progress(progress)
        .run(source)
        .await;

    store.close().await;
    report.elapsed = started.elapsed();
    report
}

/// Read, decode and batch the configured file without a database
pub async fn dry_run(
    config: &IngestConfig,
    schema: TableSchema,
    progress: ProgressBar,
) -> RunReport {
    let started = Instant::now();

    let source = match CsvSource::open(&config.source).await {
        Ok(source) => source,
        Err(err) => return RunReport::aborted(err, started.elapsed()),
    };

    let mut report = Pipeline::new(
        Arc::new(MemoryStore::counting()),
        Arc::new(schema),
        config.pipeline.clone(),
    )
    .with_progress(progress)
    .run(source)
    .await;

    report.elapsed = started.elapsed();
    report
}
