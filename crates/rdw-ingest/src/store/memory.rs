//! In-memory store
//!
//! Backs `--dry-run` (decode and batch the whole file without a database) and
//! the pipeline tests. It keeps counters of open transactions so concurrency
//! limits can be checked, and accepts rules that reject individual inserts,
//! break a transaction midway or fail whole commits.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{BatchStore, StoreTransaction};
use crate::error::StoreError;
use crate::row::TypedRow;
use crate::schema::InsertStatement;

type RowRule = Arc<dyn Fn(&TypedRow) -> bool + Send + Sync>;

#[derive(Default)]
struct Counters {
    open: AtomicUsize,
    peak_open: AtomicUsize,
    begun: AtomicU64,
    committed_rows: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

pub struct MemoryStore {
    counters: Arc<Counters>,
    rows: Arc<Mutex<Vec<TypedRow>>>,
    retain_rows: bool,
    commit_latency: Option<Duration>,
    reject_insert: Option<RowRule>,
    abort_on: Option<RowRule>,
    fail_commit: Option<RowRule>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that keeps every committed row
    pub fn new() -> Self {
        Self {
            counters: Arc::default(),
            rows: Arc::default(),
            retain_rows: true,
            commit_latency: None,
            reject_insert: None,
            abort_on: None,
            fail_commit: None,
        }
    }

    /// A store that only counts committed rows
    pub fn counting() -> Self {
        Self {
            retain_rows: false,
            ..Self::new()
        }
    }

    /// Hold each transaction open this long before committing
    pub fn with_commit_latency(mut self, latency: Duration) -> Self {
        self.commit_latency = Some(latency);
        self
    }

    /// Fail the insert of every row matching `rule`
    pub fn reject_inserts<F>(mut self, rule: F) -> Self
    where
        F: Fn(&TypedRow) -> bool + Send + Sync + 'static,
    {
        self.reject_insert = Some(Arc::new(rule));
        self
    }

    /// Break the transaction at every row matching `rule`, the way a failed
    /// savepoint step leaves a PostgreSQL transaction aborted
    pub fn abort_transactions<F>(mut self, rule: F) -> Self
    where
        F: Fn(&TypedRow) -> bool + Send + Sync + 'static,
    {
        self.abort_on = Some(Arc::new(rule));
        self
    }

    /// Fail the commit of every transaction holding a row matching `rule`
    pub fn fail_commits<F>(mut self, rule: F) -> Self
    where
        F: Fn(&TypedRow) -> bool + Send + Sync + 'static,
    {
        self.fail_commit = Some(Arc::new(rule));
        self
    }

    /// Committed rows in commit order (empty for a counting store)
    pub fn committed_rows(&self) -> Vec<TypedRow> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn committed_count(&self) -> u64 {
        self.counters.committed_rows.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }

    pub fn transactions_begun(&self) -> u64 {
        self.counters.begun.load(Ordering::SeqCst)
    }

    /// Transactions currently open
    pub fn open_transactions(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Most transactions that were ever open at the same time
    pub fn peak_open_transactions(&self) -> usize {
        self.counters.peak_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_open.fetch_max(open, Ordering::SeqCst);
        self.counters.begun.fetch_add(1, Ordering::SeqCst);

        Ok(MemoryTransaction {
            counters: Arc::clone(&self.counters),
            rows: self.retain_rows.then(|| Arc::clone(&self.rows)),
            staged: Vec::new(),
            finished: false,
            aborted: false,
            commit_latency: self.commit_latency,
            reject_insert: self.reject_insert.clone(),
            abort_on: self.abort_on.clone(),
            fail_commit: self.fail_commit.clone(),
        })
    }
}

pub struct MemoryTransaction {
    counters: Arc<Counters>,
    rows: Option<Arc<Mutex<Vec<TypedRow>>>>,
    staged: Vec<TypedRow>,
    finished: bool,
    aborted: bool,
    commit_latency: Option<Duration>,
    reject_insert: Option<RowRule>,
    abort_on: Option<RowRule>,
    fail_commit: Option<RowRule>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn execute(
        &mut self,
        statement: &InsertStatement,
        row: &TypedRow,
    ) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        if self.aborted || self.abort_on.as_ref().is_some_and(|rule| rule(row)) {
            self.aborted = true;
            return Err(StoreError::Savepoint(sqlx::Error::Protocol(format!(
                "transaction aborted at record {}",
                row.record()
            ))));
        }
        if row.values().len() != statement.parameters() {
            return Err(StoreError::rejected(format!(
                "row has {} values, statement expects {}",
                row.values().len(),
                statement.parameters()
            )));
        }
        if self.reject_insert.as_ref().is_some_and(|rule| rule(row)) {
            return Err(StoreError::rejected(format!(
                "insert of record {} rejected",
                row.record()
            )));
        }

        self.staged.push(row.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        if let Some(latency) = self.commit_latency {
            tokio::time::sleep(latency).await;
        }
        // COMMIT of an aborted transaction rolls it back without an error
        if self.aborted {
            return self.rollback().await;
        }
        if let Some(rule) = &self.fail_commit {
            if self.staged.iter().any(|row| rule(row)) {
                return Err(StoreError::rejected("commit rejected"));
            }
        }

        self.finished = true;
        let staged = std::mem::take(&mut self.staged);
        self.counters
            .committed_rows
            .fetch_add(staged.len() as u64, Ordering::SeqCst);
        self.counters.commits.fetch_add(1, Ordering::SeqCst);

        if let Some(rows) = &self.rows {
            rows.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(staged);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.finished {
            self.finished = true;
            self.staged.clear();
            self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
    }
}
