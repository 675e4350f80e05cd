//! Batch accumulation
//!
//! Rows are buffered into batches of a fixed size. A full batch is handed off
//! by value as soon as it fills; the last, possibly short, batch is handed off
//! by [`BatchAccumulator::flush`]. No row is ever left behind.

use crate::row::TypedRow;

/// An ordered group of rows committed in one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    sequence: u64,
    rows: Vec<TypedRow>,
}

impl Batch {
    pub fn new(sequence: u64, rows: Vec<TypedRow>) -> Self {
        Self { sequence, rows }
    }

    /// 1-based position of this batch in the run
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn rows(&self) -> &[TypedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Source record numbers covered by this batch
    pub fn record_span(&self) -> Option<(u64, u64)> {
        match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => Some((first.record(), last.record())),
            _ => None,
        }
    }
}

/// Buffers rows until a batch is full
#[derive(Debug)]
pub struct BatchAccumulator {
    batch_size: usize,
    open: Vec<TypedRow>,
    next_sequence: u64,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            open: Vec::with_capacity(batch_size),
            next_sequence: 1,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Rows waiting in the open batch
    pub fn pending(&self) -> usize {
        self.open.len()
    }

    /// Add a row; returns the batch it completed, if any
    pub fn append(&mut self, row: TypedRow) -> Option<Batch> {
        self.open.push(row);
        if self.open.len() >= self.batch_size {
            self.take()
        } else {
            None
        }
    }

    /// Hand off whatever is buffered, however few rows that is
    pub fn flush(&mut self) -> Option<Batch> {
        if self.open.is_empty() {
            None
        } else {
            self.take()
        }
    }

    fn take(&mut self) -> Option<Batch> {
        let rows = std::mem::replace(&mut self.open, Vec::with_capacity(self.batch_size));
        let batch = Batch::new(self.next_sequence, rows);
        self.next_sequence += 1;
        Some(batch)
    }
}
