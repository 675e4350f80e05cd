//! Transactional row store
//!
//! The pipeline only needs four things from a store: open a transaction,
//! run the insert for one row, commit, roll back. Dropping a transaction
//! without committing must release it and discard its rows, so a task that
//! fails or panics midway never leaks a connection.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::row::TypedRow;
use crate::schema::InsertStatement;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait BatchStore: Send + Sync + 'static {
    type Transaction: StoreTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError>;
}

#[async_trait]
pub trait StoreTransaction: Send + 'static {
    /// Insert one row. A failure here leaves the transaction usable.
    async fn execute(
        &mut self,
        statement: &InsertStatement,
        row: &TypedRow,
    ) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard the transaction. A no-op when it has already ended.
    async fn rollback(&mut self) -> Result<(), StoreError>;
}
