//! PostgreSQL store backed by a sqlx connection pool

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{Postgres, Transaction};
use tracing::info;

use super::{BatchStore, StoreTransaction};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::row::{FieldValue, TypedRow};
use crate::schema::InsertStatement;

const ROW_SAVEPOINT: &str = "SAVEPOINT rdw_row";
const RELEASE_ROW_SAVEPOINT: &str = "RELEASE SAVEPOINT rdw_row";
const ROLLBACK_ROW_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT rdw_row";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create the connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

        if let Some(idle_timeout) = config.idle_timeout_secs {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        let pool = options.connect(&config.url).await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool created"
        );

        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(StoreError::from)
    }

    /// Wait for checked-out connections to come back, then close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl BatchStore for PgStore {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgTransaction { tx: Some(tx) })
    }
}

/// An open transaction holding one pooled connection.
///
/// Every row runs inside its own savepoint: PostgreSQL aborts the whole
/// transaction on the first failed statement otherwise, and the remaining
/// rows of the batch would all fail with it.
pub struct PgTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTransaction {
    fn open(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::Finished)
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn execute(
        &mut self,
        statement: &InsertStatement,
        row: &TypedRow,
    ) -> Result<(), StoreError> {
        if row.values().len() != statement.parameters() {
            return Err(StoreError::rejected(format!(
                "row has {} values, statement expects {}",
                row.values().len(),
                statement.parameters()
            )));
        }

        let tx = self.open()?;
        savepoint(tx, ROW_SAVEPOINT).await?;

        match bind_row(sqlx::query(statement.sql()), row)
            .execute(&mut **tx)
            .await
        {
            Ok(_) => {
                savepoint(tx, RELEASE_ROW_SAVEPOINT).await?;
                Ok(())
            }
            Err(err) => {
                savepoint(tx, ROLLBACK_ROW_SAVEPOINT).await?;
                Err(err.into())
            }
        }
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        // After a failed COMMIT the server has already discarded the
        // transaction and sqlx has released it; nothing is left to undo.
        match self.tx.take() {
            Some(tx) => tx.rollback().await.map_err(StoreError::from),
            None => Ok(()),
        }
    }
}

/// Run a savepoint step. Its failure leaves the transaction in an unknown
/// state, so it is reported apart from a failed insert.
async fn savepoint(tx: &mut Transaction<'static, Postgres>, sql: &str) -> Result<(), StoreError> {
    sqlx::query(sql)
        .execute(&mut **tx)
        .await
        .map(|_| ())
        .map_err(StoreError::Savepoint)
}

fn bind_row<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    row: &'q TypedRow,
) -> Query<'q, Postgres, PgArguments> {
    for value in row.values() {
        query = match value {
            FieldValue::Text(text) => query.bind(text.as_str()),
            FieldValue::Integer(number) => query.bind(*number),
            FieldValue::Decimal(number) => query.bind(*number),
            FieldValue::Date(date) => query.bind(*date),
            FieldValue::Timestamp(timestamp) => query.bind(*timestamp),
        };
    }
    query
}
