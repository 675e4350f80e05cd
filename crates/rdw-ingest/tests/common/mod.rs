//! Shared fixtures for the pipeline integration tests
//!
//! Builds RDW-shaped CSV text in memory and wires a [`Pipeline`] to an
//! in-memory store. The PostgreSQL container lives here too so that the
//! Docker-backed tests read like the in-memory ones.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use rdw_ingest::config::PipelineConfig;
use rdw_ingest::schema::TableSchema;
use rdw_ingest::source::CsvSource;
use rdw_ingest::store::MemoryStore;
use rdw_ingest::{Pipeline, RunReport};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// Header line of the RDW export, trimmed to the mapped columns
pub const HEADER: &str = "Kenteken,Voertuigsoort,Merk,Handelsbenaming,Vervaldatum APK,\
Datum tenaamstelling,Bruto BPM,Inrichting,Aantal zitplaatsen,Eerste kleur,Tweede kleur";

/// One vehicle record
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub kenteken: String,
    pub apk: String,
    pub tenaamstelling: String,
    pub bpm: String,
    pub zitplaatsen: String,
}

impl Vehicle {
    pub fn new(kenteken: impl Into<String>) -> Self {
        Self {
            kenteken: kenteken.into(),
            apk: "20250630".to_string(),
            tenaamstelling: "20190412".to_string(),
            bpm: "4213".to_string(),
            zitplaatsen: "5".to_string(),
        }
    }

    pub fn apk(mut self, value: &str) -> Self {
        self.apk = value.to_string();
        self
    }

    pub fn bpm(mut self, value: &str) -> Self {
        self.bpm = value.to_string();
        self
    }

    pub fn zitplaatsen(mut self, value: &str) -> Self {
        self.zitplaatsen = value.to_string();
        self
    }

    pub fn line(&self) -> String {
        format!(
            "{},Personenauto,VOLKSWAGEN,GOLF,{},{},{},hatchback,{},GRIJS,Niet geregistreerd",
            self.kenteken, self.apk, self.tenaamstelling, self.bpm, self.zitplaatsen
        )
    }
}

/// `count` well-formed vehicles with distinct plates
pub fn vehicles(count: usize) -> Vec<Vehicle> {
    (1..=count).map(|i| Vehicle::new(format!("K{i:06}"))).collect()
}

/// CSV text with a header line
pub fn csv(vehicles: &[Vehicle]) -> String {
    let mut text = String::from(HEADER);
    text.push('\n');
    for vehicle in vehicles {
        text.push_str(&vehicle.line());
        text.push('\n');
    }
    text
}

/// Run the `voertuigen` pipeline over `text` against `store`
pub async fn run(
    store: &Arc<MemoryStore>,
    text: &str,
    batch_size: usize,
    max_concurrent_batches: usize,
) -> RunReport {
    let config = PipelineConfig {
        batch_size,
        max_concurrent_batches,
    };
    let mut source = CsvSource::from_reader(text.as_bytes(), b',');
    source.skip_header().await.expect("header");

    Pipeline::new(Arc::clone(store), Arc::new(TableSchema::voertuigen()), config)
        .run(source)
        .await
}

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rdw_ingest=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub const CREATE_VOERTUIGEN: &str = "CREATE TABLE voertuigen (
    kenteken TEXT PRIMARY KEY,
    voertuigsoort TEXT,
    merk TEXT,
    handelsbenaming TEXT,
    vervaldatum_apk DATE,
    datum_tenaamstelling DATE,
    bruto_bpm DOUBLE PRECISION,
    inrichting TEXT,
    aantal_zitplaatsen BIGINT,
    eerste_kleur TEXT,
    tweede_kleur TEXT
)";

/// PostgreSQL container with the `voertuigen` table created
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/postgres");
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::query(CREATE_VOERTUIGEN)
            .execute(&pool)
            .await
            .context("Failed to create voertuigen table")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}
