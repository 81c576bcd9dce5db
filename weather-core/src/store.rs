//! Persistence seam between the runner and PostgreSQL.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{error::IngestError, model::WeatherSnapshot};

pub mod postgres;
pub mod schema;
pub mod writer;

pub use postgres::{PgConnector, PgStore};

/// Opens the single connection a run works on.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, IngestError>;
}

/// A connection exclusively owned by one run.
#[async_trait]
pub trait StoreConnection: Send {
    /// Create schema and table if absent, then empty the table. One transaction.
    async fn ensure_schema(&mut self) -> Result<(), IngestError>;

    /// Insert one row in its own transaction.
    async fn write_snapshot(&mut self, snapshot: &WeatherSnapshot) -> Result<(), IngestError>;

    /// Consumes the connection, so it can only be released once.
    async fn close(self: Box<Self>) -> anyhow::Result<()>;
}
