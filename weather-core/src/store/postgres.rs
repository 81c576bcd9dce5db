use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Connection, PgConnection, postgres::PgConnectOptions};
use std::time::Duration;

use crate::{
    config::DatabaseConfig,
    error::IngestError,
    model::{WeatherReportRow, WeatherSnapshot},
};

use super::{Connector, StoreConnection, schema, writer};

const SELECT_REPORTS: &str = r#"
    SELECT id, city, temperature, weather_description, wind_speed, time, inserted_date, utc_offset
    FROM weather.weather_report
    ORDER BY id
"#;

/// Opens one `PgConnection` per run.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
    target: String,
    connect_timeout: Duration,
}

impl PgConnector {
    pub fn new(
        options: PgConnectOptions,
        target: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            options,
            target: target.into(),
            connect_timeout,
        }
    }

    pub fn from_config(db: &DatabaseConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .database(&db.dbname)
            .username(&db.user)
            .password(&db.password)
            .application_name("weather-ingest")
            .options([("statement_timeout", format!("{}s", db.statement_timeout_secs))]);

        Self::new(options, db.target(), db.connect_timeout())
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Open a raw connection, bounded by the connect timeout.
    pub async fn connect_pg(&self) -> Result<PgConnection, IngestError> {
        let connect = PgConnection::connect_with(&self.options);
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(source)) => Err(IngestError::Connection {
                target: self.target.clone(),
                source,
            }),
            Err(_) => Err(IngestError::ConnectionTimeout {
                target: self.target.clone(),
                after: self.connect_timeout,
            }),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, IngestError> {
        let conn = self.connect_pg().await?;
        tracing::info!(target_db = %self.target, "connected to PostgreSQL");
        Ok(Box::new(PgStore { conn }))
    }
}

/// The run's connection, delegating to the schema manager and snapshot writer.
#[derive(Debug)]
pub struct PgStore {
    conn: PgConnection,
}

impl PgStore {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StoreConnection for PgStore {
    async fn ensure_schema(&mut self) -> Result<(), IngestError> {
        schema::ensure(&mut self.conn).await
    }

    async fn write_snapshot(&mut self, snapshot: &WeatherSnapshot) -> Result<(), IngestError> {
        writer::write(&mut self.conn, snapshot).await
    }

    async fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

/// Rows of the latest run, in insertion order.
pub async fn latest_reports(conn: &mut PgConnection) -> Result<Vec<WeatherReportRow>, sqlx::Error> {
    sqlx::query_as::<_, WeatherReportRow>(SELECT_REPORTS)
        .fetch_all(&mut *conn)
        .await
}

/// Connect, read the latest rows, and close again.
pub async fn read_latest(connector: &PgConnector) -> anyhow::Result<Vec<WeatherReportRow>> {
    let mut conn = connector.connect_pg().await?;
    let rows = latest_reports(&mut conn).await;

    if let Err(e) = conn.close().await {
        tracing::warn!(
            error = %e,
            target_db = %connector.target(),
            "store connection did not close cleanly"
        );
    }

    rows.context("Failed to read weather.weather_report")
}
