use sqlx::{Connection, PgConnection, Postgres, Transaction};

use crate::error::IngestError;

pub const TABLE: &str = "weather.weather_report";

const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS weather";

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS weather.weather_report (
        id SERIAL PRIMARY KEY,
        city TEXT,
        temperature FLOAT,
        weather_description TEXT,
        wind_speed FLOAT,
        time TIMESTAMP,
        inserted_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        utc_offset TEXT
    )
"#;

// The table only ever holds the latest run.
const TRUNCATE_TABLE: &str = "TRUNCATE TABLE weather.weather_report";

/// Make sure `weather.weather_report` exists and is empty.
///
/// Create and truncate commit together or not at all.
pub async fn ensure(conn: &mut PgConnection) -> Result<(), IngestError> {
    let setup_failed = |source: sqlx::Error| IngestError::SchemaSetup { source };

    let mut tx = conn.begin().await.map_err(setup_failed)?;

    for statement in [CREATE_SCHEMA, CREATE_TABLE, TRUNCATE_TABLE] {
        let executed = sqlx::query(statement).execute(&mut *tx).await;
        if let Err(source) = executed {
            rollback(tx).await;
            return Err(setup_failed(source));
        }
    }

    tx.commit().await.map_err(setup_failed)?;
    tracing::debug!(table = TABLE, "schema ready and table truncated");
    Ok(())
}

async fn rollback(tx: Transaction<'_, Postgres>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, table = TABLE, "rollback of schema setup failed");
    }
}
