use sqlx::{Connection, PgConnection};

use crate::{error::IngestError, model::WeatherSnapshot};

const INSERT_SNAPSHOT: &str = r#"
    INSERT INTO weather.weather_report
        (city, temperature, weather_description, wind_speed, time, inserted_date, utc_offset)
    VALUES ($1, $2, $3, $4, $5, NOW(), $6)
"#;

/// Insert one snapshot as a single committed row.
///
/// On failure the transaction is rolled back and no row is left behind.
pub async fn write(conn: &mut PgConnection, snapshot: &WeatherSnapshot) -> Result<(), IngestError> {
    let write_failed = |source: sqlx::Error| IngestError::Write {
        city: snapshot.city.clone(),
        source,
    };

    let mut tx = conn.begin().await.map_err(write_failed)?;

    let inserted = sqlx::query(INSERT_SNAPSHOT)
        .bind(&snapshot.city)
        .bind(snapshot.temperature)
        .bind(&snapshot.description)
        .bind(snapshot.wind_speed)
        .bind(snapshot.local_time)
        .bind(&snapshot.utc_offset)
        .execute(&mut *tx)
        .await;

    if let Err(source) = inserted {
        if let Err(e) = tx.rollback().await {
            tracing::warn!(error = %e, city = %snapshot.city, "rollback of snapshot insert failed");
        }
        return Err(write_failed(source));
    }

    tx.commit().await.map_err(write_failed)
}
