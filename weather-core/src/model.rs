use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// City name as configured. Used both as the API query and as the outcome label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct City(String);

impl City {
    pub fn new(name: impl Into<String>) -> anyhow::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            anyhow::bail!("City name must not be empty");
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl TryFrom<String> for City {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        City::new(value)
    }
}

impl From<City> for String {
    fn from(city: City) -> Self {
        city.0
    }
}

/// One city's observation as parsed from the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSnapshot {
    /// Location name as reported by the provider, not the query string.
    pub city: String,
    pub temperature: f64,
    pub description: String,
    pub wind_speed: f64,
    /// Provider's local time for the city, not normalized to UTC.
    pub local_time: NaiveDateTime,
    /// Raw offset string, e.g. "+1.0".
    pub utc_offset: String,
}

/// A persisted row of `weather.weather_report`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WeatherReportRow {
    pub id: i32,
    pub city: String,
    pub temperature: f64,
    pub weather_description: String,
    pub wind_speed: f64,
    pub time: NaiveDateTime,
    pub inserted_date: Option<NaiveDateTime>,
    pub utc_offset: String,
}
