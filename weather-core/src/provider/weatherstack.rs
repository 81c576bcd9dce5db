use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    error::{IngestError, RequestFailure},
    model::{City, WeatherSnapshot},
};

use super::WeatherSource;

/// Client for the weatherstack `current` endpoint.
#[derive(Debug, Clone)]
pub struct WeatherstackClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherstackClient {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for weatherstack")?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn fetch_current(&self, city: &City) -> Result<WeatherSnapshot, IngestError> {
        let url = format!("{}/current", self.base_url);
        let request_failed = |source: RequestFailure| IngestError::ApiRequest {
            city: city.to_string(),
            source,
        };

        tracing::debug!(city = %city, url = %url, "requesting current weather");

        let res = self
            .http
            .get(&url)
            .query(&[("access_key", self.api_key.as_str()), ("query", city.as_str())])
            .send()
            .await
            .map_err(|e| request_failed(e.into()))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| request_failed(e.into()))?;

        if !status.is_success() {
            return Err(request_failed(RequestFailure::Status {
                status,
                body: truncate_body(&body),
            }));
        }

        parse_current(city.as_str(), &body)
    }
}

#[async_trait]
impl WeatherSource for WeatherstackClient {
    async fn fetch(&self, city: &City) -> Result<WeatherSnapshot, IngestError> {
        self.fetch_current(city).await
    }
}

#[derive(Debug, Deserialize)]
struct WsError {
    code: Option<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsLocation {
    name: Option<String>,
    localtime: Option<String>,
    utc_offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsCurrent {
    temperature: Option<f64>,
    weather_descriptions: Option<Vec<String>>,
    wind_speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WsResponse {
    success: Option<bool>,
    error: Option<WsError>,
    location: Option<WsLocation>,
    current: Option<WsCurrent>,
}

/// Every field is required; nothing is defaulted.
fn parse_current(city: &str, body: &str) -> Result<WeatherSnapshot, IngestError> {
    let parsed: WsResponse = serde_json::from_str(body)
        .map_err(|e| IngestError::parse(city, "<body>", e.to_string()))?;

    // weatherstack reports key/quota/query problems with a 200 status.
    if parsed.success == Some(false) || parsed.error.is_some() {
        let err = parsed.error.unwrap_or(WsError { code: None, kind: None, info: None });
        return Err(IngestError::ApiRequest {
            city: city.to_owned(),
            source: RequestFailure::Provider {
                code: err.code.unwrap_or_default(),
                kind: err.kind.unwrap_or_else(|| "unknown".to_string()),
                info: err.info.unwrap_or_default(),
            },
        });
    }

    let missing = |field: &str| IngestError::parse(city, field, "missing");

    let location = parsed.location.ok_or_else(|| missing("location"))?;
    let current = parsed.current.ok_or_else(|| missing("current"))?;

    let name = location.name.ok_or_else(|| missing("location.name"))?;
    let localtime = location.localtime.ok_or_else(|| missing("location.localtime"))?;
    let utc_offset = location.utc_offset.ok_or_else(|| missing("location.utc_offset"))?;

    let temperature = current.temperature.ok_or_else(|| missing("current.temperature"))?;
    let wind_speed = current.wind_speed.ok_or_else(|| missing("current.wind_speed"))?;
    let description = current
        .weather_descriptions
        .ok_or_else(|| missing("current.weather_descriptions"))?
        .into_iter()
        .next()
        .ok_or_else(|| IngestError::parse(city, "current.weather_descriptions[0]", "empty list"))?;

    let local_time = parse_localtime(&localtime)
        .ok_or_else(|| {
            let reason = format!("unrecognized time '{localtime}'");
            IngestError::parse(city, "location.localtime", reason)
        })?;

    Ok(WeatherSnapshot {
        city: name,
        temperature,
        description,
        wind_speed,
        local_time,
        utc_offset,
    })
}

fn parse_localtime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
