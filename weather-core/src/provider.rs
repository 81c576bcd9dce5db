use async_trait::async_trait;
use std::fmt::Debug;

use crate::{Config, City, WeatherSnapshot, error::IngestError};

pub mod weatherstack;

pub use weatherstack::WeatherstackClient;

/// Source of current conditions for one city per call.
///
/// Implementations make a single attempt; retrying is up to the caller.
#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    async fn fetch(&self, city: &City) -> Result<WeatherSnapshot, IngestError>;
}

/// Construct the weatherstack client from resolved config.
pub fn source_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherSource>> {
    if config.api.api_key.trim().is_empty() {
        anyhow::bail!(
            "No weatherstack API key configured.\n\
             Hint: set {} or run `weather-ingest configure`.",
            crate::config::API_KEY_ENV
        );
    }

    let client = WeatherstackClient::new(
        config.api.api_key.clone(),
        config.api.base_url.clone(),
        config.api.timeout(),
    )?;
    Ok(Box::new(client))
}
