//! Core library for the `weather-ingest` job.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The weatherstack client behind the [`WeatherSource`] trait
//! - PostgreSQL schema setup and snapshot writes behind [`store::Connector`]
//! - The sequential ingestion run ([`IngestionRunner`], [`ingest`])
//!
//! Each run empties `weather.weather_report` before writing, so the table only
//! ever reflects the latest run.

pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod pacing;
pub mod provider;
pub mod runner;
pub mod store;

pub use config::Config;
pub use error::{ErrorKind, IngestError, RequestFailure};
pub use event::{EventSink, IngestEvent, TracingSink};
pub use model::{City, WeatherReportRow, WeatherSnapshot};
pub use provider::WeatherSource;
pub use runner::{FailurePolicy, IngestionRunner, RunPhase, RunReport, ingest};
