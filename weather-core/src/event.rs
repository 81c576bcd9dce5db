//! Structured run events and the sinks that receive them.
//!
//! The runner never logs directly; it reports to an [`EventSink`] handed to it
//! at construction. [`TracingSink`] is the production sink.

use std::{fmt::Debug, time::Duration};

use crate::{
    error::ErrorKind,
    runner::{FailurePolicy, RunPhase},
};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    RunStarted { cities: usize, policy: FailurePolicy },
    PhaseChanged(RunPhase),
    CityFetched { index: usize, city: String, reported_name: String },
    CityStored { index: usize, city: String },
    CityFailed { index: usize, city: String, kind: ErrorKind, error: String },
    Pacing { delay: Duration },
    ConnectionReleased,
    ConnectionCloseFailed { error: String },
    RunFinished { stored: usize, failed: usize },
    RunFailed { kind: ErrorKind, error: String },
}

pub trait EventSink: Send + Sync + Debug {
    fn emit(&self, event: &IngestEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &IngestEvent) {
        match event {
            IngestEvent::RunStarted { cities, policy } => {
                tracing::info!(cities, policy = %policy, "starting weather ingestion run");
            }
            IngestEvent::PhaseChanged(phase) => {
                tracing::debug!(phase = %phase, "run phase changed");
            }
            IngestEvent::CityFetched { index, city, reported_name } => {
                tracing::info!(
                    index,
                    city = %city,
                    reported_name = %reported_name,
                    "fetched current weather"
                );
            }
            IngestEvent::CityStored { index, city } => {
                tracing::info!(index, city = %city, "stored weather snapshot");
            }
            IngestEvent::CityFailed { index, city, kind, error } => {
                tracing::error!(
                    index,
                    city = %city,
                    kind = %kind,
                    error = %error,
                    "city ingestion failed"
                );
            }
            IngestEvent::Pacing { delay } => {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "pacing before next city");
            }
            IngestEvent::ConnectionReleased => {
                tracing::debug!("store connection released");
            }
            IngestEvent::ConnectionCloseFailed { error } => {
                tracing::warn!(error = %error, "store connection did not close cleanly");
            }
            IngestEvent::RunFinished { stored, failed } => {
                if *failed == 0 {
                    tracing::info!(stored, "weather ingestion run finished");
                } else {
                    tracing::warn!(stored, failed, "weather ingestion run finished with failures");
                }
            }
            IngestEvent::RunFailed { kind, error } => {
                tracing::error!(kind = %kind, error = %error, "weather ingestion run failed");
            }
        }
    }
}
