use std::{fmt, time::Duration};

use reqwest::StatusCode;
use thiserror::Error;

use crate::runner::RunReport;

/// Failures of an ingestion run, tagged with the city or target they concern.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("weather API request for '{city}' failed")]
    ApiRequest {
        city: String,
        #[source]
        source: RequestFailure,
    },

    #[error("weather API response for '{city}' is invalid at `{field}`: {reason}")]
    ApiParse {
        city: String,
        field: String,
        reason: String,
    },

    #[error("failed to connect to store at {target}")]
    Connection {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("timed out connecting to store at {target} after {after:?}")]
    ConnectionTimeout { target: String, after: Duration },

    #[error("failed to prepare weather_report table")]
    SchemaSetup {
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to write snapshot for '{city}'")]
    Write {
        city: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{}", partial_run_summary(.report))]
    PartialRun { report: RunReport },
}

/// Why a request to the provider did not produce a usable body.
#[derive(Debug, Error)]
pub enum RequestFailure {
    #[error("status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("provider error {code} ({kind}): {info}")]
    Provider { code: i64, kind: String, info: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Coarse classification of [`IngestError`], used in reports and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ApiRequest,
    ApiParse,
    Connection,
    SchemaSetup,
    Write,
    PartialRun,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ApiRequest => "api_request",
            ErrorKind::ApiParse => "api_parse",
            ErrorKind::Connection => "connection",
            ErrorKind::SchemaSetup => "schema_setup",
            ErrorKind::Write => "write",
            ErrorKind::PartialRun => "partial_run",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::ApiRequest { .. } => ErrorKind::ApiRequest,
            IngestError::ApiParse { .. } => ErrorKind::ApiParse,
            IngestError::Connection { .. } | IngestError::ConnectionTimeout { .. } => {
                ErrorKind::Connection
            }
            IngestError::SchemaSetup { .. } => ErrorKind::SchemaSetup,
            IngestError::Write { .. } => ErrorKind::Write,
            IngestError::PartialRun { .. } => ErrorKind::PartialRun,
        }
    }

    /// City the failure belongs to, if it is a per-city failure.
    pub fn city(&self) -> Option<&str> {
        match self {
            IngestError::ApiRequest { city, .. }
            | IngestError::ApiParse { city, .. }
            | IngestError::Write { city, .. } => Some(city),
            _ => None,
        }
    }

    /// The message followed by each underlying cause, `: `-separated.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }

    pub(crate) fn parse(city: &str, field: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::ApiParse {
            city: city.to_owned(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn partial_run_summary(report: &RunReport) -> String {
    format!(
        "{} of {} cities failed: {}",
        report.failed().count(),
        report.len(),
        report.failed_cities().join(", ")
    )
}
