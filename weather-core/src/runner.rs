//! The ingestion run: connect, prepare the table, then fetch and store each
//! city in order.
//!
//! The table is a snapshot of the latest run only. [`IngestionRunner::run`]
//! truncates it before the first city is written, so a failed run leaves the
//! rows it managed to store and nothing from earlier runs.

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

use crate::{
    Config,
    error::{ErrorKind, IngestError},
    event::{EventSink, IngestEvent, TracingSink},
    model::{City, WeatherSnapshot},
    pacing::{FixedInterval, NoPacing, Pacer},
    provider::{self, WeatherSource},
    store::{Connector, PgConnector, StoreConnection},
};

/// What to do when one city fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the run on the first failing city.
    #[default]
    FailFast,
    /// Record the failure and move on to the next city.
    ContinueOnCityError,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailurePolicy::FailFast => "fail-fast",
            FailurePolicy::ContinueOnCityError => "continue-on-city-error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Connecting,
    SchemaReady,
    Iterating(usize),
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => f.write_str("idle"),
            RunPhase::Connecting => f.write_str("connecting"),
            RunPhase::SchemaReady => f.write_str("schema-ready"),
            RunPhase::Iterating(i) => write!(f, "iterating({i})"),
            RunPhase::Done => f.write_str("done"),
            RunPhase::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CityStatus {
    Stored { reported_name: String },
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityOutcome {
    pub city: City,
    pub status: CityStatus,
}

/// Per-city outcomes of one run, in processing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    outcomes: Vec<CityOutcome>,
}

impl RunReport {
    pub fn outcomes(&self) -> &[CityOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn stored(&self) -> impl Iterator<Item = &CityOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CityStatus::Stored { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &CityOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CityStatus::Failed { .. }))
    }

    pub fn failed_cities(&self) -> Vec<&str> {
        self.failed().map(|o| o.city.as_str()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }

    fn record_stored(&mut self, city: &City, snapshot: &WeatherSnapshot) {
        self.outcomes.push(CityOutcome {
            city: city.clone(),
            status: CityStatus::Stored {
                reported_name: snapshot.city.clone(),
            },
        });
    }

    fn record_failed(&mut self, city: &City, err: &IngestError) {
        self.outcomes.push(CityOutcome {
            city: city.clone(),
            status: CityStatus::Failed {
                kind: err.kind(),
                message: err.chain(),
            },
        });
    }
}

impl FromIterator<CityOutcome> for RunReport {
    fn from_iter<I: IntoIterator<Item = CityOutcome>>(iter: I) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

/// Drives one run over the configured cities.
#[derive(Debug)]
pub struct IngestionRunner {
    source: Box<dyn WeatherSource>,
    connector: Box<dyn Connector>,
    pacer: Box<dyn Pacer>,
    events: Arc<dyn EventSink>,
    policy: FailurePolicy,
}

impl IngestionRunner {
    /// Fail-fast, no pacing, events to `tracing`.
    pub fn new(source: Box<dyn WeatherSource>, connector: Box<dyn Connector>) -> Self {
        Self {
            source,
            connector,
            pacer: Box::new(NoPacing),
            events: Arc::new(TracingSink),
            policy: FailurePolicy::FailFast,
        }
    }

    /// Wire the weatherstack client, PostgreSQL and fixed pacing from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let source = provider::source_from_config(config)?;
        let connector = PgConnector::from_config(&config.database);

        Ok(Self::new(source, Box::new(connector))
            .with_pacer(Box::new(FixedInterval(config.pacing.interval())))
            .with_policy(config.failure_policy))
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run over `cities` in order.
    ///
    /// Under [`FailurePolicy::FailFast`] the first city error is returned and
    /// the remaining cities are skipped. Under
    /// [`FailurePolicy::ContinueOnCityError`] city errors end up in the report.
    /// Once connected, the connection is closed exactly once whatever happens.
    pub async fn run(&self, cities: &[City]) -> Result<RunReport, IngestError> {
        self.emit(IngestEvent::RunStarted {
            cities: cities.len(),
            policy: self.policy,
        });
        self.enter(RunPhase::Idle);
        self.enter(RunPhase::Connecting);

        let mut conn = match self.connector.connect().await {
            Ok(conn) => conn,
            Err(err) => return Err(self.fail(err)),
        };

        let result = self.process(conn.as_mut(), cities).await;
        self.release(conn).await;

        match result {
            Ok(report) => {
                self.emit(IngestEvent::RunFinished {
                    stored: report.stored().count(),
                    failed: report.failed().count(),
                });
                self.enter(RunPhase::Done);
                Ok(report)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn process(
        &self,
        conn: &mut dyn StoreConnection,
        cities: &[City],
    ) -> Result<RunReport, IngestError> {
        conn.ensure_schema().await?;
        self.enter(RunPhase::SchemaReady);

        let mut report = RunReport::default();

        for (index, city) in cities.iter().enumerate() {
            self.enter(RunPhase::Iterating(index));

            match self.ingest_city(conn, index, city).await {
                Ok(snapshot) => report.record_stored(city, &snapshot),
                Err(err) => {
                    self.emit(IngestEvent::CityFailed {
                        index,
                        city: city.to_string(),
                        kind: err.kind(),
                        error: err.chain(),
                    });
                    match self.policy {
                        FailurePolicy::FailFast => return Err(err),
                        FailurePolicy::ContinueOnCityError => report.record_failed(city, &err),
                    }
                }
            }

            if index + 1 < cities.len() {
                self.emit(IngestEvent::Pacing {
                    delay: self.pacer.delay(),
                });
                self.pacer.wait().await;
            }
        }

        Ok(report)
    }

    async fn ingest_city(
        &self,
        conn: &mut dyn StoreConnection,
        index: usize,
        city: &City,
    ) -> Result<WeatherSnapshot, IngestError> {
        let snapshot = self.source.fetch(city).await?;
        self.emit(IngestEvent::CityFetched {
            index,
            city: city.to_string(),
            reported_name: snapshot.city.clone(),
        });

        conn.write_snapshot(&snapshot).await?;
        self.emit(IngestEvent::CityStored {
            index,
            city: city.to_string(),
        });

        Ok(snapshot)
    }

    async fn release(&self, conn: Box<dyn StoreConnection>) {
        match conn.close().await {
            Ok(()) => self.emit(IngestEvent::ConnectionReleased),
            Err(e) => self.emit(IngestEvent::ConnectionCloseFailed {
                error: format!("{e:#}"),
            }),
        }
    }

    fn fail(&self, err: IngestError) -> IngestError {
        self.emit(IngestEvent::RunFailed {
            kind: err.kind(),
            error: err.chain(),
        });
        self.enter(RunPhase::Failed);
        err
    }

    fn enter(&self, phase: RunPhase) {
        self.emit(IngestEvent::PhaseChanged(phase));
    }

    fn emit(&self, event: IngestEvent) {
        self.events.emit(&event);
    }
}

/// Entry point for the scheduler: one run over `config.cities`.
///
/// A run that completes with failed cities (continue policy) is reported as
/// [`IngestError::PartialRun`].
pub async fn ingest(config: &Config) -> anyhow::Result<RunReport> {
    config.validate()?;
    let runner = IngestionRunner::from_config(config)?;
    let report = runner.run(&config.cities).await?;

    if !report.is_complete() {
        return Err(IngestError::PartialRun { report }.into());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::RequestFailure, event::testing::RecordingSink};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use reqwest::StatusCode;
    use std::{
        collections::{HashMap, HashSet},
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    #[derive(Debug, Default)]
    struct StoreState {
        rows: Vec<String>,
        opened: usize,
        closed: usize,
        fail_connect: bool,
        fail_schema: bool,
        fail_write_for: HashSet<String>,
    }

    /// In-memory stand-in for the weather_report table.
    #[derive(Debug, Clone, Default)]
    struct MemoryStore(Arc<Mutex<StoreState>>);

    impl MemoryStore {
        fn with_rows(rows: &[&str]) -> Self {
            let store = Self::default();
            store.state().rows = rows.iter().map(|r| r.to_string()).collect();
            store
        }

        fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
            self.0.lock().unwrap()
        }

        fn rows(&self) -> Vec<String> {
            self.state().rows.clone()
        }
    }

    #[async_trait]
    impl Connector for MemoryStore {
        async fn connect(&self) -> Result<Box<dyn StoreConnection>, IngestError> {
            let mut state = self.state();
            if state.fail_connect {
                return Err(IngestError::ConnectionTimeout {
                    target: "memory".into(),
                    after: Duration::from_secs(10),
                });
            }
            state.opened += 1;
            Ok(Box::new(MemoryConn(self.0.clone())))
        }
    }

    struct MemoryConn(Arc<Mutex<StoreState>>);

    #[async_trait]
    impl StoreConnection for MemoryConn {
        async fn ensure_schema(&mut self) -> Result<(), IngestError> {
            let mut state = self.0.lock().unwrap();
            if state.fail_schema {
                // Rolled back: prior rows survive.
                return Err(IngestError::SchemaSetup {
                    source: sqlx::Error::Protocol("permission denied for schema weather".into()),
                });
            }
            state.rows.clear();
            Ok(())
        }

        async fn write_snapshot(&mut self, snapshot: &WeatherSnapshot) -> Result<(), IngestError> {
            let mut state = self.0.lock().unwrap();
            if state.fail_write_for.contains(&snapshot.city) {
                return Err(IngestError::Write {
                    city: snapshot.city.clone(),
                    source: sqlx::Error::Protocol("connection reset".into()),
                });
            }
            state.rows.push(snapshot.city.clone());
            Ok(())
        }

        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            self.0.lock().unwrap().closed += 1;
            Ok(())
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum FakeFailure {
        Status(StatusCode),
        EmptyDescriptions,
    }

    #[derive(Debug, Default, Clone)]
    struct FakeSource {
        failures: Arc<Mutex<HashMap<String, FakeFailure>>>,
        renames: Arc<Mutex<HashMap<String, String>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeSource {
        fn failing(self, city: &str, failure: FakeFailure) -> Self {
            self.failures.lock().unwrap().insert(city.into(), failure);
            self
        }

        fn renaming(self, query: &str, reported: &str) -> Self {
            self.renames.lock().unwrap().insert(query.into(), reported.into());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WeatherSource for FakeSource {
        async fn fetch(&self, city: &City) -> Result<WeatherSnapshot, IngestError> {
            self.calls.lock().unwrap().push(city.to_string());

            let failure = self.failures.lock().unwrap().get(city.as_str()).copied();
            match failure {
                Some(FakeFailure::Status(status)) => Err(IngestError::ApiRequest {
                    city: city.to_string(),
                    source: RequestFailure::Status {
                        status,
                        body: String::new(),
                    },
                }),
                Some(FakeFailure::EmptyDescriptions) => Err(IngestError::ApiParse {
                    city: city.to_string(),
                    field: "current.weather_descriptions[0]".into(),
                    reason: "empty list".into(),
                }),
                None => {
                    let name = self
                        .renames
                        .lock()
                        .unwrap()
                        .get(city.as_str())
                        .cloned()
                        .unwrap_or_else(|| city.to_string());
                    Ok(WeatherSnapshot {
                        city: name,
                        temperature: 20.0,
                        description: "Clear".into(),
                        wind_speed: 5.0,
                        local_time: NaiveDate::from_ymd_opt(2025, 8, 8)
                            .unwrap()
                            .and_hms_opt(12, 0, 0)
                            .unwrap(),
                        utc_offset: "1.0".into(),
                    })
                }
            }
        }
    }

    #[derive(Debug, Default, Clone)]
    struct CountingPacer(Arc<AtomicUsize>);

    #[async_trait]
    impl Pacer for CountingPacer {
        fn delay(&self) -> Duration {
            Duration::from_secs(10)
        }

        async fn wait(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        source: FakeSource,
        store: MemoryStore,
        pacer: CountingPacer,
        events: Arc<RecordingSink>,
    }

    impl Harness {
        fn new(source: FakeSource, store: MemoryStore) -> Self {
            Self {
                source,
                store,
                pacer: CountingPacer::default(),
                events: Arc::new(RecordingSink::default()),
            }
        }

        fn runner(&self, policy: FailurePolicy) -> IngestionRunner {
            IngestionRunner::new(Box::new(self.source.clone()), Box::new(self.store.clone()))
                .with_pacer(Box::new(self.pacer.clone()))
                .with_events(self.events.clone())
                .with_policy(policy)
        }

        fn waits(&self) -> usize {
            self.pacer.0.load(Ordering::SeqCst)
        }

        fn last_phase(&self) -> Option<RunPhase> {
            self.events.phases().last().copied()
        }
    }

    fn cities(names: &[&str]) -> Vec<City> {
        names.iter().map(|n| City::new(*n).unwrap()).collect()
    }

    #[tokio::test]
    async fn successful_run_replaces_prior_rows() {
        let h = Harness::new(FakeSource::default(), MemoryStore::with_rows(&["Old", "Rows"]));

        let report = h
            .runner(FailurePolicy::FailFast)
            .run(&cities(&["London", "Tokyo"]))
            .await
            .unwrap();

        assert_eq!(h.store.rows(), ["London", "Tokyo"]);
        assert_eq!(report.len(), 2);
        assert!(report.is_complete());
        assert_eq!(h.store.state().opened, 1);
        assert_eq!(h.store.state().closed, 1);
        assert_eq!(h.waits(), 1, "no pacing after the last city");
        assert_eq!(
            h.events.phases(),
            [
                RunPhase::Idle,
                RunPhase::Connecting,
                RunPhase::SchemaReady,
                RunPhase::Iterating(0),
                RunPhase::Iterating(1),
                RunPhase::Done,
            ]
        );
    }

    #[tokio::test]
    async fn stored_rows_use_the_provider_name() {
        let source = FakeSource::default().renaming("london", "London");
        let h = Harness::new(source, MemoryStore::default());

        let report = h
            .runner(FailurePolicy::FailFast)
            .run(&cities(&["london", "Tokyo"]))
            .await
            .unwrap();

        assert_eq!(h.store.rows(), ["London", "Tokyo"]);
        assert_eq!(report.outcomes()[0].city.as_str(), "london");
        assert_eq!(
            report.outcomes()[0].status,
            CityStatus::Stored { reported_name: "London".into() }
        );
    }

    #[tokio::test]
    async fn fail_fast_stops_at_the_failing_city() {
        let source = FakeSource::default()
            .failing("Tokyo", FakeFailure::Status(StatusCode::INTERNAL_SERVER_ERROR));
        let h = Harness::new(source, MemoryStore::with_rows(&["Old"]));

        let err = h
            .runner(FailurePolicy::FailFast)
            .run(&cities(&["London", "Tokyo", "Paris"]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ApiRequest);
        assert_eq!(err.city(), Some("Tokyo"));
        assert_eq!(h.store.rows(), ["London"]);
        assert_eq!(h.source.calls(), ["London", "Tokyo"], "Paris must not be attempted");
        assert_eq!(h.store.state().closed, 1);
        assert_eq!(h.waits(), 1);
        assert_eq!(h.last_phase(), Some(RunPhase::Failed));
    }

    #[tokio::test]
    async fn empty_description_never_becomes_a_row() {
        let source = FakeSource::default().failing("London", FakeFailure::EmptyDescriptions);
        let h = Harness::new(source, MemoryStore::default());

        let err = h
            .runner(FailurePolicy::FailFast)
            .run(&cities(&["London"]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ApiParse);
        assert!(h.store.rows().is_empty());
        assert_eq!(h.store.state().closed, 1);
    }

    #[tokio::test]
    async fn write_failure_aborts_and_releases() {
        let store = MemoryStore::default();
        store.state().fail_write_for.insert("Tokyo".into());
        let h = Harness::new(FakeSource::default(), store);

        let err = h
            .runner(FailurePolicy::FailFast)
            .run(&cities(&["London", "Tokyo", "Paris"]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Write);
        assert_eq!(h.store.rows(), ["London"]);
        assert_eq!(h.store.state().closed, 1);
        let tokyo_failures = h
            .events
            .count(|e| matches!(e, IngestEvent::CityFailed { city, .. } if city == "Tokyo"));
        assert_eq!(tokyo_failures, 1);
    }

    #[tokio::test]
    async fn schema_failure_processes_no_city() {
        let store = MemoryStore::with_rows(&["Old"]);
        store.state().fail_schema = true;
        let h = Harness::new(FakeSource::default(), store);

        let err = h
            .runner(FailurePolicy::FailFast)
            .run(&cities(&["London"]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaSetup);
        assert!(h.source.calls().is_empty());
        assert_eq!(h.store.rows(), ["Old"]);
        assert_eq!(h.store.state().closed, 1);
        assert_eq!(h.last_phase(), Some(RunPhase::Failed));
    }

    #[tokio::test]
    async fn connect_failure_processes_no_city() {
        let store = MemoryStore::default();
        store.state().fail_connect = true;
        let h = Harness::new(FakeSource::default(), store);

        let err = h
            .runner(FailurePolicy::ContinueOnCityError)
            .run(&cities(&["London"]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(h.source.calls().is_empty());
        assert_eq!(h.store.state().opened, 0);
        assert_eq!(h.store.state().closed, 0);
        assert_eq!(
            h.events.phases(),
            [RunPhase::Idle, RunPhase::Connecting, RunPhase::Failed]
        );
        assert_eq!(h.events.count(|e| matches!(e, IngestEvent::ConnectionReleased)), 0);
    }

    #[tokio::test]
    async fn continue_policy_records_failures_and_keeps_going() {
        let source = FakeSource::default()
            .failing("Tokyo", FakeFailure::Status(StatusCode::TOO_MANY_REQUESTS));
        let h = Harness::new(source, MemoryStore::default());

        let report = h
            .runner(FailurePolicy::ContinueOnCityError)
            .run(&cities(&["London", "Tokyo", "Paris"]))
            .await
            .unwrap();

        assert_eq!(h.store.rows(), ["London", "Paris"]);
        assert_eq!(report.failed_cities(), ["Tokyo"]);
        assert_eq!(report.stored().count(), 2);
        match &report.outcomes()[1].status {
            CityStatus::Failed { kind, message } => {
                assert_eq!(*kind, ErrorKind::ApiRequest);
                assert!(message.contains("'Tokyo'"), "{message}");
                assert!(message.contains("429"), "cause kept in report: {message}");
            }
            other => panic!("expected Tokyo to fail, got {other:?}"),
        }
        assert_eq!(h.waits(), 2);
        assert_eq!(h.store.state().closed, 1);
        assert_eq!(h.last_phase(), Some(RunPhase::Done));

        let partial = IngestError::PartialRun { report };
        assert_eq!(partial.to_string(), "1 of 3 cities failed: Tokyo");
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_interval_paces_between_cities() {
        let h = Harness::new(FakeSource::default(), MemoryStore::default());
        let runner = h
            .runner(FailurePolicy::FailFast)
            .with_pacer(Box::new(FixedInterval(Duration::from_secs(10))));
        let start = tokio::time::Instant::now();

        runner.run(&cities(&["London", "Tokyo", "Paris"])).await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(30));
        let ten_second_waits = h.events.count(
            |e| matches!(e, IngestEvent::Pacing { delay } if *delay == Duration::from_secs(10)),
        );
        assert_eq!(ten_second_waits, 2);
    }

    #[tokio::test]
    async fn ingest_rejects_unconfigured_key_before_connecting() {
        let err = ingest(&Config::default()).await.unwrap_err();
        assert!(err.to_string().contains("No weatherstack API key configured"));
    }
}
