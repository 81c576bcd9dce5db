use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inquire::{CustomType, Password, Text};
use std::path::{Path, PathBuf};

use weather_ingest_core::{
    City, Config, FailurePolicy, IngestError, RunReport,
    runner::CityStatus,
    store::{PgConnector, postgres::read_latest},
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather-ingest",
    version,
    about = "Load current weather for configured cities into PostgreSQL"
)]
pub struct Cli {
    /// Config file; defaults to the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logs (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one ingestion over the configured cities.
    Run {
        /// Record failing cities and keep going instead of aborting.
        #[arg(long)]
        continue_on_error: bool,

        /// Skip the delay between cities.
        #[arg(long)]
        no_pacing: bool,
    },

    /// Interactively write the config file.
    Configure,

    /// Print the rows stored by the latest run.
    Show,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Run {
                continue_on_error,
                no_pacing,
            } => {
                let mut config = resolve_config(self.config.as_deref())?;
                if continue_on_error {
                    config.failure_policy = FailurePolicy::ContinueOnCityError;
                }
                if no_pacing {
                    config.pacing.interval_secs = 0;
                }
                run_ingestion(&config).await
            }
            Command::Configure => configure(self.config.as_deref()),
            Command::Show => {
                let config = resolve_config(self.config.as_deref())?;
                show(&config).await
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    let mut config = load_config(path)?;
    config.apply_env()?;
    Ok(config)
}

async fn run_ingestion(config: &Config) -> Result<()> {
    match weather_ingest_core::ingest(config).await {
        Ok(report) => {
            log_report(&report);
            print_report(&report);
            Ok(())
        }
        Err(err) => {
            if let Some(IngestError::PartialRun { report }) = err.downcast_ref::<IngestError>() {
                log_report(report);
                print_report(report);
            }
            Err(err)
        }
    }
}

fn log_report(report: &RunReport) {
    for outcome in report.failed() {
        if let CityStatus::Failed { kind, message } = &outcome.status {
            tracing::warn!(city = %outcome.city, kind = %kind, error = %message, "city not stored");
        }
    }
    tracing::info!(
        stored = report.stored().count(),
        failed = report.failed().count(),
        "ingestion summary"
    );
}

fn print_report(report: &RunReport) {
    for outcome in report.outcomes() {
        match &outcome.status {
            CityStatus::Stored { reported_name } => {
                println!("  ok      {:<20} stored as {reported_name}", outcome.city);
            }
            CityStatus::Failed { kind, message } => {
                println!("  failed  {:<20} [{kind}] {message}", outcome.city);
            }
        }
    }
    println!(
        "{} stored, {} failed",
        report.stored().count(),
        report.failed().count()
    );
}

fn configure(path: Option<&Path>) -> Result<()> {
    let mut config = load_config(path)?;

    config.api.api_key = Password::new("weatherstack API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    config.database.host = Text::new("Database host:")
        .with_default(&config.database.host)
        .prompt()?;
    config.database.port = CustomType::<u16>::new("Database port:")
        .with_default(config.database.port)
        .prompt()?;
    config.database.dbname = Text::new("Database name:")
        .with_default(&config.database.dbname)
        .prompt()?;
    config.database.user = Text::new("Database user:")
        .with_default(&config.database.user)
        .prompt()?;
    config.database.password = Password::new("Database password:")
        .without_confirmation()
        .prompt()?;

    let current = config
        .cities
        .iter()
        .map(City::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let cities = Text::new("Cities (comma separated, in order):")
        .with_default(&current)
        .prompt()?;
    config.cities = parse_cities(&cities)?;

    config.validate()?;

    let saved_to = match path {
        Some(path) => {
            config.save_to(path)?;
            path.to_path_buf()
        }
        None => config.save()?,
    };
    tracing::debug!(path = %saved_to.display(), "config written");
    println!("Configuration saved to {}", saved_to.display());
    Ok(())
}

fn parse_cities(input: &str) -> Result<Vec<City>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(City::new)
        .collect()
}

async fn show(config: &Config) -> Result<()> {
    let connector = PgConnector::from_config(&config.database);
    let rows = read_latest(&connector).await?;
    tracing::debug!(rows = rows.len(), target_db = %connector.target(), "read latest weather rows");

    if rows.is_empty() {
        println!("No rows in weather.weather_report.");
        return Ok(());
    }

    for row in rows {
        let inserted = row
            .inserted_date
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:>6.1}°C  {:<24} wind {:>5.1}  local {} (UTC{})  inserted {}",
            row.city,
            row.temperature,
            row.weather_description,
            row.wind_speed,
            row.time.format("%Y-%m-%d %H:%M"),
            row.utc_offset,
            inserted,
        );
    }
    Ok(())
}
