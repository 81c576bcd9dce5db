//! Binary crate for the `weather-ingest` job.
//!
//! This crate focuses on:
//! - Resolving configuration and secrets for the core
//! - Logging setup
//! - Mapping the run outcome to an exit status for the scheduler

use clap::Parser;

mod cli;
mod logging;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();
    dotenvy::dotenv().ok();
    logging::init(cmd.verbose, cmd.log_json);
    cmd.run().await
}
