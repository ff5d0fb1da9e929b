//! entisync: merge tabular rows into an ODK Central entity list.
//!
//! Usage:
//!   entisync --list trees --match-key label --delete trees.json
//!   cat rows.json | entisync --list trees --dry-run
//!
//! Rows are read as a JSON array of objects. Logs go to stderr; the merge
//! summary is printed to stdout as JSON.

use anyhow::Result;
use clap::Parser;
use entisync_cli::{run, Args};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("entisync v{} starting", env!("CARGO_PKG_VERSION"));
    let summary = match run(&args).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("{:#}", e);
            return Err(e);
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
