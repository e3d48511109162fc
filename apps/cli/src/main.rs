//! BuildLedger CLI: register builds and query their coverage history.
//!
//! Stores build metadata in a local database and dates each dependency
//! commit against its upstream `HEAD`.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
