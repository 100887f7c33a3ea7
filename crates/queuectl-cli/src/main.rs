//! queuectl: command-line front end for the job queue.

mod cli;
mod commands;
mod logging;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use queuectl_db::Database;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = logging::init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let db = Database::connect(&cli.db)
        .await
        .with_context(|| format!("failed to open queue database at {}", cli.db))?;

    let mut stdout = std::io::stdout();
    let result = commands::execute(cli.command, &db, &mut stdout).await;
    db.close().await;
    result
}
