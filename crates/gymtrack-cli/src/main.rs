//! gymtrack - command-line client for the gymtrack workout service.
//!
//! Browse exercises by muscle group, record completed exercises and manage
//! the signed-in profile from a terminal.

mod app;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::{App, Cli};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let command = Cli::parse().command;

    info!(?command, "gymtrack starting");

    let app = App::new().await?;
    if let Err(e) = app.run(command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
