// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Arquivista API server
//!
//! Standalone HTTP server exposing organize, history, category counts and audit.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use arquivista::config::AppConfig;
use arquivista::db::Database;
use arquivista::organizer::Organizer;
use arquivista::Result;

#[derive(Parser, Debug)]
#[command(name = "arquivista-web")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Arquivista HTTP API Server")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Open the health endpoint in a browser
    #[arg(long)]
    open: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Arquivista API v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(&args.config)?;

    if let Some(host) = args.host {
        config.web.host = host;
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }

    let db = Database::open(&config.database.path)?;
    info!("Database: {}", config.database.path.display());
    info!("Storage root: {}", config.storage_root.display());

    let mut organizer = Organizer::new(db, config.category_rules()?, &config.storage_root);
    organizer.protect(&config.database.path);
    organizer.protect(&args.config);

    if args.open {
        let url = format!("http://{}:{}/api/health", config.web.host, config.web.port);
        if let Err(e) = open_browser(&url) {
            error!("Failed to open browser: {}", e);
        }
    }

    arquivista::web::start_server(config, organizer).await
}

fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd").args(["/c", "start", url]).spawn()?;
    }
    Ok(())
}
