// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Arquivista: per-owner file organizer
//!
//! Command line front end for organizing folders and reading the catalog.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use arquivista::catalog::CatalogStore;
use arquivista::config::AppConfig;
use arquivista::db::Database;
use arquivista::organizer::{CollisionPolicy, FileOutcome, OrganizeReport, Organizer};
use arquivista::watcher::{should_trigger, wait_for_stable, InboxWatcher, WatchEvent};
use arquivista::{ArquivistaError, Owner, Result};

/// Arquivista CLI - sort files into per-owner category folders
#[derive(Parser, Debug)]
#[command(name = "arquivista")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Sort files into per-owner category folders and keep a catalog", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Organize the files of a directory
    Organize {
        /// Owner whose storage tree receives the files
        #[arg(short, long)]
        owner: String,

        /// Directory to organize (not recursive)
        #[arg(short, long)]
        dir: PathBuf,

        /// What to do when the destination name is taken
        #[arg(long, value_parser = ["reject", "overwrite", "rename"])]
        on_conflict: Option<String>,
    },

    /// List organized files of an owner, oldest first
    History {
        #[arg(short, long)]
        owner: String,

        /// Show only the most recent N entries
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Count organized files per category
    Stats {
        #[arg(short, long)]
        owner: String,
    },

    /// Compare an owner's storage tree with the catalog
    Audit {
        #[arg(short, long)]
        owner: String,
    },

    /// Watch a directory and organize files as they arrive
    Watch {
        /// Owner (overrides config)
        #[arg(short, long)]
        owner: Option<String>,

        /// Directory to watch (overrides config)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        #[arg(long, value_parser = ["reject", "overwrite", "rename"])]
        on_conflict: Option<String>,
    },

    /// Serve the HTTP API
    Serve {
        #[arg(short = 'H', long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Initialize a new Arquivista project
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Organize { owner, dir, on_conflict } => {
            let policy = pick_policy(on_conflict.as_deref(), &config)?;
            run_organize(&config, &cli.config, owner, dir, policy, &cli.format).await
        }
        Commands::History { owner, count } => run_history(&config, &cli.config, owner, count, &cli.format),
        Commands::Stats { owner } => run_stats(&config, &cli.config, owner, &cli.format),
        Commands::Audit { owner } => run_audit(&config, &cli.config, owner, &cli.format).await,
        Commands::Watch { owner, dir, on_conflict } => {
            let policy = pick_policy(on_conflict.as_deref(), &config)?;
            run_watch(config, cli.config.clone(), owner, dir, policy).await
        }
        Commands::Serve { host, port } => run_serve(config, &cli.config, host, port).await,
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        Commands::Init { dir, force } => run_init(dir, force),
    }
}

fn pick_policy(flag: Option<&str>, config: &AppConfig) -> Result<CollisionPolicy> {
    match flag {
        Some(value) => value.parse(),
        None => Ok(config.organize.on_conflict),
    }
}

/// Open the catalog and build an organizer that never moves its own files
fn build_organizer(config: &AppConfig, config_path: &Path) -> Result<Organizer<Database>> {
    let db = Database::open(&config.database.path)?;
    let db_file = db.file_path()?;
    let stats = db.get_stats()?;
    debug!(
        "Database opened: {:?} ({} records, {} owners)",
        config.database.path, stats.record_count, stats.owner_count
    );

    let mut organizer = Organizer::new(db, config.category_rules()?, &config.storage_root);
    organizer.protect(&config.database.path);
    if let Some(db_file) = db_file {
        organizer.protect(&db_file);
    }
    organizer.protect(config_path);
    Ok(organizer)
}

async fn run_organize(
    config: &AppConfig,
    config_path: &Path,
    owner: String,
    dir: PathBuf,
    policy: CollisionPolicy,
    format: &str,
) -> Result<()> {
    let owner = Owner::new(owner)?;
    let organizer = build_organizer(config, config_path)?;

    let report = tokio::task::spawn_blocking(move || organizer.organize(&owner, &dir, policy))
        .await
        .map_err(|e| ArquivistaError::Config(format!("organize task failed: {}", e)))??;

    print_report(&report, format)?;

    let stranded = report.needs_reconciliation();
    if !stranded.is_empty() {
        error!(
            "{} file(s) were moved but could not be cataloged; run `arquivista audit --owner {}`",
            stranded.len(),
            report.owner
        );
    }
    Ok(())
}

fn print_report(report: &OrganizeReport, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(report)?),
        "jsonl" => {
            for entry in &report.entries {
                println!("{}", serde_json::to_string(entry)?);
            }
        }
        _ => {
            if report.is_empty() {
                println!("Nothing to organize in {}", report.source.display());
                return Ok(());
            }
            for entry in &report.entries {
                match entry {
                    FileOutcome::Moved { name, category, destination, renamed_from, replaced, .. } => {
                        let renamed = renamed_from
                            .as_ref()
                            .map(|from| format!(" (was {})", from))
                            .unwrap_or_default();
                        let replaced = replaced
                            .map(|id| format!(", replaces record {}", id))
                            .unwrap_or_default();
                        println!(
                            "  moved    [{}] {}{} -> {}{}",
                            category.to_uppercase(),
                            name,
                            renamed,
                            destination.display(),
                            replaced
                        );
                    }
                    FileOutcome::Skipped { name, reason } => {
                        println!("  skipped  {} ({})", name, reason);
                    }
                    FileOutcome::Failed { name, error } => {
                        println!("  failed   {}: {}", name, error);
                    }
                }
            }
            println!(
                "\n{} moved, {} skipped, {} failed",
                report.moved(),
                report.skipped(),
                report.failed()
            );
        }
    }
    Ok(())
}

fn run_history(
    config: &AppConfig,
    config_path: &Path,
    owner: String,
    count: Option<usize>,
    format: &str,
) -> Result<()> {
    let owner = Owner::new(owner)?;
    let organizer = build_organizer(config, config_path)?;

    let mut records = organizer.history(&owner).collect_all()?;
    if let Some(count) = count {
        let skip = records.len().saturating_sub(count);
        records.drain(..skip);
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        "jsonl" => {
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        _ => {
            if records.is_empty() {
                println!("No files organized yet for {}.", owner);
                return Ok(());
            }
            println!("History of {} ({} entries):", owner, records.len());
            for record in &records {
                println!(
                    "  {} {} | category: {} | location: {}",
                    record.organized_at.format("%Y-%m-%d %H:%M"),
                    record.name,
                    record.category,
                    record.path.display()
                );
            }
        }
    }
    Ok(())
}

fn run_stats(config: &AppConfig, config_path: &Path, owner: String, format: &str) -> Result<()> {
    let owner = Owner::new(owner)?;
    let organizer = build_organizer(config, config_path)?;
    let counts = organizer.store().category_counts(&owner)?;

    if format != "text" {
        println!("{}", serde_json::to_string_pretty(&counts)?);
        return Ok(());
    }

    println!("Categories of {}:", owner);
    for (category, count) in &counts {
        println!("  {:<24} {}", category, count);
    }
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    println!("  {:<24} {}", "total", total);
    Ok(())
}

async fn run_audit(config: &AppConfig, config_path: &Path, owner: String, format: &str) -> Result<()> {
    let owner = Owner::new(owner)?;
    let organizer = build_organizer(config, config_path)?;

    let audit = tokio::task::spawn_blocking(move || organizer.audit(&owner))
        .await
        .map_err(|e| ArquivistaError::Config(format!("audit task failed: {}", e)))??;

    if format != "text" {
        println!("{}", serde_json::to_string_pretty(&audit)?);
        return Ok(());
    }

    if audit.is_consistent() {
        println!("Storage of {} matches the catalog.", audit.owner);
        return Ok(());
    }
    for record in &audit.missing {
        println!("  missing    {} (record {})", record.file_path().display(), record.id);
    }
    for path in &audit.untracked {
        println!("  untracked  {}", path.display());
    }
    for record in &audit.superseded {
        println!("  superseded {} (record {})", record.file_path().display(), record.id);
    }
    println!(
        "\n{} missing, {} untracked, {} superseded",
        audit.missing.len(),
        audit.untracked.len(),
        audit.superseded.len()
    );
    Ok(())
}

/// Run the watch mode (organize on arrival)
async fn run_watch(
    config: AppConfig,
    config_path: PathBuf,
    owner: Option<String>,
    dir: Option<PathBuf>,
    policy: CollisionPolicy,
) -> Result<()> {
    let owner = owner
        .or_else(|| config.watch.owner.clone())
        .ok_or_else(|| ArquivistaError::Config("watch mode needs --owner or watch.owner".to_string()))?;
    let owner = Owner::new(owner)?;
    let inbox = dir.unwrap_or_else(|| config.watch.inbox.clone());
    let stability_timeout = Duration::from_secs(config.watch.stability_timeout_secs);

    let organizer = Arc::new(build_organizer(&config, &config_path)?);
    let watcher = InboxWatcher::new(&inbox, Duration::from_secs(config.watch.poll_interval_secs))?;

    // One organize pass at a time over the inbox
    let pass_lock = Arc::new(Mutex::new(()));

    info!("Organizing existing files in {:?}", inbox);
    organize_pass(&organizer, &pass_lock, &owner, &inbox, policy).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = terminate => info!("Received SIGTERM, shutting down..."),
        }

        let _ = shutdown_tx.send(true);
    });

    info!("Watching {:?} for {}. Press Ctrl+C to stop.", watcher.inbox(), owner);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Blocking poll keeps the notify receiver off the async workers
        let event = tokio::task::block_in_place(|| watcher.next_event(Duration::from_millis(100)));
        match event {
            Some(WatchEvent::FileArrived(path)) => {
                if !should_trigger(&path) {
                    debug!("Ignoring {:?}", path);
                    continue;
                }
                let organizer = Arc::clone(&organizer);
                let pass_lock = Arc::clone(&pass_lock);
                let owner = owner.clone();
                let inbox = inbox.clone();
                tokio::spawn(async move {
                    if !wait_for_stable(&path, stability_timeout).await {
                        debug!("File disappeared during stability check: {:?}", path);
                        return;
                    }
                    organize_pass(&organizer, &pass_lock, &owner, &inbox, policy).await;
                });
            }
            Some(WatchEvent::Error(e)) => warn!("Watch error: {}", e),
            None => {}
        }
    }

    info!("Arquivista stopped.");
    Ok(())
}

async fn organize_pass(
    organizer: &Arc<Organizer<Database>>,
    pass_lock: &Arc<Mutex<()>>,
    owner: &Owner,
    inbox: &Path,
    policy: CollisionPolicy,
) {
    let _pass = pass_lock.lock().await;
    let worker = Arc::clone(organizer);
    let owner = owner.clone();
    let inbox = inbox.to_path_buf();

    match tokio::task::spawn_blocking(move || worker.organize(&owner, &inbox, policy)).await {
        Ok(Ok(report)) => {
            for entry in &report.entries {
                if let FileOutcome::Failed { name, error } = entry {
                    warn!("{}: {}", name, error);
                }
            }
            if !report.is_empty() {
                info!(
                    "{} moved, {} skipped, {} failed",
                    report.moved(),
                    report.skipped(),
                    report.failed()
                );
            }
        }
        Ok(Err(e)) => error!("Organize pass failed: {}", e),
        Err(e) => error!("Organize task panicked: {}", e),
    }
}

async fn run_serve(
    mut config: AppConfig,
    config_path: &Path,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(host) = host {
        config.web.host = host;
    }
    if let Some(port) = port {
        config.web.port = port;
    }
    let organizer = build_organizer(&config, config_path)?;
    arquivista::web::start_server(config, organizer).await
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Storage root: {}", config.storage_root.display());
            println!("  Database: {}", config.database.path.display());
            println!("  Categories: {} extensions", config.categories.len());
            println!("  On conflict: {}", config.organize.on_conflict);
        }
    }

    Ok(())
}

/// Initialize a new Arquivista project
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(ArquivistaError::Config(
            "config.json already exists. Use --force to overwrite".to_string(),
        ));
    }

    let inbox = target.join("inbox");
    let storage = target.join("storage");
    std::fs::create_dir_all(&inbox)?;
    std::fs::create_dir_all(&storage)?;

    let mut config = AppConfig::default();
    config.watch.inbox = inbox;
    config.storage_root = storage;
    config.database.path = target.join("arquivista.db");
    config.save(&config_path)?;

    println!("Arquivista initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - inbox/");
    println!("  - storage/");
    println!("\nNext steps:");
    println!("  1. Drop files into inbox/");
    println!("  2. arquivista organize --owner <name> --dir inbox");

    Ok(())
}
