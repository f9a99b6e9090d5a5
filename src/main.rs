use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fcad::config::{self, AppConfig};
use fcad::core::{Daemon, StateStore, Volume, copy_volume};
use fcad::error::RunError;
use fcad::logging::{self, LogConfig};
use fcad::{adapters, context, db};
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(name = "fcad")]
#[command(about = "Priority-ordered, deduplicating copies from removable drives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for removable drives and copy each one as it is attached
    Daemon(RunArgs),
    /// Copy a single, already mounted directory
    Run {
        path: PathBuf,
        #[command(flatten)]
        args: RunArgs,
    },
    /// Forget every recorded copy
    ResetState,
    /// Show recently journaled runs
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Write a default configuration file
    InitConfig,
}

#[derive(Args, Serialize)]
struct RunArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    destination_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    concurrency: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    enable_priority: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    copy_only_priority_files: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    ephemeral_state: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig = cli.command {
        return init_config(cli.config);
    }

    let overrides = match &cli.command {
        Commands::Daemon(args) | Commands::Run { args, .. } => Some(args),
        _ => None,
    };
    let config = AppConfig::load(cli.config.as_deref(), overrides)
        .context("Failed to load configuration")?;

    // A subscriber installed by an embedding process wins.
    let _ = logging::init(LogConfig::from(&config));

    match cli.command {
        Commands::Daemon(_) => run_daemon(config).await.context("Daemon failed")?,
        Commands::Run { path, .. } => run_once(config, path).await?,
        Commands::ResetState => reset_state(&config).context("Failed to reset state")?,
        Commands::History { limit } => show_history(&config, limit)
            .await
            .context("Failed to read run journal")?,
        Commands::InitConfig => {}
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let enumerator: Arc<dyn adapters::DriveEnumerator> =
        Arc::from(adapters::get_enumerator(config.simulation));
    if config.simulation {
        println!("(Simulator) Type 'add <path>' or 'rm <path>' to attach or detach a drive");
    }

    let db_conn = db::init(&config.journal_file).await?;
    let ctx = context::AppContext::new(config, db_conn)?;
    let daemon = Daemon::new(ctx, enumerator);

    let token = daemon.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            token.cancel();
        }
    });

    daemon.start().await
}

async fn run_once(config: AppConfig, path: PathBuf) -> Result<()> {
    let db_conn = db::init(&config.journal_file).await?;
    let ctx = context::AppContext::new(config, db_conn)?;

    match copy_volume(&ctx, &Volume::new(path)).await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(RunError::DriveUnavailable { partial, reason, .. }) => {
            println!("{}", serde_json::to_string_pretty(&partial)?);
            anyhow::bail!("Run aborted: {}", reason)
        }
        Err(e) => Err(e).context("Run failed"),
    }
}

fn reset_state(config: &AppConfig) -> Result<()> {
    let store = StateStore::open(config.state_file.clone());
    let forgotten = store.len();
    store.reset()?;
    println!(
        "Forgot {} recorded copies ({})",
        forgotten,
        config.state_file.display()
    );
    Ok(())
}

async fn show_history(config: &AppConfig, limit: u32) -> Result<()> {
    let db_conn = db::init(&config.journal_file).await?;
    let rows = db::runs::recent(&db_conn, limit).await?;

    if rows.is_empty() {
        println!("No runs journaled yet.");
        return Ok(());
    }

    println!(
        "{:<25} {:<16} {:<10} {:>8} {:>10} {:>8} {:>14}",
        "STARTED", "VOLUME", "STATUS", "COPIED", "DUPLICATES", "FAILED", "BYTES"
    );
    for row in rows {
        println!(
            "{:<25} {:<16} {:<10} {:>8} {:>10} {:>8} {:>14}",
            row.started_at,
            row.volume_label,
            row.status,
            row.files_copied,
            row.duplicates_skipped,
            row.failures,
            row.bytes_copied
        );
        if let Some(error) = row.error {
            println!("    {}", error);
        }
    }

    Ok(())
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(config::default_config_path);
    if AppConfig::write_default(&path)? {
        println!("Wrote default configuration to {}", path.display());
    } else {
        println!("Configuration already exists at {}", path.display());
    }
    Ok(())
}
