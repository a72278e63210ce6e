//! Vault sync CLI - inspect and run synchronization for a vault directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vaultsync_sync::{
    check_vault_health, load_config_file, HttpTransport, RequestType, SyncClient, SyncMode,
    SyncResult, SyncScheduler, SyncSettings,
};

/// Config file looked up in the vault root when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Parser)]
#[command(name = "vaultsync")]
#[command(about = "Vault sync - keep a vault directory in step with a sync server")]
#[command(version)]
struct Cli {
    /// Vault root directory.
    #[arg(long, default_value = ".")]
    vault: PathBuf,

    /// JSON configuration file (default: <vault>/config.json).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync configuration and the last baseline.
    Status,

    /// Report sync health.
    Health,

    /// Run a full sync cycle.
    Sync {
        /// Server URL overriding the configured one.
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Ask the server for its changes.
    Pull {
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Offer local changes to the server.
    Push {
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Scan the vault and list the files that would be synced.
    Manifest {
        /// Maximum number of files to list.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show local changes since the last sync.
    Diff,

    /// Sync on the configured interval until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG takes precedence over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let vault = cli
        .vault
        .canonicalize()
        .with_context(|| format!("Vault directory not found: {}", cli.vault.display()))?;
    let config = load_config(&vault, cli.config.as_deref())?;

    match cli.command {
        Commands::Status => cmd_status(&vault, &config, cli.json),
        Commands::Health => cmd_health(&vault, &config, cli.json),
        Commands::Sync { server } => {
            cmd_sync(&vault, &config, server.as_deref(), RequestType::Full, cli.json).await
        }
        Commands::Pull { server } => {
            cmd_sync(&vault, &config, server.as_deref(), RequestType::Pull, cli.json).await
        }
        Commands::Push { server } => {
            cmd_sync(&vault, &config, server.as_deref(), RequestType::Push, cli.json).await
        }
        Commands::Manifest { limit } => cmd_manifest(&vault, &config, limit).await,
        Commands::Diff => cmd_diff(&vault, &config),
        Commands::Watch => cmd_watch(&vault, &config).await,
    }
}

/// Read the configuration document, or an empty one when none exists.
fn load_config(vault: &Path, explicit: Option<&Path>) -> Result<serde_json::Value> {
    match explicit {
        Some(path) => load_config_file(path).context("Failed to load configuration"),
        None => {
            let path = vault.join(DEFAULT_CONFIG_FILE);
            if path.exists() {
                load_config_file(&path).context("Failed to load configuration")
            } else {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(serde_json::json!({}))
            }
        }
    }
}

fn open_client(vault: &Path, config: &serde_json::Value) -> Result<SyncClient<HttpTransport>> {
    let settings = SyncSettings::from_config(config).context("Invalid sync settings")?;
    SyncClient::new(vault, settings).context("Failed to create sync client")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Show sync status.
fn cmd_status(vault: &Path, config: &serde_json::Value, json: bool) -> Result<()> {
    let status = open_client(vault, config)?.status();
    if json {
        return print_json(&status);
    }

    println!("Sync status:");
    println!("  Enabled: {}", status.enabled);
    println!("  Mode: {}", status.mode);
    println!("  Server: {}", status.server_url);
    println!("  Node ID: {}", status.node_id);
    println!("  Last sync: {}", status.last_sync.as_deref().unwrap_or("never"));
    println!("  Tracked files: {}", status.tracked_files);
    println!("  Sync dirs: {}", status.sync_dirs.join(", "));

    Ok(())
}

/// Show sync health.
fn cmd_health(vault: &Path, config: &serde_json::Value, json: bool) -> Result<()> {
    let health = check_vault_health(vault, config);
    if json {
        return print_json(&health);
    }

    println!("Sync health: {}", health.status);
    println!("  {}", health.detail);
    if let Some(last_sync) = &health.last_sync {
        println!("  Last sync: {}", last_sync);
    }
    for error in &health.errors {
        println!("  Error: {}", error);
    }

    Ok(())
}

/// Run one sync cycle.
async fn cmd_sync(
    vault: &Path,
    config: &serde_json::Value,
    server: Option<&str>,
    request_type: RequestType,
    json: bool,
) -> Result<()> {
    let client = open_client(vault, config)?;
    if !client.settings().enabled {
        anyhow::bail!("Sync is not enabled. Set sync.enabled = true in the configuration");
    }

    let client = client.with_progress(|stage, current, total| {
        info!("[{}/{}] {}", current, total, stage);
    });

    let result = client.sync(server, request_type).await;
    if json {
        print_json(&result)?;
    } else {
        print_result(&result);
    }

    if !result.success {
        anyhow::bail!("Sync failed: {}", result.message);
    }
    Ok(())
}

fn print_result(result: &SyncResult) {
    if result.success {
        println!("Sync completed: {}", result.message);
    } else {
        println!("Sync did not complete: {}", result.message);
    }
    println!("  Uploaded: {}", result.uploaded);
    println!("  Downloaded: {}", result.downloaded);
    println!("  Conflicts resolved: {}", result.conflicts_resolved);
    println!("  Conflicts pending: {}", result.conflicts_pending);
    for error in &result.errors {
        println!("  Error: {}", error);
    }
}

/// List the files a fresh scan would sync.
async fn cmd_manifest(vault: &Path, config: &serde_json::Value, limit: usize) -> Result<()> {
    let client = Arc::new(open_client(vault, config)?);
    let scanner = client.clone();
    let manifest = tokio::task::spawn_blocking(move || scanner.build_manifest())
        .await
        .context("Manifest scan was interrupted")?;

    let total_size: u64 = manifest.files.values().map(|f| f.size).sum();
    println!("Manifest for {}:", client.vault_dir().display());
    println!("  Files: {}", manifest.len());
    println!("  Total size: {} bytes", total_size);

    for info in manifest.files.values().take(limit) {
        let short_hash = info.hash.get(..12).unwrap_or(&info.hash);
        println!("  {}  {:>10}  {}", short_hash, info.size, info.path);
    }
    if manifest.len() > limit {
        println!("  ... and {} more", manifest.len() - limit);
    }

    Ok(())
}

/// Show changes since the last sync.
fn cmd_diff(vault: &Path, config: &serde_json::Value) -> Result<()> {
    let client = open_client(vault, config)?;
    let Some(delta) = client.compute_local_delta() else {
        println!("No previous sync manifest; every file counts as new.");
        return Ok(());
    };

    if !delta.has_changes() {
        println!("No changes since last sync.");
        return Ok(());
    }

    println!("Changes since last sync: {}", delta.summary());
    for change in &delta.to_upload {
        println!("  + {}", change.path());
    }
    // Against the baseline, "download" means the file is gone locally.
    for change in &delta.to_download {
        println!("  - {}", change.path());
    }
    for change in &delta.conflicts {
        println!("  ! {}", change.path());
    }

    Ok(())
}

/// Run the interval scheduler until Ctrl-C.
async fn cmd_watch(vault: &Path, config: &serde_json::Value) -> Result<()> {
    let client = open_client(vault, config)?;
    let settings = client.settings().clone();
    if !settings.enabled {
        anyhow::bail!("Sync is not enabled. Set sync.enabled = true in the configuration");
    }
    if settings.server_url.is_empty() {
        anyhow::bail!("No server URL configured");
    }

    let client = Arc::new(client);
    let (scheduler, handle) = SyncScheduler::new(SyncMode::Auto, settings.auto_interval());
    let task = tokio::spawn(handle.run(move |request_type| {
        let client = client.clone();
        async move { client.sync(None, request_type).await }
    }));

    println!(
        "Watching {} (every {}s); press Ctrl-C to stop.",
        vault.display(),
        settings.auto_interval().as_secs()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping sync scheduler");
    scheduler.shutdown().await;
    task.await.context("Scheduler task failed")?;

    Ok(())
}
