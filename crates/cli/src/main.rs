mod config;
mod error;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use relay::{Relay, StorePair, StoreRole};
use storage::{SqliteStore, StoreHandle};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "breaklog.toml";

#[derive(Parser)]
#[command(name = "breaklog")]
#[command(about = "Replicates attendance events into two stores", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept events and replicate them (default)
    Serve,
    /// Probe both stores and show their row counts
    Status,
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Serve) | None => cmd_serve(config).await,
        Some(Commands::Status) => cmd_status(config).await,
    }
}

async fn cmd_serve(config: Config) -> Result<()> {
    let stores = open_stores(&config)?;
    let relay = Relay::new(stores, config.relay_config());

    let tcp = TcpListener::bind(config.listen_addr.as_str()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    relay.run(tcp, shutdown_rx).await?;
    Ok(())
}

async fn cmd_status(config: Config) -> Result<()> {
    let stores = open_stores(&config)?;
    let timeout = config.relay_config().store_timeout;

    println!(
        "{:<10}  {:<8}  {:>10}  {:>10}  {:>10}",
        "STORE", "HEALTH", "ATTENDANCE", "PAUSES", "AUDITS"
    );
    println!("{}", "-".repeat(56));

    for role in StoreRole::ALL {
        let store = stores.get(role);
        let health = match relay::bounded(timeout, store.probe()).await {
            Ok(()) => "up",
            Err(_) => "down",
        };
        let counts = store.counts()?;
        println!(
            "{:<10}  {:<8}  {:>10}  {:>10}  {:>10}",
            role.to_string(),
            health,
            counts.attendance,
            counts.pauses,
            counts.audits
        );
    }

    Ok(())
}

/// Both stores must open; the process does not start with only one.
fn open_stores(config: &Config) -> Result<StorePair<SqliteStore>> {
    let open = |role: StoreRole, path: &Path| {
        SqliteStore::open(path).map_err(|source| Error::StoreOpen {
            role,
            path: path.display().to_string(),
            source,
        })
    };

    let primary = open(StoreRole::Primary, &config.stores.primary)?;
    let secondary = open(StoreRole::Secondary, &config.stores.secondary)?;
    info!(
        primary = %config.stores.primary.display(),
        secondary = %config.stores.secondary.display(),
        "stores opened"
    );
    Ok(StorePair::new(primary, secondary))
}

/// A missing file at the default location means defaults; a missing file
/// that was asked for explicitly is an error.
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else if path.as_os_str() == CONFIG_FILE {
        Ok(Config::default_config())
    } else {
        Err(config::ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        ))
        .into())
    }
}
