//! mediablob -- serve and manage media stored in Azure Blob Storage.
//!
//! `serve` provisions every configured file system and serves its media
//! route; `check`, `ls` and `put` work against a single file system.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mediablob::config::{Config, LoggingConfig};
use mediablob::filesystem::{BlobFileSystem, ALL_FILES};
use mediablob::registry::{factory_for, FileSystemRegistry};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for mediablob.
#[derive(Parser, Debug)]
#[command(
    name = "mediablob",
    version,
    about = "Azure Blob Storage backed media file system"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "mediablob.yaml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve media routes over HTTP (the default).
    Serve {
        /// Override the bind address (host:port).
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Check that a file system can reach its container.
    Check {
        #[arg(short, long, default_value = "media")]
        alias: String,
    },
    /// List the directories and files under a path.
    Ls {
        #[arg(short, long, default_value = "media")]
        alias: String,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Upload a local file.
    Put {
        #[arg(short, long, default_value = "media")]
        alias: String,
        /// Destination path in the file system.
        path: String,
        /// Local file to upload.
        file: PathBuf,
        /// Fail instead of replacing an existing file.
        #[arg(long)]
        no_overwrite: bool,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = mediablob::config::load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Check { alias } => check(&config, &alias).await,
        Command::Ls { alias, path } => {
            let fs = open(&config, &alias).await?;
            for dir in fs.get_directories(&path).await? {
                println!("{dir}/");
            }
            for file in fs.get_files(&path, ALL_FILES).await? {
                println!("{file}");
            }
            Ok(())
        }
        Command::Put {
            alias,
            path,
            file,
            no_overwrite,
        } => {
            let fs = open(&config, &alias).await?;
            let reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            fs.add_file_from_reader(&path, reader, !no_overwrite).await?;
            println!("{}", fs.get_url(&path));
            Ok(())
        }
    }
}

async fn open(config: &Config, alias: &str) -> anyhow::Result<Arc<BlobFileSystem>> {
    let registry = FileSystemRegistry::new(factory_for(&config.storage_backend)?);
    Ok(registry.get_or_create(config.filesystem(alias)?).await?)
}

async fn check(config: &Config, alias: &str) -> anyhow::Result<()> {
    let factory = factory_for(&config.storage_backend)?;
    let report = mediablob::check::check_connection(config, alias, factory.as_ref()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.status.is_ok() {
        anyhow::bail!("Connection check failed: {:?}", report.status);
    }
    Ok(())
}

async fn serve(config: Config, bind: Option<String>) -> anyhow::Result<()> {
    let bind_addr =
        bind.unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout);

    if config.observability.metrics {
        mediablob::metrics::init_metrics();
        mediablob::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let registry = Arc::new(FileSystemRegistry::new(factory_for(
        &config.storage_backend,
    )?));
    let state = Arc::new(mediablob::AppState::build(config, registry).await?);
    info!(
        "{} file system(s) provisioned, {} media route(s)",
        state.filesystems.len(),
        state.media.len()
    );

    let app = mediablob::server::app(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("mediablob listening on {}", bind_addr);

    // On SIGTERM/SIGINT stop accepting connections and give in-flight
    // requests `shutdown_timeout` seconds to finish.
    let stopping = Arc::new(Notify::new());
    let signal = {
        let stopping = stopping.clone();
        async move {
            shutdown_signal().await;
            stopping.notify_one();
        }
    };
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(drain_timeout).await;
        } => warn!("Shutdown timeout of {:?} elapsed, exiting", drain_timeout),
    }

    info!("mediablob shut down");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
