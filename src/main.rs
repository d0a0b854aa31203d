//! sodastore -- image storage on SODA JSON document collections.
//!
//! `sodastore serve` runs the HTTP endpoint; the other subcommands run a
//! single storage operation against the configured accounts.

use std::future::IntoFuture;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use sodastore::config::{Config, LoggingConfig};
use sodastore::pool::AccountPool;
use sodastore::storage::{Image, ImageStorage};

/// Command-line arguments for sodastore.
#[derive(Parser, Debug)]
#[command(
    name = "sodastore",
    version,
    about = "Image storage on SODA JSON document collections"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "sodastore.yaml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve stored images over HTTP (default).
    Serve {
        /// Override the bind address (host:port).
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Store a file and print its public URL.
    Save {
        /// File to upload.
        file: PathBuf,
        /// Target directory (default: current YYYY/MM).
        #[arg(short, long)]
        dir: Option<String>,
        /// MIME type (default: guessed from the extension).
        #[arg(short = 't', long)]
        content_type: Option<String>,
    },
    /// Read a stored file.
    Read {
        /// Stored path, e.g. /2024/05/cat.png.
        path: String,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Check whether a file is stored.
    Exists {
        name: String,
        #[arg(short, long)]
        dir: String,
    },
    /// Delete a stored file.
    Delete {
        name: String,
        #[arg(short, long)]
        dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = sodastore::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let pool = AccountPool::from_config(
        &config.accounts,
        Duration::from_secs(config.storage.request_timeout_secs),
    )?;
    info!("Account pool initialized with {} account(s)", pool.len());
    let storage = ImageStorage::new(pool, &config.storage.url_prefix);

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => serve(config, storage, bind).await?,
        Command::Save {
            file,
            dir,
            content_type,
        } => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow::anyhow!("{} has no file name", file.display()))?;
            let content_type = content_type.unwrap_or_else(|| guess_content_type(&name).to_string());
            let image = Image {
                path: file,
                name,
                content_type,
            };
            let url = storage.save(&image, dir.as_deref()).await?;
            println!("{url}");
        }
        Command::Read { path, out } => {
            let data = storage.read(&path).await?;
            match out {
                Some(out) => tokio::fs::write(&out, &data).await?,
                None => std::io::stdout().write_all(&data)?,
            }
        }
        Command::Exists { name, dir } => {
            println!("{}", storage.exists(&name, &dir).await);
        }
        Command::Delete { name, dir } => {
            println!("{}", storage.delete(&name, dir.as_deref()).await);
        }
    }

    Ok(())
}

async fn serve(config: Config, storage: ImageStorage, bind: Option<String>) -> anyhow::Result<()> {
    if config.observability.metrics {
        sodastore::metrics::init_metrics()?;
        sodastore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let bind_addr =
        bind.unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);

    let state = Arc::new(sodastore::AppState { config, storage });
    let app = sodastore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("sodastore listening on {}", bind_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    let mut server = std::pin::pin!(server.into_future());

    // Once a signal arrives, give in-flight requests `shutdown_timeout` to finish.
    tokio::select! {
        result = &mut server => result?,
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            tracing::warn!("Shutdown timeout elapsed, exiting with requests in flight");
        }
    }

    info!("sodastore shut down");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn guess_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
