//! Command-line interface of the `ksdb` binary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ksdb_common::config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use crate::{logging, serve, Runtime};

/// Karaoke song database server
#[derive(Parser, Debug)]
#[command(name = "ksdb")]
#[command(about = "Karaoke song database: UltraStar library with media storage")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "KSDB_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server and background workers
    Server {
        /// Listen address, overrides `server.address`
        #[arg(short, long)]
        address: Option<String>,
    },
    /// Apply database migrations and exit
    Migrate,
    /// Print version and build information
    Version,
    /// Check a running server
    Health {
        /// Base URL of the server
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Version => {
            println!(
                "ksdb {} (git {}, built {}, {})",
                env!("CARGO_PKG_VERSION"),
                env!("GIT_HASH"),
                env!("BUILD_TIMESTAMP"),
                env!("BUILD_PROFILE")
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Health { url } => health(&url).await,
        Command::Migrate => {
            let config = load_config(cli.config, None)?;
            logging::init(&config.logging.level)?;
            let pool = ksdb_common::db::connect(&config.database.path).await?;
            let version = ksdb_common::db::run_migrations(&pool).await?;
            pool.close().await;
            println!("Schema version {}", version);
            Ok(ExitCode::SUCCESS)
        }
        Command::Server { address } => {
            let config = load_config(cli.config, address)?;
            logging::init(&config.logging.level)?;
            run_server(config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<PathBuf>, address: Option<String>) -> Result<Config> {
    let mut config = Config::load(path.as_deref())?;
    if let Some(address) = address {
        config.server.address = address;
        config.validate()?;
    }
    Ok(config)
}

async fn run_server(config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        "Starting ksdb"
    );

    let address = config.server.address.clone();
    let runtime = Runtime::bootstrap(config).await?;

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;
    info!("Listening on http://{}", address);
    info!("Health check: http://{}/health", address);

    serve(runtime, listener, shutdown_signal()).await
}

/// GET `<url>/health`; success only for a 2xx answer
async fn health(url: &str) -> Result<ExitCode> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let endpoint = format!("{}/health", url.trim_end_matches('/'));

    match client
        .get(&endpoint)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
    {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            println!("{} {}", status.as_u16(), body);
            if status.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }
        Err(e) => {
            eprintln!("{} is unreachable: {}", endpoint, e);
            Ok(ExitCode::from(1))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_server_with_global_config() {
        let cli = Cli::try_parse_from([
            "ksdb",
            "server",
            "--address",
            "0.0.0.0:9000",
            "--config",
            "/etc/ksdb.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/ksdb.toml")));
        assert!(matches!(
            cli.command,
            Command::Server { address: Some(ref a) } if a == "0.0.0.0:9000"
        ));
    }

    #[test]
    fn test_bad_address_override() {
        let err = load_config(None, Some("nowhere".to_string())).unwrap_err();
        assert!(err.to_string().contains("server.address"));
    }

    #[tokio::test]
    async fn test_health_unreachable() {
        // Port 9 (discard) on localhost is not expected to run an HTTP server
        let code = health("http://127.0.0.1:9").await.unwrap();
        assert_eq!(code, ExitCode::from(1));
    }
}
