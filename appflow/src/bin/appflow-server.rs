//! appflow-server: exposes the appflow tools over stdio or HTTP.
//!
//! Logs go to stderr so stdout stays a clean JSON-RPC channel.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use appflow::config::AppflowConfig;
use appflow::rpc::{StdioServer, ToolExecutor};
use appflow::workflow::Orchestrator;

#[derive(Parser)]
#[command(name = "appflow-server")]
#[command(about = "Generate, publish and deploy applications from a prompt")]
struct Cli {
    /// Path to a JSON configuration file; `OS_*` variables override it
    #[arg(short, long, global = true, env = "APPFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve JSON-RPC on stdin/stdout
    Stdio,
    /// Serve HTTP with Server-Sent Events
    #[cfg(feature = "http-facade")]
    Http {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:3001")]
        bind: std::net::SocketAddr,
    },
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let json = std::env::var("APPFLOW_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppflowConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppflowConfig::from_file(path)?;
            config.merge_env()?;
            config
        }
        None => AppflowConfig::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref()).context("Failed to load configuration")?;
    let orchestrator =
        Arc::new(Orchestrator::from_config(&config).context("Invalid configuration")?);
    info!(
        hostname = %config.hostname,
        base_address = orchestrator.base_address(),
        "Starting appflow-server"
    );

    let credentials = orchestrator.credentials().clone();
    tokio::spawn(async move { credentials.warm_up().await });

    let executor = ToolExecutor::new(orchestrator);
    match cli.command {
        Command::Stdio => {
            let server = StdioServer::new(executor);
            tokio::select! {
                result = server.run() => result.context("stdio server failed")?,
                _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
            }
        }
        #[cfg(feature = "http-facade")]
        Command::Http { bind } => {
            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("Failed to bind {bind}"))?;
            let shutdown = async {
                // An error here means no signal handler; keep serving.
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
                info!("Interrupted, shutting down");
            };
            appflow::rpc::http::serve(listener, executor, shutdown)
                .await
                .context("HTTP server failed")?;
        }
    }

    Ok(())
}
