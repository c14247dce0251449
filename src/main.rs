use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cad_dispatch_lib::config::Config;
use cad_dispatch_lib::db::open_sqlite_pool;
use cad_dispatch_lib::logging::init_logging;
use cad_dispatch_lib::migrate::{applied_migrations, apply_migrations};
use cad_dispatch_lib::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "cad-dispatch", about = "Computer-aided dispatch core service", version)]
struct Cli {
    /// TOML configuration file; missing file means defaults.
    #[arg(long, env = "CAD_DISPATCH_CONFIG", default_value = "cad-dispatch.toml")]
    config: PathBuf,

    /// Override the SQLite database path.
    #[arg(long, env = "CAD_DISPATCH_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply migrations and serve the HTTP API.
    Serve {
        #[arg(long, env = "CAD_DISPATCH_LISTEN")]
        listen: Option<SocketAddr>,
    },
    /// Apply pending migrations and exit.
    Migrate,
    /// Print applied migrations as JSON.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    if let Command::Serve {
        listen: Some(listen),
    } = &cli.command
    {
        config.server.listen = *listen;
    }

    let _log_guard = init_logging(&config.logging).context("initialize logging")?;

    let pool = open_sqlite_pool(&config.database.path)
        .await
        .with_context(|| format!("open database {}", config.database.path.display()))?;

    match cli.command {
        Command::Migrate => {
            apply_migrations(&pool).await.context("apply migrations")?;
            tracing::info!(target: "cad_dispatch", event = "migrations_complete");
        }
        Command::Status => {
            let applied = applied_migrations(&pool).await.context("read migration ledger")?;
            println!("{}", serde_json::to_string_pretty(&applied)?);
        }
        Command::Serve { .. } => {
            apply_migrations(&pool).await.context("apply migrations")?;
            serve(AppState::new(pool.clone(), config)).await?;
        }
    }

    pool.close().await;
    Ok(())
}

async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.server.listen;
    let app = cad_dispatch_lib::http::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(target: "cad_dispatch", event = "server_listening", addr = %addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;
    tracing::info!(target: "cad_dispatch", event = "server_stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "cad_dispatch", event = "signal_listener_failed", error = %err);
        std::future::pending::<()>().await;
    }
}
