use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use convia_license::config::Config;
use convia_license::db::{self, AppState};
use convia_license::handlers;
use convia_license::licensing::admin;

const DEFAULT_LOG_FILTER: &str = "convia_license=info,tower_http=info";

#[derive(Parser)]
#[command(name = "convia-license", version, about = "Convia license server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create the database schema and exit
    InitDb,
    /// Remove every machine binding of a license
    ResetBindings {
        #[arg(long)]
        license_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::InitDb => {
            let path = Config::database_path_from_env();
            let pool = db::init_pool(&path, 1)?;
            let conn = pool.get()?;
            db::init_db(&conn)?;
            tracing::info!(path = %path, "Database initialized");
            Ok(())
        }
        Command::ResetBindings { license_id } => {
            let pool = db::init_pool(&Config::database_path_from_env(), 1)?;
            let conn = pool.get()?;
            let removed = admin::reset_bindings(&conn, license_id)?;
            println!("Removed {} binding(s) from license {}", removed, license_id);
            Ok(())
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let pool = db::init_pool(&config.database_path, config.db_pool_size)
        .with_context(|| format!("failed to open database at {}", config.database_path))?;
    {
        let conn = pool.get()?;
        db::init_db(&conn)?;
    }

    let state = AppState::from_config(pool, &config);
    let app = handlers::router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(addr = %addr, portal_url = %config.portal_url, "Convia license server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
