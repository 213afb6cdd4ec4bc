use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use parley_api::credentials::CredentialStore;
use parley_server::config::Config;
use parley_server::{build_router, build_state, maintenance};

#[derive(Parser)]
#[command(name = "parley", version, about = "Authenticated real-time chat relay")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP + WebSocket server (default)
    Serve,
    /// Provision a user. The password is read from PARLEY_NEW_PASSWORD or stdin.
    AddUser { username: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(parley_db::Database::open(&config.db_path)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(db, config).await,
        Command::AddUser { username } => add_user(db, &username).await,
    }
}

async fn serve(db: Arc<parley_db::Database>, config: Config) -> anyhow::Result<()> {
    let state = build_state(db, &config)?;

    tokio::spawn(maintenance::run_maintenance_loop(
        state.clone(),
        config.db_ping_interval,
    ));

    let app = build_router(state, &config.static_dir);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley server listening on {}", addr);
    info!(
        "Sessions expire after {} hours; history replay is {} messages",
        config.session_ttl.num_hours(),
        config.history_limit
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn add_user(db: Arc<parley_db::Database>, username: &str) -> anyhow::Result<()> {
    let password = match std::env::var("PARLEY_NEW_PASSWORD") {
        Ok(password) => password,
        Err(_) => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        bail!("empty password");
    }

    let user_id = CredentialStore::new(db).provision(username, &password).await?;
    info!("Created user {} ({})", username, user_id);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
