use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use chitchat_identity::FirebaseIdentity;
use chitchat_server::ServerConfig;
use chitchat_store::Database;
use chitchat_telemetry::TelemetryConfig;

/// Real-time messaging backend: REST CRUD plus per-room WebSocket fan-out.
#[derive(Debug, Parser)]
#[command(name = "chitchat", version)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Path to the SQLite database. Defaults to ~/.chitchat/database/chat.db.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Emit JSON-formatted logs to stdout.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = chitchat_dir();
    let _telemetry = chitchat_telemetry::init_telemetry(TelemetryConfig {
        json_output: args.json_logs,
        log_db_path: data_dir.join("database/logs.db"),
        ..Default::default()
    });

    tracing::info!("starting chitchat server");

    let db_path = args.db.unwrap_or_else(|| data_dir.join("database/chat.db"));
    let db = Database::open(&db_path).context("failed to open database")?;

    let api_key = std::env::var("FIREBASE_API_KEY")
        .context("FIREBASE_API_KEY must be set")?;
    let identity = Arc::new(FirebaseIdentity::new(api_key.into()));

    let mut config = ServerConfig {
        port: args.port,
        ..Default::default()
    };
    if let Ok(origins) = std::env::var("CHITCHAT_ALLOWED_ORIGINS") {
        config.allowed_origins = origins
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }

    let port = config.port;
    let _handle = chitchat_server::start(config, db, identity)
        .await
        .context("failed to start server")?;

    tracing::info!(port = port, "chitchat server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    Ok(())
}

fn chitchat_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".chitchat")
}
