//! Stride realtime server binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use stride_realtime::state::{AppState, ServerConfig};
use stride_realtime::storage::{MemoryChatStore, MemoryUserDirectory};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "stride-realtime",
    version,
    about = "Stride real-time messaging and call-signaling server"
)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "REALTIME_PORT")]
    port: u16,

    /// Seconds a call may ring before the server auto-ends it
    #[arg(long, default_value_t = 45, env = "CALL_RING_TIMEOUT_SECS")]
    call_ring_timeout_secs: i64,

    /// Seconds an ended call session is kept before sweeping
    #[arg(long, default_value_t = 60, env = "ENDED_CALL_RETENTION_SECS")]
    ended_call_retention_secs: i64,

    /// Cleanup interval in seconds
    #[arg(long, default_value_t = 15, env = "CLEANUP_INTERVAL_SECS")]
    cleanup_interval_secs: u64,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stride_realtime=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = ServerConfig {
        port: args.port,
        call_ring_timeout_secs: args.call_ring_timeout_secs,
        ended_call_retention_secs: args.ended_call_retention_secs,
        cleanup_interval_secs: args.cleanup_interval_secs,
    };

    let state = AppState::new(
        config,
        Arc::new(MemoryChatStore::new()),
        Arc::new(MemoryUserDirectory::new()),
    );

    // Spawn periodic cleanup: time out ringing calls, sweep ended sessions
    let cleanup_state = state.clone();
    let cleanup_interval = state.config.cleanup_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval));
        loop {
            interval.tick().await;
            stride_realtime::handler::cleanup_tick(&cleanup_state);
        }
    });

    let app = stride_realtime::create_app(state.clone());

    let addr = format!("0.0.0.0:{}", state.config.port);
    tracing::info!("Stride realtime server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
