//! Hireloop Server
//!
//! Coordination engine for realtime technical interviews.
//! Joins candidates and companies into session rooms over WebSocket and
//! drives the answer-scoring pipeline.

mod analysis;
mod error;
mod flow;
mod lifecycle;
mod logging;
mod migration_runner;
mod registry;
mod room;
mod room_actor;
mod room_command;
mod scoring;
mod store;
mod websocket;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{response::IntoResponse, routing::get, Router};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::analysis::OpenAiAnalyzer;
use crate::logging::init_logging;
use crate::registry::{EngineConfig, SessionRegistry};
use crate::store::Store;
use crate::websocket::ws_handler;

#[derive(Debug, Parser)]
#[command(name = "hireloop", about = "Interview session coordination server")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "HIRELOOP_PORT", default_value_t = 4000)]
    port: u16,

    /// SQLite database path (defaults to ~/.hireloop/hireloop.db)
    #[arg(long, env = "HIRELOOP_DB")]
    db: Option<PathBuf>,

    /// Hard cap on a single answer analysis, in seconds
    #[arg(long, env = "HIRELOOP_ANALYSIS_TIMEOUT_SECS", default_value_t = 30)]
    analysis_timeout_secs: u64,

    /// Category the automatic answer-score rollup is written into
    #[arg(long, env = "HIRELOOP_AUTO_SCORE_CATEGORY", default_value = "Technical")]
    auto_score_category: String,

    /// OpenAI model used for answer analysis
    #[arg(long, env = "HIRELOOP_OPENAI_MODEL", default_value = "gpt-4.1-mini")]
    openai_model: String,
}

fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".hireloop").join("hireloop.db")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _logging = init_logging()?;

    info!(
        component = "main",
        event = "server.starting",
        port = args.port,
        "Starting hireloop server"
    );

    let db_path = args.db.clone().unwrap_or_else(default_db_path);
    let store = Store::open(&db_path).await?;
    info!(
        component = "main",
        event = "store.opened",
        db_path = %db_path.display(),
        "Database ready"
    );

    let analyzer = Arc::new(OpenAiAnalyzer::new(
        args.openai_model.clone(),
        Duration::from_secs(args.analysis_timeout_secs),
    ));
    let registry = Arc::new(SessionRegistry::new(
        store,
        analyzer,
        EngineConfig {
            auto_score_category: args.auto_score_category.clone(),
        },
    ));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(registry);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(
        component = "main",
        event = "server.listening",
        addr = %addr,
        "Listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
