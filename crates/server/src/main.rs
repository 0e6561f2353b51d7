//! Patchbay server
//!
//! Conversational threads over WebSocket in front of a shared task executor,
//! plus detached tmux job sessions with out-of-band completion notices.

mod config;
mod confirm;
mod connection;
mod error;
mod git;
mod jobs;
mod logging;
mod notify;
mod paths;
mod sessions_api;
mod state;
mod stream;
mod threads;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use patchbay_executor::CliExecutor;

use crate::config::Config;
use crate::jobs::JobSessionManager;
use crate::notify::{create_notify_channel, Notifier};
use crate::state::AppState;
use crate::websocket::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    paths::init_data_dir(config.data_dir.as_deref());
    paths::init_projects_dir(config.projects_dir.as_deref());
    paths::ensure_dirs()?;

    let _logging = logging::init_logging(&paths::log_dir())?;

    info!(
        component = "main",
        event = "server.starting",
        port = config.port,
        projects_dir = %paths::projects_dir().display(),
        "Starting patchbay server"
    );

    // Notification worker
    let (notify_tx, notify_rx) = create_notify_channel();
    let notifier = Notifier::new(
        notify_rx,
        config.telegram_bot_token.clone(),
        config.telegram_chat_id.clone(),
    );
    tokio::spawn(notifier.run());

    // Executor worker
    let (exec_tx, exec_rx) = mpsc::channel(32);
    let executor = CliExecutor::new(
        config.executor_bin.clone(),
        Duration::from_secs(config.executor_timeout_secs),
    );
    tokio::spawn(executor.run(exec_rx));

    let jobs = JobSessionManager::new(
        paths::projects_dir(),
        paths::log_dir(),
        paths::script_dir(),
        config.executor_bin.clone(),
        notify_tx,
    )
    .with_env_file(paths::env_file_path());

    let state = Arc::new(AppState::new(jobs, exec_tx, paths::projects_dir()));

    // Build router
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(sessions_api::health))
        .route("/sessions", get(sessions_api::list_sessions))
        .route("/sessions/kill", post(sessions_api::kill_session))
        .route("/jobs", post(sessions_api::launch_job))
        .route("/jobs/{session}/log", get(sessions_api::job_log))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
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
