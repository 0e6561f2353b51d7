//! Patchbay Executor
//!
//! The seam between the protocol server and whatever actually runs tasks.
//! The server sends an [`ExecRequest`] per streaming cycle; the adapter
//! answers with [`ExecEvent`]s on the request's channel and always finishes
//! with exactly one terminal event (`Completed` or `Failed`).

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub mod cli;

pub use cli::CliExecutor;

/// Errors that can occur while driving the executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Process communication error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Events emitted while a task executes
#[derive(Debug)]
pub enum ExecEvent {
    /// Incremental output text.
    Chunk(String),

    /// Progress marker (tool use, thinking, ...).
    Step(String),

    /// The executor paused and wants a yes/no decision before continuing.
    /// Send the decision into `reply`; a dropped sender reads as declined.
    Confirm {
        prompt: String,
        reply: oneshot::Sender<bool>,
    },

    /// The task finished; carries the accumulated output.
    Completed(String),

    /// The task failed; carries a human-readable reason.
    Failed(String),
}

/// One unit of work for the executor
#[derive(Debug)]
pub struct ExecRequest {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub llm: Option<String>,
    pub events: mpsc::Sender<ExecEvent>,
}
