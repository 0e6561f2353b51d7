//! CLI executor adapter
//!
//! Spawns the configured executor binary once per request and communicates
//! over stdio. Stdout lines that parse as NDJSON events become typed chunks,
//! steps and confirmation requests (answered back over stdin); anything else
//! is plain output. Stderr lines that look like progress markers become
//! steps, the rest is logged.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{ExecEvent, ExecRequest, ExecutorError};

// ---------------------------------------------------------------------------
// Stdio messages
// ---------------------------------------------------------------------------

/// Typed events the executor may print on stdout, one JSON object per line
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StdoutEvent {
    Chunk { text: String },
    Step { step: String },
    Confirm { id: String, prompt: String },
}

/// Replies written to the executor's stdin
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StdinMessage {
    ConfirmResponse { id: String, confirmed: bool },
}

/// Parse one stdout line as a typed event. Lines that are not JSON, or JSON
/// of an unknown shape, are plain output and belong in the chunk stream.
fn parse_event_line(line: &str) -> Option<StdoutEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

fn looks_like_progress(line: &str) -> bool {
    line.contains("Thinking") || line.contains("...")
}

// ---------------------------------------------------------------------------
// CliExecutor
// ---------------------------------------------------------------------------

/// Runs one executor subprocess per request. Requests are independent; the
/// worker spawns a task for each so slow threads never block each other.
#[derive(Debug, Clone)]
pub struct CliExecutor {
    bin: String,
    timeout: Duration,
}

impl CliExecutor {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    /// Drain the request channel (call from `tokio::spawn`).
    pub async fn run(self, mut rx: mpsc::Receiver<ExecRequest>) {
        info!(
            component = "cli_executor",
            event = "executor.start",
            bin = %self.bin,
            "Executor worker started"
        );

        while let Some(req) = rx.recv().await {
            let executor = self.clone();
            tokio::spawn(async move {
                executor.execute(req).await;
            });
        }

        info!(
            component = "cli_executor",
            event = "executor.stop",
            "Executor worker stopped"
        );
    }

    /// Run one request to completion, reporting the outcome on its event
    /// channel. Never returns an error; failures become `ExecEvent::Failed`.
    pub async fn execute(&self, req: ExecRequest) {
        let events = req.events.clone();
        let timeout = self.timeout;

        match tokio::time::timeout(timeout, self.drive(req)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    component = "cli_executor",
                    event = "executor.failed",
                    error = %e,
                    "Executor run failed"
                );
                let _ = events.send(ExecEvent::Failed(e.to_string())).await;
            }
            Err(_) => {
                warn!(
                    component = "cli_executor",
                    event = "executor.timeout",
                    timeout_secs = timeout.as_secs(),
                    "Executor run timed out"
                );
                let _ = events
                    .send(ExecEvent::Failed(format!(
                        "executor timed out after {}s",
                        timeout.as_secs()
                    )))
                    .await;
            }
        }
    }

    async fn drive(&self, req: ExecRequest) -> Result<(), ExecutorError> {
        let mut args: Vec<String> = vec!["-p".to_string(), req.prompt.clone()];
        if let Some(llm) = &req.llm {
            args.push("--model".to_string());
            args.push(llm.clone());
        }

        info!(
            component = "cli_executor",
            event = "executor.spawn",
            bin = %self.bin,
            cwd = %req.working_dir.display(),
            llm = ?req.llm,
            "Spawning executor"
        );

        // kill_on_drop so a timeout cancellation also reaps the child
        let mut child = tokio::process::Command::new(&self.bin)
            .args(&args)
            .current_dir(&req.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutorError::SpawnError(format!("failed to spawn {}: {}", self.bin, e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutorError::SpawnError("no stdin on child".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::SpawnError("no stdout on child".into()))?;

        // Stderr reader: progress heuristics become steps, the rest is logged
        if let Some(stderr) = child.stderr.take() {
            let step_events = req.events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if looks_like_progress(trimmed) {
                        let _ = step_events.send(ExecEvent::Step(trimmed.to_string())).await;
                    } else {
                        debug!(
                            component = "cli_executor",
                            event = "executor.stderr",
                            line = %trimmed,
                            "Executor stderr"
                        );
                    }
                }
            });
        }

        let mut output = String::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_event_line(&line) {
                Some(StdoutEvent::Chunk { text }) => {
                    output.push_str(&text);
                    let _ = req.events.send(ExecEvent::Chunk(text)).await;
                }
                Some(StdoutEvent::Step { step }) => {
                    let _ = req.events.send(ExecEvent::Step(step)).await;
                }
                Some(StdoutEvent::Confirm { id, prompt }) => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    if req
                        .events
                        .send(ExecEvent::Confirm {
                            prompt,
                            reply: reply_tx,
                        })
                        .await
                        .is_err()
                    {
                        return Err(ExecutorError::ChannelClosed);
                    }

                    // Suspend until the human answers; a dropped sender
                    // (thread closed, client gone) reads as declined.
                    let confirmed = reply_rx.await.unwrap_or(false);
                    let response =
                        serde_json::to_string(&StdinMessage::ConfirmResponse { id, confirmed })?;
                    stdin.write_all(response.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await?;
                }
                None => {
                    output.push_str(&line);
                    output.push('\n');
                    let _ = req.events.send(ExecEvent::Chunk(format!("{}\n", line))).await;
                }
            }
        }

        drop(stdin);
        let status = child.wait().await?;

        if status.success() {
            let _ = req
                .events
                .send(ExecEvent::Completed(output.trim().to_string()))
                .await;
        } else {
            let reason = match status.code() {
                Some(code) => format!("executor exited with code {}", code),
                None => "executor terminated by signal".to_string(),
            };
            let _ = req.events.send(ExecEvent::Failed(reason)).await;
        }

        Ok(())
    }
}
