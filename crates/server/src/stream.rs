//! Streaming cycle driver
//!
//! One task per `thread.message`: translates executor events into the wire
//! sequence for the cycle. `stream.start` is emitted by the router before
//! this loop spawns; the loop emits chunks, steps and confirmation requests
//! as they arrive and always closes with the terminal pair (exactly one of
//! `action.complete`/`action.error`, then `stream.end`), releasing the
//! thread's busy flag on every path.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use patchbay_executor::ExecEvent;
use patchbay_protocol::{MessageRole, ServerMessage};

use crate::connection::{Outbound, OutboundSender};
use crate::state::AppState;

/// Terminal error used when the executor hangs up without a verdict.
pub const EXECUTOR_STREAM_ENDED: &str = "executor stream ended unexpectedly";

pub async fn run_stream_cycle(
    state: Arc<AppState>,
    thread_id: String,
    cycle_id: String,
    outbound: OutboundSender,
    mut events: mpsc::Receiver<ExecEvent>,
) {
    let mut terminal_sent = false;

    while let Some(event) = events.recv().await {
        match event {
            ExecEvent::Chunk(text) => {
                send(
                    &outbound,
                    ServerMessage::StreamChunk {
                        thread_id: thread_id.clone(),
                        text,
                    },
                )
                .await;
            }

            ExecEvent::Step(step) => {
                send(
                    &outbound,
                    ServerMessage::StreamStep {
                        thread_id: thread_id.clone(),
                        step,
                    },
                )
                .await;
            }

            ExecEvent::Confirm { prompt, reply } => {
                let (action_id, mut decision) = state.rendezvous.request(&thread_id, &prompt);
                info!(
                    component = "stream",
                    event = "confirm.requested",
                    thread_id = %thread_id,
                    action_id = %action_id,
                    "Executor paused for confirmation"
                );
                send(
                    &outbound,
                    ServerMessage::ActionConfirm {
                        thread_id: thread_id.clone(),
                        action_id: action_id.clone(),
                        prompt,
                    },
                )
                .await;

                // Suspend until the human answers. If the client goes away
                // first, nobody can answer anymore: resolve our own entry
                // declined so the executor is never left hanging.
                let confirmed = tokio::select! {
                    answer = &mut decision => answer.unwrap_or(false),
                    _ = outbound.closed() => {
                        state.rendezvous.resolve(&action_id, false);
                        false
                    }
                };

                info!(
                    component = "stream",
                    event = "confirm.resolved",
                    thread_id = %thread_id,
                    action_id = %action_id,
                    confirmed,
                    "Confirmation resolved"
                );
                let _ = reply.send(confirmed);
            }

            ExecEvent::Completed(result) => {
                if !state.threads.append_message(
                    &thread_id,
                    MessageRole::Assistant,
                    result.clone(),
                ) {
                    debug!(
                        component = "stream",
                        event = "stream.thread_gone",
                        thread_id = %thread_id,
                        "Thread closed mid-cycle, dropping transcript entry"
                    );
                }

                info!(
                    component = "stream",
                    event = "cycle.completed",
                    thread_id = %thread_id,
                    action_id = %cycle_id,
                    result_len = result.len(),
                    "Streaming cycle completed"
                );
                send(
                    &outbound,
                    ServerMessage::ActionComplete {
                        thread_id: thread_id.clone(),
                        action_id: cycle_id.clone(),
                        result,
                    },
                )
                .await;
                send(
                    &outbound,
                    ServerMessage::StreamEnd {
                        thread_id: thread_id.clone(),
                    },
                )
                .await;
                terminal_sent = true;
                break;
            }

            ExecEvent::Failed(error) => {
                warn!(
                    component = "stream",
                    event = "cycle.failed",
                    thread_id = %thread_id,
                    action_id = %cycle_id,
                    error = %error,
                    "Streaming cycle failed"
                );
                send(
                    &outbound,
                    ServerMessage::ActionError {
                        thread_id: thread_id.clone(),
                        action_id: cycle_id.clone(),
                        error,
                    },
                )
                .await;
                send(
                    &outbound,
                    ServerMessage::StreamEnd {
                        thread_id: thread_id.clone(),
                    },
                )
                .await;
                terminal_sent = true;
                break;
            }
        }
    }

    if !terminal_sent {
        warn!(
            component = "stream",
            event = "cycle.executor_gone",
            thread_id = %thread_id,
            action_id = %cycle_id,
            "Executor hung up without a terminal event"
        );
        send(
            &outbound,
            ServerMessage::ActionError {
                thread_id: thread_id.clone(),
                action_id: cycle_id.clone(),
                error: EXECUTOR_STREAM_ENDED.to_string(),
            },
        )
        .await;
        send(
            &outbound,
            ServerMessage::StreamEnd {
                thread_id: thread_id.clone(),
            },
        )
        .await;
    }

    state.threads.finish_cycle(&thread_id);
}

/// Queue an envelope for the socket writer. A closed queue means the client
/// is gone; the cycle still runs to completion so the transcript survives.
async fn send(outbound: &OutboundSender, message: ServerMessage) {
    if outbound.send(Outbound::Json(message)).await.is_err() {
        debug!(
            component = "stream",
            event = "stream.client_gone",
            "Dropping envelope for closed connection"
        );
    }
}
