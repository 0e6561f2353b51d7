//! WebSocket handling

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use patchbay_executor::ExecRequest;
use patchbay_protocol::{new_id, ClientMessage, MessageRole, ServerMessage};

use crate::connection::{Outbound, OutboundSender};
use crate::error::RequestError;
use crate::state::AppState;
use crate::stream::run_stream_cycle;

/// Wire names the dispatcher accepts. Anything else gets the unknown-type
/// error instead of a raw deserializer message.
const KNOWN_MESSAGE_TYPES: [&str; 6] = [
    "auth",
    "thread.create",
    "thread.message",
    "thread.close",
    "action.confirm",
    "action.cancel",
];

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    // Channel for sending messages to this client (JSON envelopes and pongs)
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(100);
    let conn_id = state.connections.register(outbound_tx.clone());

    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                Outbound::Json(server_msg) => match serde_json::to_string(&server_msg) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server message"
                        );
                        continue;
                    }
                },
                Outbound::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    let client_tx = outbound_tx.clone();

    // Handle incoming messages
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                // Respond to ping with pong
                let _ = outbound_tx.send(Outbound::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        // Parse client message
        let client_msg = match parse_client_message(&msg) {
            Ok(m) => m,
            Err(error) => {
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    payload_bytes = msg.len(),
                    payload_preview = %truncate_for_log(&msg, 240),
                    error = %error,
                    "Failed to parse client message"
                );
                send_json(&client_tx, RequestError::Protocol(error).into_envelope(None)).await;
                continue;
            }
        };

        handle_client_message(client_msg, &client_tx, &state, conn_id).await;
    }

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        "WebSocket connection closed"
    );
    state.connections.remove(conn_id);
    send_task.abort();
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Two-stage parse so an unrecognized `type` reports the type name rather
/// than a deserializer variant listing.
fn parse_client_message(raw: &str) -> Result<ClientMessage, String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if let Some(message_type) = value.get("type").and_then(serde_json::Value::as_str) {
        if !KNOWN_MESSAGE_TYPES.contains(&message_type) {
            return Err(format!("Unknown message type: {message_type}"));
        }
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// Send a ServerMessage through the outbound channel
async fn send_json(tx: &OutboundSender, msg: ServerMessage) {
    let _ = tx.send(Outbound::Json(msg)).await;
}

async fn handle_client_message(
    msg: ClientMessage,
    client_tx: &OutboundSender,
    state: &Arc<AppState>,
    conn_id: u64,
) {
    debug!(
        component = "websocket",
        event = "ws.message.received",
        connection_id = conn_id,
        message = ?msg,
        "Received client message"
    );

    // Auth is the only message accepted before the latch flips. Every error
    // here is an envelope, never a connection close.
    if !matches!(msg, ClientMessage::Auth { .. }) && !state.connections.is_authenticated(conn_id) {
        send_json(
            client_tx,
            RequestError::NotAuthenticated.into_envelope(None),
        )
        .await;
        return;
    }

    match msg {
        ClientMessage::Auth { token } => {
            match state.connections.authenticate(conn_id, token.as_deref()) {
                Ok(user_id) => {
                    info!(
                        component = "websocket",
                        event = "ws.auth.accepted",
                        connection_id = conn_id,
                        user_id = %user_id,
                        "Connection authenticated"
                    );
                    send_json(client_tx, ServerMessage::AuthSuccess { user_id }).await;
                }
                Err(err) => {
                    send_json(client_tx, err.into_envelope(None)).await;
                }
            }
        }

        ClientMessage::ThreadCreate { project_hint } => {
            let snapshot = state.threads.create(conn_id, project_hint);
            info!(
                component = "websocket",
                event = "thread.created",
                connection_id = conn_id,
                thread_id = %snapshot.id,
                project = snapshot.project_hint.as_deref().unwrap_or("general"),
                "Thread created"
            );
            send_json(
                client_tx,
                ServerMessage::ThreadCreated {
                    id: snapshot.id,
                    project_hint: snapshot.project_hint,
                    created_at: snapshot.created_at,
                    updated_at: snapshot.updated_at,
                },
            )
            .await;
        }

        ClientMessage::ThreadMessage {
            thread_id,
            content,
            llm,
        } => {
            // Claiming the busy flag and applying the llm override is one
            // atomic step; a second message mid-cycle bounces here.
            let context = match state.threads.begin_cycle(&thread_id, llm) {
                Ok(context) => context,
                Err(err) => {
                    send_json(client_tx, err.into_envelope(Some(thread_id))).await;
                    return;
                }
            };

            state
                .threads
                .append_message(&thread_id, MessageRole::User, content.clone());

            let cycle_id = new_id();
            send_json(
                client_tx,
                ServerMessage::StreamStart {
                    thread_id: thread_id.clone(),
                    action_id: cycle_id.clone(),
                },
            )
            .await;

            let (events_tx, events_rx) = mpsc::channel(64);
            let request = ExecRequest {
                prompt: content,
                working_dir: state.resolve_working_dir(context.project_hint.as_deref()),
                llm: context.llm_override,
                events: events_tx,
            };

            if state.exec_tx.send(request).await.is_err() {
                // Dropping the request drops its event sender; the cycle
                // below then synthesizes the terminal error pair.
                error!(
                    component = "websocket",
                    event = "ws.executor.unavailable",
                    connection_id = conn_id,
                    thread_id = %thread_id,
                    "Executor worker is gone, failing the cycle"
                );
            }

            tokio::spawn(run_stream_cycle(
                state.clone(),
                thread_id,
                cycle_id,
                client_tx.clone(),
                events_rx,
            ));
        }

        ClientMessage::ThreadClose { thread_id } => {
            // Force-decline before removal so a suspended cycle resumes.
            let declined = state.rendezvous.resolve_thread(&thread_id, false);
            if state.threads.close(&thread_id) {
                info!(
                    component = "websocket",
                    event = "thread.closed",
                    connection_id = conn_id,
                    thread_id = %thread_id,
                    declined_actions = declined,
                    "Thread closed"
                );
                send_json(client_tx, ServerMessage::ThreadDeleted { thread_id }).await;
            } else {
                send_json(
                    client_tx,
                    RequestError::ThreadNotFound.into_envelope(Some(thread_id)),
                )
                .await;
            }
        }

        ClientMessage::ActionConfirm {
            action_id,
            confirmed,
        } => {
            if state.rendezvous.resolve(&action_id, confirmed) {
                debug!(
                    component = "websocket",
                    event = "action.confirmed",
                    connection_id = conn_id,
                    action_id = %action_id,
                    confirmed,
                    "Confirmation delivered"
                );
            } else {
                send_json(
                    client_tx,
                    RequestError::ActionNotFound.into_envelope(None),
                )
                .await;
            }
        }

        ClientMessage::ActionCancel { action_id } => {
            if state.rendezvous.resolve(&action_id, false) {
                debug!(
                    component = "websocket",
                    event = "action.cancelled",
                    connection_id = conn_id,
                    action_id = %action_id,
                    "Confirmation declined"
                );
            } else {
                send_json(
                    client_tx,
                    RequestError::ActionNotFound.into_envelope(None),
                )
                .await;
            }
        }
    }
}
