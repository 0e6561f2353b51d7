//! Server → Client messages

use serde::{Deserialize, Serialize};

/// Messages sent from server to client
///
/// `projectHint` and the error envelope's `threadId` serialize as explicit
/// `null` when absent so clients can pattern-match on a stable shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Authentication accepted; the connection is latched as authenticated.
    #[serde(rename = "auth.success", rename_all = "camelCase")]
    AuthSuccess { user_id: String },

    /// A new thread exists. `createdAt` and `updatedAt` are equal at birth.
    #[serde(rename = "thread.created", rename_all = "camelCase")]
    ThreadCreated {
        id: String,
        project_hint: Option<String>,
        created_at: String,
        updated_at: String,
    },

    /// A streaming cycle opened. `actionId` identifies the cycle and is
    /// echoed by the terminal `action.complete`/`action.error` envelope.
    #[serde(rename = "stream.start", rename_all = "camelCase")]
    StreamStart { thread_id: String, action_id: String },

    /// Incremental executor output.
    #[serde(rename = "stream.chunk", rename_all = "camelCase")]
    StreamChunk { thread_id: String, text: String },

    /// Progress marker (tool use, thinking, ...).
    #[serde(rename = "stream.step", rename_all = "camelCase")]
    StreamStep { thread_id: String, step: String },

    /// The executor paused and wants a human decision. `actionId` here is a
    /// fresh confirmation id, answered by the client-side `action.confirm`
    /// or `action.cancel`.
    #[serde(rename = "action.confirm", rename_all = "camelCase")]
    ActionConfirm {
        thread_id: String,
        action_id: String,
        prompt: String,
    },

    /// The cycle finished with a result. Always followed by `stream.end`.
    #[serde(rename = "action.complete", rename_all = "camelCase")]
    ActionComplete {
        thread_id: String,
        action_id: String,
        result: String,
    },

    /// The cycle failed. Always followed by `stream.end`.
    #[serde(rename = "action.error", rename_all = "camelCase")]
    ActionError {
        thread_id: String,
        action_id: String,
        error: String,
    },

    /// The cycle's final envelope.
    #[serde(rename = "stream.end", rename_all = "camelCase")]
    StreamEnd { thread_id: String },

    /// A thread was closed and its state discarded.
    #[serde(rename = "thread.deleted", rename_all = "camelCase")]
    ThreadDeleted { thread_id: String },

    /// Request-scoped failure. The connection stays open.
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        thread_id: Option<String>,
        error: String,
    },
}
