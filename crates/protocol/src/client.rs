//! Client → Server messages

use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First message on a new connection. Any non-empty token authenticates.
    #[serde(rename = "auth")]
    Auth {
        #[serde(default)]
        token: Option<String>,
    },

    /// Open a new conversational thread.
    #[serde(rename = "thread.create", rename_all = "camelCase")]
    ThreadCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_hint: Option<String>,
    },

    /// Send a user message into a thread, starting a streaming cycle.
    #[serde(rename = "thread.message", rename_all = "camelCase")]
    ThreadMessage {
        thread_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        llm: Option<String>,
    },

    /// Close a thread and discard its state.
    #[serde(rename = "thread.close", rename_all = "camelCase")]
    ThreadClose { thread_id: String },

    /// Answer a pending confirmation request.
    #[serde(rename = "action.confirm", rename_all = "camelCase")]
    ActionConfirm {
        action_id: String,
        #[serde(default)]
        confirmed: bool,
    },

    /// Decline a pending confirmation request.
    #[serde(rename = "action.cancel", rename_all = "camelCase")]
    ActionCancel { action_id: String },
}
