//! Core types shared across the protocol
//!
//! The WebSocket envelopes live in [`crate::client`] and [`crate::server`];
//! this module carries the admin HTTP surface (job launch, tmux session
//! inspection) and the handful of enums both sides agree on.

use serde::{Deserialize, Serialize};

/// Message role inside a thread transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One live tmux session as reported by `GET /sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub name: String,
    pub window_count: u32,
    pub attached: bool,
}

/// Body of `POST /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchJobRequest {
    pub project: String,
    pub task: String,
    #[serde(default = "default_auto_notify")]
    pub auto_notify: bool,
}

fn default_auto_notify() -> bool {
    true
}

/// Reply to a successful `POST /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchJobResponse {
    pub session_name: String,
    pub log_file: String,
}

/// Reply to `POST /sessions/kill`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillResponse {
    pub success: bool,
}

/// JSON error body used by the admin HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::LaunchJobRequest;

    #[test]
    fn launch_request_defaults_to_notifying() {
        let json = r#"{"project":"demo","task":"fix the login bug"}"#;
        let parsed: LaunchJobRequest = serde_json::from_str(json).expect("parse launch request");
        assert_eq!(parsed.project, "demo");
        assert!(parsed.auto_notify);
    }

    #[test]
    fn launch_request_honors_explicit_flag() {
        let json = r#"{"project":"demo","task":"quiet run","autoNotify":false}"#;
        let parsed: LaunchJobRequest = serde_json::from_str(json).expect("parse launch request");
        assert!(!parsed.auto_notify);
    }
}
