//! Admin HTTP surface
//!
//! Small JSON API living next to `/ws`: list tmux sessions, kill one, launch
//! a detached job, tail a job log, and a liveness probe.

use std::process::Stdio;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::{info, warn};

use patchbay_protocol::{ErrorBody, KillResponse, LaunchJobRequest, LaunchJobResponse, SessionInfo};

use crate::jobs::{is_safe_project_name, JobError};
use crate::state::AppState;

const DEFAULT_LOG_LINES: usize = 50;

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "patchbay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /sessions`: every live tmux session, attached or not.
pub async fn list_sessions() -> impl IntoResponse {
    let output = Command::new("tmux")
        .arg("list-sessions")
        .arg("-F")
        .arg("#{session_name}\t#{session_windows}\t#{session_attached}")
        .output()
        .await;

    let sessions = match output {
        Ok(out) if out.status.success() => {
            parse_tmux_sessions(&String::from_utf8_lossy(&out.stdout))
        }
        // No tmux server (or no tmux binary) reads as an empty list.
        _ => Vec::new(),
    };
    Json(sessions)
}

#[derive(Debug, Deserialize)]
pub struct KillQuery {
    session: String,
}

/// `POST /sessions/kill?session=name`
pub async fn kill_session(Query(query): Query<KillQuery>) -> impl IntoResponse {
    if !is_safe_project_name(&query.session) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: format!("Invalid session name: {}", query.session),
            }),
        )
            .into_response();
    }

    let status = Command::new("tmux")
        .arg("kill-session")
        .arg("-t")
        .arg(&query.session)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(s) if s.success() => {
            info!(
                component = "sessions_api",
                event = "session.killed",
                session = %query.session,
                "Killed tmux session"
            );
            Json(KillResponse { success: true }).into_response()
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("Could not kill session: {}", query.session),
            }),
        )
            .into_response(),
    }
}

/// `POST /jobs`: launch a detached executor task against a project.
pub async fn launch_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LaunchJobRequest>,
) -> impl IntoResponse {
    match state
        .jobs
        .launch(&request.project, &request.task, request.auto_notify)
        .await
    {
        Ok(job) => Json(LaunchJobResponse {
            session_name: job.session_name,
            log_file: job.log_file.display().to_string(),
        })
        .into_response(),
        Err(err @ JobError::ProjectNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: err.to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            warn!(
                component = "sessions_api",
                event = "job.launch_failed",
                project = %request.project,
                error = %err,
                "Failed to launch job"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    lines: Option<usize>,
}

/// `GET /jobs/{session}/log?lines=N`: last N log lines as plain text.
pub async fn job_log(
    State(state): State<Arc<AppState>>,
    Path(session): Path<String>,
    Query(query): Query<LogQuery>,
) -> impl IntoResponse {
    if !is_safe_project_name(&session) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: format!("Invalid session name: {session}"),
            }),
        )
            .into_response();
    }

    // Jobs launched before a restart have no registry record; fall back to
    // the conventional log location so their files stay readable.
    let path = state
        .jobs
        .job(&session)
        .map(|job| job.log_file)
        .unwrap_or_else(|| state.jobs.log_path(&session));
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => tail(&content, query.lines.unwrap_or(DEFAULT_LOG_LINES)).into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("No log file found for session: {session}"),
            }),
        )
            .into_response(),
    }
}

fn parse_tmux_sessions(raw: &str) -> Vec<SessionInfo> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let name = parts.next()?.to_string();
            if name.is_empty() {
                return None;
            }
            let window_count = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            let attached = parts.next().map(|v| v != "0").unwrap_or(false);
            Some(SessionInfo {
                name,
                window_count,
                attached,
            })
        })
        .collect()
}

fn tail(content: &str, lines: usize) -> String {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::{parse_tmux_sessions, tail};

    #[test]
    fn tmux_listing_parses_into_session_info() {
        let raw = "web-1755\t2\t1\nscratch\t1\t0\n";
        let sessions = parse_tmux_sessions(raw);
        assert_eq!(sessions.len(), 2);

        assert_eq!(sessions[0].name, "web-1755");
        assert_eq!(sessions[0].window_count, 2);
        assert!(sessions[0].attached);

        assert_eq!(sessions[1].name, "scratch");
        assert_eq!(sessions[1].window_count, 1);
        assert!(!sessions[1].attached);
    }

    #[test]
    fn malformed_listing_lines_are_skipped_gracefully() {
        let sessions = parse_tmux_sessions("\nonly-name\n");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "only-name");
        assert_eq!(sessions[0].window_count, 0);
        assert!(!sessions[0].attached);
    }

    #[test]
    fn empty_listing_parses_to_empty_vec() {
        assert!(parse_tmux_sessions("").is_empty());
    }

    #[test]
    fn tail_returns_last_lines_only() {
        let content = "one\ntwo\nthree\nfour\n";
        assert_eq!(tail(content, 2), "three\nfour");
    }

    #[test]
    fn tail_with_generous_limit_returns_everything() {
        let content = "one\ntwo\n";
        assert_eq!(tail(content, 50), "one\ntwo");
    }

    #[test]
    fn tail_of_empty_log_is_empty() {
        assert_eq!(tail("", 50), "");
    }
}
