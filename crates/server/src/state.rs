//! Shared application state
//!
//! One `Arc<AppState>` is handed to every handler. The registries are
//! internally synchronized; nothing here needs an outer lock.

use std::path::PathBuf;

use tokio::sync::mpsc;

use patchbay_executor::ExecRequest;

use crate::confirm::ConfirmationRendezvous;
use crate::connection::ConnectionRegistry;
use crate::jobs::{is_safe_project_name, JobSessionManager};
use crate::threads::ThreadRegistry;

pub struct AppState {
    pub connections: ConnectionRegistry,
    pub threads: ThreadRegistry,
    pub rendezvous: ConfirmationRendezvous,
    pub jobs: JobSessionManager,
    pub exec_tx: mpsc::Sender<ExecRequest>,
    pub projects_dir: PathBuf,
}

impl AppState {
    pub fn new(
        jobs: JobSessionManager,
        exec_tx: mpsc::Sender<ExecRequest>,
        projects_dir: PathBuf,
    ) -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            threads: ThreadRegistry::new(),
            rendezvous: ConfirmationRendezvous::new(),
            jobs,
            exec_tx,
            projects_dir,
        }
    }

    /// Executor working directory for a thread: the hinted project checkout
    /// when it exists, otherwise the home directory. Hints that are not bare
    /// directory names never resolve.
    pub fn resolve_working_dir(&self, hint: Option<&str>) -> PathBuf {
        if let Some(hint) = hint {
            if is_safe_project_name(hint) {
                let candidate = self.projects_dir.join(hint);
                if candidate.is_dir() {
                    return candidate;
                }
            }
        }
        dirs::home_dir().unwrap_or_else(std::env::temp_dir)
    }
}
