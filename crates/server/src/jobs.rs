//! Detached job sessions
//!
//! Long-running executor tasks run inside named tmux sessions so they
//! survive the client that asked for them. Each launch writes a bash script
//! that pipes combined output through `tee` into a durable log and records
//! the executor's exit code in a marker file; a supervisor task polls for
//! that marker and pushes an out-of-band completion notice.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::git;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Project \"{0}\" not found")]
    ProjectNotFound(String),
    #[error("failed to spawn tmux session: {0}")]
    Spawn(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Running,
    Completed,
    /// `exit_code` is `None` when the tmux session vanished before the
    /// marker file appeared (killed from outside).
    Failed { exit_code: Option<i32> },
}

/// Registry entry keyed by session name.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub project: String,
    pub log_file: PathBuf,
    pub state: JobState,
}

/// What the launcher hands back immediately; the outcome arrives later via
/// the log and the notifier.
#[derive(Debug, Clone)]
pub struct LaunchedJob {
    pub session_name: String,
    pub log_file: PathBuf,
}

/// Project and session names become paths and tmux targets; reject anything
/// that could escape the configured directories.
pub fn is_safe_project_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

pub struct JobSessionManager {
    projects_dir: PathBuf,
    log_dir: PathBuf,
    script_dir: PathBuf,
    executor_bin: String,
    env_file: Option<PathBuf>,
    notify_tx: mpsc::Sender<String>,
    jobs: Arc<DashMap<String, JobRecord>>,
    next_seq: AtomicU64,
}

impl JobSessionManager {
    pub fn new(
        projects_dir: PathBuf,
        log_dir: PathBuf,
        script_dir: PathBuf,
        executor_bin: String,
        notify_tx: mpsc::Sender<String>,
    ) -> Self {
        // Seeding from wall-clock millis keeps names unique across restarts
        // even though the counter itself only lives for the process.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            projects_dir,
            log_dir,
            script_dir,
            executor_bin,
            env_file: None,
            notify_tx,
            jobs: Arc::new(DashMap::new()),
            next_seq: AtomicU64::new(seed),
        }
    }

    /// Env file sourced at the top of every job script, if it exists.
    pub fn with_env_file(mut self, path: PathBuf) -> Self {
        self.env_file = Some(path);
        self
    }

    pub fn job(&self, session_name: &str) -> Option<JobRecord> {
        self.jobs.get(session_name).map(|record| record.clone())
    }

    pub fn log_path(&self, session_name: &str) -> PathBuf {
        self.log_dir.join(format!("{session_name}.log"))
    }

    fn next_session_name(&self, project: &str) -> String {
        format!("{}-{}", project, self.next_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Launch `task` against `project` in a detached tmux session and return
    /// without waiting for it.
    pub async fn launch(
        &self,
        project: &str,
        task: &str,
        auto_notify: bool,
    ) -> Result<LaunchedJob, JobError> {
        if !is_safe_project_name(project) {
            return Err(JobError::ProjectNotFound(project.to_string()));
        }
        let project_path = self.projects_dir.join(project);
        if !project_path.is_dir() {
            return Err(JobError::ProjectNotFound(project.to_string()));
        }

        std::fs::create_dir_all(&self.log_dir)?;
        std::fs::create_dir_all(&self.script_dir)?;

        let session_name = self.next_session_name(project);
        let log_file = self.log_dir.join(format!("{session_name}.log"));
        let exit_file = self.log_dir.join(format!("{session_name}.exit"));
        let script_path = self.script_dir.join(format!("{session_name}.sh"));

        let script = build_job_script(&JobScript {
            project,
            project_path: &project_path,
            executor_bin: &self.executor_bin,
            task,
            log_file: &log_file,
            exit_file: &exit_file,
            env_file: self.env_file.as_deref(),
        });
        std::fs::write(&script_path, script)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))?;
        }

        let status = Command::new("tmux")
            .arg("new-session")
            .arg("-d")
            .arg("-s")
            .arg(&session_name)
            .arg(&script_path)
            .status()
            .await?;
        if !status.success() {
            return Err(JobError::Spawn(format!("tmux exited with {status}")));
        }

        info!(
            component = "jobs",
            event = "job.launched",
            session = %session_name,
            project = %project,
            log = %log_file.display(),
            auto_notify,
            "Job session launched"
        );

        self.jobs.insert(
            session_name.clone(),
            JobRecord {
                project: project.to_string(),
                log_file: log_file.clone(),
                state: JobState::Running,
            },
        );

        let supervisor = Supervisor {
            jobs: self.jobs.clone(),
            notify_tx: self.notify_tx.clone(),
            session_name: session_name.clone(),
            project_path,
            exit_file,
            auto_notify,
        };
        tokio::spawn(supervisor.run());

        Ok(LaunchedJob {
            session_name,
            log_file,
        })
    }
}

struct JobScript<'a> {
    project: &'a str,
    project_path: &'a Path,
    executor_bin: &'a str,
    task: &'a str,
    log_file: &'a Path,
    exit_file: &'a Path,
    env_file: Option<&'a Path>,
}

/// Single-quote a value for inclusion in a bash script.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn build_job_script(job: &JobScript<'_>) -> String {
    let log = shell_quote(&job.log_file.display().to_string());
    let mut script = String::from("#!/bin/bash\n");

    if let Some(env_file) = job.env_file {
        let env = shell_quote(&env_file.display().to_string());
        script.push_str(&format!(
            "if [ -f {env} ]; then\n  set -a\n  source {env}\n  set +a\nfi\n\n"
        ));
    }

    script.push_str(&format!(
        "cd {}\n\n",
        shell_quote(&job.project_path.display().to_string())
    ));
    script.push_str("# Pull latest changes\n");
    script.push_str("git pull origin main 2>/dev/null || git pull origin master 2>/dev/null || true\n\n");

    script.push_str(&format!(
        "{{\n\
         echo \"========================================\"\n\
         echo \"Starting {bin} task...\"\n\
         echo \"Project: {project}\"\n\
         echo \"Time: $(date)\"\n\
         echo \"========================================\"\n\
         }} | tee -a {log}\n\n",
        bin = job.executor_bin,
        project = job.project,
    ));

    // Unattended session, nobody can answer a permission prompt.
    script.push_str(&format!(
        "{bin} --dangerously-skip-permissions -p {task} 2>&1 | tee -a {log}\n",
        bin = shell_quote(job.executor_bin),
        task = shell_quote(job.task),
    ));
    // PIPESTATUS, not $?: we want the executor's exit code, not tee's.
    script.push_str("EXIT_CODE=${PIPESTATUS[0]}\n\n");

    script.push_str(&format!(
        "{{\n\
         echo \"\"\n\
         echo \"========================================\"\n\
         echo \"Task completed with exit code: $EXIT_CODE\"\n\
         echo \"Time: $(date)\"\n\
         echo \"========================================\"\n\
         }} | tee -a {log}\n\n"
    ));

    script.push_str(&format!(
        "echo \"$EXIT_CODE\" > {}\n",
        shell_quote(&job.exit_file.display().to_string())
    ));

    script
}

fn read_exit_file(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

async fn tmux_session_alive(name: &str) -> bool {
    Command::new("tmux")
        .arg("has-session")
        .arg("-t")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

fn success_notification(session: &str, branch: &str, commit: &str) -> String {
    format!(
        "✅ *Task Complete*\n\n\
         *Session:* `{session}`\n\
         *Branch:* {branch}\n\
         *Last commit:* {commit}\n\n\
         View logs: `/jobs/{session}/log`"
    )
}

fn failure_notification(session: &str, exit_code: i32) -> String {
    format!(
        "❌ *Task Failed*\n\n\
         *Session:* `{session}`\n\
         *Exit code:* {exit_code}\n\n\
         Attach to session: `tmux attach -t {session}`\n\
         View logs: `/jobs/{session}/log`"
    )
}

fn killed_notification(session: &str) -> String {
    format!(
        "⚠️ *Task Killed*\n\n\
         *Session:* `{session}`\n\
         The tmux session ended before reporting an exit code.\n\n\
         View logs: `/jobs/{session}/log`"
    )
}

struct Supervisor {
    jobs: Arc<DashMap<String, JobRecord>>,
    notify_tx: mpsc::Sender<String>,
    session_name: String,
    project_path: PathBuf,
    exit_file: PathBuf,
    auto_notify: bool,
}

impl Supervisor {
    async fn run(self) {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;

            if let Some(code) = read_exit_file(&self.exit_file) {
                self.finish(Some(code)).await;
                return;
            }

            if !tmux_session_alive(&self.session_name).await {
                // The session tears itself down right after writing the
                // marker, so check one more time before calling it killed.
                let code = read_exit_file(&self.exit_file);
                self.finish(code).await;
                return;
            }
        }
    }

    async fn finish(self, exit_code: Option<i32>) {
        let state = match exit_code {
            Some(0) => JobState::Completed,
            Some(code) => JobState::Failed {
                exit_code: Some(code),
            },
            None => JobState::Failed { exit_code: None },
        };
        match self.jobs.get_mut(&self.session_name) {
            Some(mut record) => {
                record.state = state;
                info!(
                    component = "jobs",
                    event = "job.finished",
                    session = %self.session_name,
                    project = %record.project,
                    state = ?record.state,
                    exit_code = ?exit_code,
                    "Job session finished"
                );
            }
            None => {
                warn!(
                    component = "jobs",
                    event = "job.finished",
                    session = %self.session_name,
                    exit_code = ?exit_code,
                    "Job finished without a registry record"
                );
            }
        }

        if !self.auto_notify {
            return;
        }

        let text = match exit_code {
            Some(0) => {
                let branch = git::current_branch(&self.project_path)
                    .await
                    .unwrap_or_else(|| "unknown".to_string());
                let commit = git::last_commit_summary(&self.project_path)
                    .await
                    .unwrap_or_else(|| "No commits".to_string());
                success_notification(&self.session_name, &branch, &commit)
            }
            Some(code) => failure_notification(&self.session_name, code),
            None => killed_notification(&self.session_name),
        };

        if self.notify_tx.send(text).await.is_err() {
            warn!(
                component = "jobs",
                event = "job.notify_dropped",
                session = %self.session_name,
                "Notifier is gone, dropping completion notice"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use dashmap::DashMap;
    use tokio::sync::mpsc;

    use super::{
        build_job_script, failure_notification, is_safe_project_name, read_exit_file,
        success_notification, JobError, JobRecord, JobScript, JobSessionManager, JobState,
        Supervisor,
    };

    fn new_manager(root: &Path) -> (JobSessionManager, mpsc::Receiver<String>) {
        let (notify_tx, notify_rx) = mpsc::channel(8);
        let manager = JobSessionManager::new(
            root.join("projects"),
            root.join("logs"),
            root.join("scripts"),
            "claude".to_string(),
            notify_tx,
        );
        (manager, notify_rx)
    }

    #[test]
    fn project_names_that_escape_the_projects_dir_are_rejected() {
        assert!(is_safe_project_name("vizzly-cli"));
        assert!(is_safe_project_name("web_app2"));
        assert!(!is_safe_project_name(""));
        assert!(!is_safe_project_name("../etc"));
        assert!(!is_safe_project_name("a/b"));
        assert!(!is_safe_project_name(r"a\b"));
    }

    #[tokio::test]
    async fn launch_rejects_unknown_project() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (manager, _rx) = new_manager(tmp.path());

        let err = manager
            .launch("ghost", "do things", true)
            .await
            .expect_err("expected launch failure");
        assert!(matches!(err, JobError::ProjectNotFound(_)));
        assert_eq!(err.to_string(), "Project \"ghost\" not found");
    }

    #[test]
    fn session_names_are_unique_per_launch() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (manager, _rx) = new_manager(tmp.path());

        let first = manager.next_session_name("web");
        let second = manager.next_session_name("web");
        assert!(first.starts_with("web-"));
        assert!(second.starts_with("web-"));
        assert_ne!(first, second);
    }

    #[test]
    fn job_script_records_the_executor_exit_code() {
        let script = build_job_script(&JobScript {
            project: "web",
            project_path: Path::new("/srv/projects/web"),
            executor_bin: "claude",
            task: "fix the login bug",
            log_file: Path::new("/srv/logs/web-1.log"),
            exit_file: Path::new("/srv/logs/web-1.exit"),
            env_file: None,
        });

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("cd '/srv/projects/web'"));
        assert!(script.contains("git pull origin main 2>/dev/null || git pull origin master"));
        assert!(script.contains("tee -a '/srv/logs/web-1.log'"));
        assert!(script.contains("EXIT_CODE=${PIPESTATUS[0]}"));
        assert!(script.contains("echo \"$EXIT_CODE\" > '/srv/logs/web-1.exit'"));
        // No env block when no env file is configured.
        assert!(!script.contains("set -a"));
    }

    #[test]
    fn job_script_quotes_single_quotes_in_the_task() {
        let script = build_job_script(&JobScript {
            project: "web",
            project_path: Path::new("/srv/projects/web"),
            executor_bin: "claude",
            task: "don't touch prod",
            log_file: Path::new("/srv/logs/web-2.log"),
            exit_file: Path::new("/srv/logs/web-2.exit"),
            env_file: None,
        });
        assert!(script.contains(r"'don'\''t touch prod'"));
    }

    #[test]
    fn job_script_sources_env_file_when_configured() {
        let script = build_job_script(&JobScript {
            project: "web",
            project_path: Path::new("/srv/projects/web"),
            executor_bin: "claude",
            task: "task",
            log_file: Path::new("/srv/logs/web-3.log"),
            exit_file: Path::new("/srv/logs/web-3.exit"),
            env_file: Some(Path::new("/srv/data/.env")),
        });
        assert!(script.contains("if [ -f '/srv/data/.env' ]"));
        assert!(script.contains("source '/srv/data/.env'"));
    }

    #[test]
    fn exit_marker_parsing_tolerates_whitespace() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let marker = tmp.path().join("job.exit");

        assert_eq!(read_exit_file(&marker), None);

        std::fs::write(&marker, "137\n").expect("write marker");
        assert_eq!(read_exit_file(&marker), Some(137));

        std::fs::write(&marker, "not a code").expect("write marker");
        assert_eq!(read_exit_file(&marker), None);
    }

    #[test]
    fn failure_notice_carries_exit_code_and_attach_hint() {
        let text = failure_notification("web-1755", 137);
        assert!(text.contains("*Exit code:* 137"));
        assert!(text.contains("tmux attach -t web-1755"));
        assert!(text.contains("/jobs/web-1755/log"));
    }

    #[test]
    fn success_notice_carries_branch_and_commit() {
        let text = success_notification("web-1755", "main", "abc1234 - fix login");
        assert!(text.contains("*Branch:* main"));
        assert!(text.contains("*Last commit:* abc1234 - fix login"));
        assert!(text.contains("`web-1755`"));
    }

    fn running_record(session: &str, root: &Path) -> (Arc<DashMap<String, JobRecord>>, PathBuf) {
        let jobs = Arc::new(DashMap::new());
        jobs.insert(
            session.to_string(),
            JobRecord {
                project: "web".to_string(),
                log_file: root.join(format!("{session}.log")),
                state: JobState::Running,
            },
        );
        (jobs, root.join(format!("{session}.exit")))
    }

    #[tokio::test]
    async fn supervisor_marks_failure_and_notifies_with_exit_code() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (jobs, exit_file) = running_record("web-9", tmp.path());
        let (notify_tx, mut notify_rx) = mpsc::channel(4);

        let supervisor = Supervisor {
            jobs: jobs.clone(),
            notify_tx,
            session_name: "web-9".to_string(),
            project_path: tmp.path().to_path_buf(),
            exit_file,
            auto_notify: true,
        };
        supervisor.finish(Some(137)).await;

        assert_eq!(
            jobs.get("web-9").map(|r| r.state.clone()),
            Some(JobState::Failed {
                exit_code: Some(137)
            })
        );
        let text = notify_rx.recv().await.expect("notification");
        assert!(text.contains("137"));
    }

    #[tokio::test]
    async fn supervisor_success_updates_state_without_notice_when_muted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (jobs, exit_file) = running_record("web-10", tmp.path());
        let (notify_tx, mut notify_rx) = mpsc::channel(4);

        let supervisor = Supervisor {
            jobs: jobs.clone(),
            notify_tx,
            session_name: "web-10".to_string(),
            project_path: tmp.path().to_path_buf(),
            exit_file,
            auto_notify: false,
        };
        supervisor.finish(Some(0)).await;

        assert_eq!(
            jobs.get("web-10").map(|r| r.state.clone()),
            Some(JobState::Completed)
        );
        assert!(notify_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn supervisor_reports_killed_session_without_exit_code() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (jobs, exit_file) = running_record("web-11", tmp.path());
        let (notify_tx, mut notify_rx) = mpsc::channel(4);

        let supervisor = Supervisor {
            jobs: jobs.clone(),
            notify_tx,
            session_name: "web-11".to_string(),
            project_path: tmp.path().to_path_buf(),
            exit_file,
            auto_notify: true,
        };
        supervisor.finish(None).await;

        assert_eq!(
            jobs.get("web-11").map(|r| r.state.clone()),
            Some(JobState::Failed { exit_code: None })
        );
        let text = notify_rx.recv().await.expect("notification");
        assert!(text.contains("Killed"));
    }
}
