//! Central path resolution for all Patchbay data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `PATCHBAY_DATA_DIR` env > `~/.patchbay`,
//! and CLI `--projects-dir` > `PATCHBAY_PROJECTS_DIR` env > `~/projects`.
//! All callsites use these helpers instead of constructing paths from `HOME`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);
static PROJECTS_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Initialize the global data directory. Returns the resolved path.
///
/// Priority: `explicit` arg > `PATCHBAY_DATA_DIR` env > `~/.patchbay` default.
/// Panics if no valid path can be resolved.
pub fn init_data_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = if let Some(p) = explicit {
        p.to_path_buf()
    } else if let Ok(env_val) = std::env::var("PATCHBAY_DATA_DIR") {
        PathBuf::from(env_val)
    } else {
        dirs::home_dir()
            .expect("HOME directory not found")
            .join(".patchbay")
    };

    let mut guard = DATA_DIR.write().expect("DATA_DIR lock poisoned");
    *guard = Some(dir.clone());
    dir
}

/// Initialize the global projects directory. Returns the resolved path.
///
/// Priority: `explicit` arg > `PATCHBAY_PROJECTS_DIR` env > `~/projects` default.
pub fn init_projects_dir(explicit: Option<&Path>) -> PathBuf {
    let dir = if let Some(p) = explicit {
        p.to_path_buf()
    } else if let Ok(env_val) = std::env::var("PATCHBAY_PROJECTS_DIR") {
        PathBuf::from(env_val)
    } else {
        dirs::home_dir()
            .expect("HOME directory not found")
            .join("projects")
    };

    let mut guard = PROJECTS_DIR.write().expect("PROJECTS_DIR lock poisoned");
    *guard = Some(dir.clone());
    dir
}

/// Return the current data directory. Panics if `init_data_dir` hasn't been called.
pub fn data_dir() -> PathBuf {
    DATA_DIR
        .read()
        .expect("DATA_DIR lock poisoned")
        .clone()
        .expect("data_dir() called before init_data_dir()")
}

/// Return the projects directory. Panics if `init_projects_dir` hasn't been called.
pub fn projects_dir() -> PathBuf {
    PROJECTS_DIR
        .read()
        .expect("PROJECTS_DIR lock poisoned")
        .clone()
        .expect("projects_dir() called before init_projects_dir()")
}

/// Job and server logs live here.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Generated job scripts live here.
pub fn script_dir() -> PathBuf {
    data_dir().join("scripts")
}

/// Optional env file sourced by job scripts before the executor runs.
pub fn env_file_path() -> PathBuf {
    data_dir().join(".env")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    let base = data_dir();
    std::fs::create_dir_all(&base)?;
    std::fs::create_dir_all(base.join("logs"))?;
    std::fs::create_dir_all(base.join("scripts"))?;
    Ok(())
}

/// Reset path statics, for test isolation only.
#[cfg(test)]
pub fn reset_dirs() {
    let mut guard = DATA_DIR.write().expect("DATA_DIR lock poisoned");
    *guard = None;
    let mut guard = PROJECTS_DIR.write().expect("PROJECTS_DIR lock poisoned");
    *guard = None;
}
