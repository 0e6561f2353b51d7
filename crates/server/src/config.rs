//! Server configuration
//!
//! Everything is settable by flag or environment variable; directory
//! defaults are resolved in [`crate::paths`].

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "patchbay",
    about = "Conversational thread server for a shared task executor",
    version
)]
pub struct Config {
    /// Port the WebSocket/HTTP listener binds on
    #[arg(long, env = "PATCHBAY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Data directory for logs and job scripts (default ~/.patchbay)
    #[arg(long, env = "PATCHBAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory holding project checkouts (default ~/projects)
    #[arg(long, env = "PATCHBAY_PROJECTS_DIR")]
    pub projects_dir: Option<PathBuf>,

    /// Executor binary run for thread messages and background jobs
    #[arg(long, env = "PATCHBAY_EXECUTOR_BIN", default_value = "claude")]
    pub executor_bin: String,

    /// Seconds a streaming executor run may take before it is killed
    #[arg(long, env = "PATCHBAY_EXECUTOR_TIMEOUT_SECS", default_value_t = 600)]
    pub executor_timeout_secs: u64,

    /// Telegram bot token for job notifications; unset disables delivery
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Telegram chat id receiving job notifications
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Config;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = Config::parse_from(["patchbay"]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.executor_bin, "claude");
        assert_eq!(config.executor_timeout_secs, 600);
        assert!(config.data_dir.is_none());
        assert!(config.telegram_bot_token.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "patchbay",
            "--port",
            "9000",
            "--executor-bin",
            "mock-exec",
            "--projects-dir",
            "/srv/projects",
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.executor_bin, "mock-exec");
        assert_eq!(
            config.projects_dir.as_deref(),
            Some(std::path::Path::new("/srv/projects"))
        );
    }
}
