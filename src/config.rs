use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Browser origins get about this much; the workspace store mirrors it.
pub const DEFAULT_STORAGE_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Sidecar settings. Every flag can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "lessonbookd", version, about = "Lesson planning data sidecar")]
pub struct Config {
    /// Open this workspace at startup instead of waiting for `workspace.select`.
    #[arg(long, env = "LESSONBOOK_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Base URL of the OpenAI-compatible chat API.
    #[arg(long, env = "LESSONBOOK_API_BASE", default_value = "https://api.openai.com/v1")]
    pub api_base: String,

    #[arg(long, env = "LESSONBOOK_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Largest single value the workspace store accepts.
    #[arg(long, env = "LESSONBOOK_STORAGE_QUOTA_BYTES", default_value_t = DEFAULT_STORAGE_QUOTA_BYTES)]
    pub storage_quota_bytes: usize,

    /// Default log filter; `RUST_LOG` overrides it.
    #[arg(long, env = "LESSONBOOK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
