//! Thin wrapper over the external terminal-multiplexer capability
//! (`spec.md` §6.3, `MuxAdapter`). This crate's only hard requirement is the
//! trait; `TmuxAdapter` and `FakeMuxAdapter` are both ambient additions so
//! the daemon is runnable end to end without a live tmux binary in tests.

mod fake;
mod tmux;

pub use fake::FakeMuxAdapter;
pub use tmux::TmuxAdapter;

use async_trait::async_trait;

#[async_trait]
pub trait MuxAdapter: Send + Sync {
    async fn start_session(
        &self,
        name: &str,
        working_dir: &std::path::Path,
        command: &[String],
    ) -> anyhow::Result<()>;

    async fn session_alive(&self, name: &str) -> anyhow::Result<bool>;

    async fn kill_session(&self, name: &str) -> anyhow::Result<()>;

    async fn capture_output(&self, name: &str, last_n_lines: Option<usize>) -> anyhow::Result<String>;

    async fn list_sessions(&self) -> anyhow::Result<Vec<String>>;

    async fn pane_pid(&self, name: &str) -> anyhow::Result<Option<u32>>;
}
