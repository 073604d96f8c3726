//! `tmux`-backed implementation of `MuxAdapter`, shelling out to a
//! tmux-compatible binary.

use super::MuxAdapter;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

pub struct TmuxAdapter {
    binary: String,
}

impl TmuxAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run `{} {}`", self.binary, args.join(" ")))
    }
}

#[async_trait]
impl MuxAdapter for TmuxAdapter {
    async fn start_session(&self, name: &str, working_dir: &Path, command: &[String]) -> Result<()> {
        let working_dir = working_dir.to_string_lossy().to_string();
        let joined = command.join(" ");
        let output = self
            .run(&["new-session", "-d", "-s", name, "-c", &working_dir, &joined])
            .await?;
        if !output.status.success() {
            bail!(
                "tmux new-session failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    async fn session_alive(&self, name: &str) -> Result<bool> {
        let output = self.run(&["has-session", "-t", name]).await?;
        Ok(output.status.success())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        let output = self.run(&["kill-session", "-t", name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("session not found") {
                bail!("tmux kill-session failed: {stderr}");
            }
        }
        Ok(())
    }

    async fn capture_output(&self, name: &str, last_n_lines: Option<usize>) -> Result<String> {
        let start_arg = last_n_lines.map(|n| format!("-{n}")).unwrap_or_else(|| "-".to_string());
        let output = self
            .run(&["capture-pane", "-t", name, "-p", "-S", &start_arg])
            .await?;
        if !output.status.success() {
            bail!(
                "tmux capture-pane failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let output = self.run(&["list-sessions", "-F", "#{session_name}"]).await?;
        if !output.status.success() {
            // No server running means no sessions, not an error.
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    async fn pane_pid(&self, name: &str) -> Result<Option<u32>> {
        let output = self
            .run(&["list-panes", "-t", name, "-F", "#{pane_pid}"])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().and_then(|l| l.trim().parse().ok()))
    }
}
