//! In-memory `MuxAdapter` for tests: no real tmux/agent binary required.

use super::MuxAdapter;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct FakeSession {
    alive: bool,
    pid: Option<u32>,
    captured: String,
}

/// Records every session it was asked to start; `kill_session` marks a
/// session dead rather than removing it, so tests can assert a worker's
/// session existed and was torn down.
#[derive(Default)]
pub struct FakeMuxAdapter {
    sessions: Mutex<HashMap<String, FakeSession>>,
    next_pid: Mutex<u32>,
}

impl FakeMuxAdapter {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_pid: Mutex::new(10_000),
        }
    }

    pub fn set_captured_output(&self, name: &str, text: impl Into<String>) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(name) {
            session.captured = text.into();
        }
    }

    /// Test hook simulating the worker process dying out from under the
    /// mux session, without an explicit `kill_session` call.
    pub fn simulate_death(&self, name: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(name) {
            session.alive = false;
        }
    }
}

#[async_trait]
impl MuxAdapter for FakeMuxAdapter {
    async fn start_session(&self, name: &str, _working_dir: &Path, _command: &[String]) -> Result<()> {
        let mut next_pid = self.next_pid.lock().unwrap();
        let pid = *next_pid;
        *next_pid += 1;
        self.sessions.lock().unwrap().insert(
            name.to_string(),
            FakeSession { alive: true, pid: Some(pid), captured: String::new() },
        );
        Ok(())
    }

    async fn session_alive(&self, name: &str) -> Result<bool> {
        Ok(self.sessions.lock().unwrap().get(name).map(|s| s.alive).unwrap_or(false))
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(name) {
            session.alive = false;
        }
        Ok(())
    }

    async fn capture_output(&self, name: &str, _last_n_lines: Option<usize>) -> Result<String> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(name)
            .map(|s| s.captured.clone())
            .unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.alive)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn pane_pid(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.sessions.lock().unwrap().get(name).and_then(|s| s.pid))
    }
}
