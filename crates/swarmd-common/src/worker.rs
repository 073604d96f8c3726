//! The `Worker` entity: one external subprocess carrying out part of a phase.

use crate::ids::{WorkerId, ORCHESTRATOR_PARENT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Working,
    Blocked,
    Completed,
    Failed,
    Error,
    Terminated,
}

impl WorkerStatus {
    /// Terminal statuses never mutate again (`spec.md` §3 Lifecycle).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Error | Self::Terminated)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "working" => Some(Self::Working),
            "blocked" => Some(Self::Blocked),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "error" => Some(Self::Error),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Working => "working",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// The four append-only file descriptors a worker owns exclusively
/// (`spec.md` §3 Ownership), plus the deploy log path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFiles {
    pub prompt_file: PathBuf,
    pub output_file: PathBuf,
    pub progress_file: PathBuf,
    pub findings_file: PathBuf,
    pub deploy_log: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: WorkerId,
    pub worker_type: String,
    pub mux_session: String,
    pub parent_id: String,
    pub depth: u32,
    pub phase_index: usize,
    pub status: WorkerStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub last_update: DateTime<Utc>,
    /// First 200 chars of the prompt, for listing without reading the file.
    pub prompt_preview: String,
    pub pid: Option<u32>,
    pub files: WorkerFiles,
}

impl Worker {
    pub fn new_root(
        worker_type: String,
        phase_index: usize,
        prompt: &str,
        files: WorkerFiles,
    ) -> Self {
        Self::new(worker_type, ORCHESTRATOR_PARENT.to_string(), 1, phase_index, prompt, files)
    }

    pub fn new_child(
        worker_type: String,
        parent_id: String,
        parent_depth: u32,
        phase_index: usize,
        prompt: &str,
        files: WorkerFiles,
    ) -> Self {
        Self::new(worker_type, parent_id, parent_depth + 1, phase_index, prompt, files)
    }

    fn new(
        worker_type: String,
        parent_id: String,
        depth: u32,
        phase_index: usize,
        prompt: &str,
        files: WorkerFiles,
    ) -> Self {
        let worker_id = WorkerId::generate(&worker_type);
        let mux_session = worker_id.mux_session_name();
        let now = Utc::now();
        let prompt_preview: String = prompt.chars().take(200).collect();
        Self {
            worker_id,
            worker_type,
            mux_session,
            parent_id,
            depth,
            phase_index,
            status: WorkerStatus::Running,
            started_at: now,
            completed_at: None,
            progress: 0,
            last_update: now,
            prompt_preview,
            pid: None,
            files,
        }
    }

    /// Reviewer-ness is derived from review membership, not the type tag
    /// (`spec.md` §9); this is a naming-convention convenience only, never
    /// relied on for access control.
    pub fn looks_like_reviewer(&self) -> bool {
        self.worker_type.contains("review")
    }

    pub fn apply_progress_update(&mut self, status: WorkerStatus, progress: u8) {
        self.status = status;
        self.progress = self.progress.max(progress);
        self.last_update = Utc::now();
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(self.last_update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> WorkerFiles {
        WorkerFiles {
            prompt_file: "/tmp/p".into(),
            output_file: "/tmp/o".into(),
            progress_file: "/tmp/pr".into(),
            findings_file: "/tmp/f".into(),
            deploy_log: "/tmp/d".into(),
        }
    }

    #[test]
    fn root_worker_has_depth_one_and_orchestrator_parent() {
        let w = Worker::new_root("investigator".into(), 0, "analyze cache", files());
        assert_eq!(w.depth, 1);
        assert_eq!(w.parent_id, ORCHESTRATOR_PARENT);
        assert_eq!(w.status, WorkerStatus::Running);
    }

    #[test]
    fn child_worker_depth_is_parent_plus_one() {
        let root = Worker::new_root("builder".into(), 0, "build it", files());
        let child = Worker::new_child(
            "sub-builder".into(),
            root.worker_id.as_str().to_string(),
            root.depth,
            0,
            "build part",
            files(),
        );
        assert_eq!(child.depth, root.depth + 1);
    }

    #[test]
    fn prompt_preview_truncates_to_200_chars() {
        let long = "x".repeat(500);
        let w = Worker::new_root("investigator".into(), 0, &long, files());
        assert_eq!(w.prompt_preview.chars().count(), 200);
    }

    #[test]
    fn terminal_progress_update_sets_completed_at_once() {
        let mut w = Worker::new_root("investigator".into(), 0, "x".repeat(30).as_str(), files());
        w.apply_progress_update(WorkerStatus::Completed, 100);
        let first = w.completed_at;
        w.apply_progress_update(WorkerStatus::Completed, 100);
        assert_eq!(w.completed_at, first);
    }

    #[test]
    fn progress_is_monotonic_by_wall_time() {
        let mut w = Worker::new_root("investigator".into(), 0, "x".repeat(30).as_str(), files());
        w.apply_progress_update(WorkerStatus::Working, 50);
        w.apply_progress_update(WorkerStatus::Working, 30);
        assert_eq!(w.progress, 50);
    }

    #[test]
    fn status_parse_roundtrips_known_strings() {
        for s in ["running", "working", "blocked", "completed", "failed", "error", "terminated"] {
            let parsed = WorkerStatus::parse(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!(WorkerStatus::parse("bogus").is_none());
    }
}
