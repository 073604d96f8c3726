//! The `Task` entity: a unit of work with ordered phases and a workspace.

use crate::ids::TaskId;
use crate::phase::Phase;
use crate::review::Review;
use crate::worker::Worker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Task priority, P0 (highest) through P4 (lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "P0" => Some(Self::P0),
            "P1" => Some(Self::P1),
            "P2" => Some(Self::P2),
            "P3" => Some(Self::P3),
            "P4" => Some(Self::P4),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
            Self::P4 => "P4",
        };
        f.write_str(s)
    }
}

/// Task lifecycle status per `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Initialized,
    Active,
    Completed,
    Failed,
}

/// Per-task resource limits, defaults per `spec.md` §6.5.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Limits {
    pub max_agents: usize,
    pub max_depth: usize,
    pub max_concurrent: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_agents: 45,
            max_depth: 5,
            max_concurrent: 20,
        }
    }
}

/// Running counters for a task, always re-derived from the worker list on
/// reconciliation (`spec.md` §9: never trust a denormalized counter on read).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    pub total_spawned: usize,
    pub active_count: usize,
    pub completed_count: usize,
}

/// The authoritative per-task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub description: String,
    pub priority: Priority,
    pub client_working_dir: PathBuf,
    pub workspace_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub phases: Vec<Phase>,
    pub current_phase_index: usize,
    pub workers: Vec<Worker>,
    /// child worker id -> parent worker id (or `"orchestrator"`).
    pub hierarchy: HashMap<String, String>,
    pub reviews: Vec<Review>,
    pub counters: Counters,
    pub limits: Limits,
}

impl Task {
    pub fn new(
        description: String,
        priority: Priority,
        client_working_dir: PathBuf,
        workspace_path: PathBuf,
        phases: Vec<Phase>,
    ) -> Self {
        Self {
            task_id: TaskId::generate(),
            description,
            priority,
            client_working_dir,
            workspace_path,
            created_at: Utc::now(),
            status: TaskStatus::Initialized,
            phases,
            current_phase_index: 0,
            workers: Vec::new(),
            hierarchy: HashMap::new(),
            reviews: Vec::new(),
            counters: Counters::default(),
            limits: Limits::default(),
        }
    }

    pub fn current_phase(&self) -> Option<&Phase> {
        self.phases.get(self.current_phase_index)
    }

    pub fn current_phase_mut(&mut self) -> Option<&mut Phase> {
        self.phases.get_mut(self.current_phase_index)
    }

    pub fn find_worker(&self, worker_id: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.worker_id.as_str() == worker_id)
    }

    pub fn find_worker_mut(&mut self, worker_id: &str) -> Option<&mut Worker> {
        self.workers.iter_mut().find(|w| w.worker_id.as_str() == worker_id)
    }

    pub fn find_review(&self, review_id: &str) -> Option<&Review> {
        self.reviews.iter().find(|r| r.review_id.as_str() == review_id)
    }

    pub fn find_review_mut(&mut self, review_id: &str) -> Option<&mut Review> {
        self.reviews.iter_mut().find(|r| r.review_id.as_str() == review_id)
    }

    /// Recompute counters from the current worker list. Never trust a
    /// denormalized counter on read (`spec.md` §9).
    pub fn recompute_counters(&mut self) {
        let active = self.workers.iter().filter(|w| !w.status.is_terminal()).count();
        let completed = self
            .workers
            .iter()
            .filter(|w| w.status == crate::worker::WorkerStatus::Completed)
            .count();
        self.counters.active_count = active;
        self.counters.completed_count = completed;
        self.counters.total_spawned = self.workers.len().max(self.counters.total_spawned);
    }
}
