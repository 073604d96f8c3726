//! HealthDaemon: periodic reconciler that scans live mux sessions, detects
//! dead workers and orphaned sessions, and escalates stalled reviews
//! (`spec.md` §4.6).

use crate::errors::StoreError;
use crate::eventlog;
use crate::mux::MuxAdapter;
use crate::store::StateStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use swarmd_common::{PhaseStatus, ProgressEvent, ReviewStatus, TaskStatus, WorkerStatus};
use tracing::{info, warn};

/// Session names hosting workers always begin with this prefix
/// (`WorkerId::mux_session_name`); anything else found live is out of scope.
const WORKER_SESSION_PREFIX: &str = "agent_";

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HealthReport {
    pub scanned_tasks: usize,
    pub terminated_workers: Vec<String>,
    pub escalated_reviews: Vec<String>,
    pub orphan_sessions: Vec<String>,
}

pub struct HealthDaemon {
    store: Arc<StateStore>,
    mux: Arc<dyn MuxAdapter>,
    scan_interval: Duration,
}

impl HealthDaemon {
    pub fn new(store: Arc<StateStore>, mux: Arc<dyn MuxAdapter>, scan_interval: Duration) -> Self {
        Self { store, mux, scan_interval }
    }

    /// Runs the periodic scan forever. Errors inside a single scan are
    /// logged, never propagated — the daemon never crashes the process
    /// (`spec.md` §8 property: HealthDaemon errors are non-fatal).
    pub async fn run_periodic(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.scan_interval);
        loop {
            interval.tick().await;
            let report = self.scan().await;
            info!(
                target: "swarmd::health",
                scanned = report.scanned_tasks,
                terminated = report.terminated_workers.len(),
                escalated = report.escalated_reviews.len(),
                orphans = report.orphan_sessions.len(),
                "health scan complete"
            );
        }
    }

    /// `trigger_health_scan`: runs one scan pass on demand and returns its
    /// report (`spec.md` §4.6).
    pub async fn scan(&self) -> HealthReport {
        let mut report = HealthReport::default();
        let live_sessions: HashSet<String> = self.mux.list_sessions().await.unwrap_or_default().into_iter().collect();

        let index = match self.store.read_index() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(target: "swarmd::health", error = %e, "failed to read global index, skipping scan");
                return report;
            }
        };

        let mut known_sessions = HashSet::new();
        for entry in index.iter().filter(|e| !matches!(e.status, TaskStatus::Completed | TaskStatus::Failed)) {
            report.scanned_tasks += 1;
            if let Err(e) = self.scan_task(&entry.task_id, &live_sessions, &mut known_sessions, &mut report).await {
                warn!(target: "swarmd::health", task_id = %entry.task_id, error = %e, "health scan failed for task");
            }
        }

        for session in &live_sessions {
            if session.starts_with(WORKER_SESSION_PREFIX) && !known_sessions.contains(session) {
                report.orphan_sessions.push(session.clone());
            }
        }

        report
    }

    async fn scan_task(
        &self,
        task_id: &str,
        live_sessions: &HashSet<String>,
        known_sessions: &mut HashSet<String>,
        report: &mut HealthReport,
    ) -> Result<(), StoreError> {
        let task = self.store.read_registry(task_id)?;
        known_sessions.extend(task.workers.iter().map(|w| w.mux_session.clone()));

        let newly_dead: Vec<(String, std::path::PathBuf)> = task
            .workers
            .iter()
            .filter(|w| !w.status.is_terminal())
            .filter(|w| !(live_sessions.contains(&w.mux_session) && pid_alive(w.pid)))
            .map(|w| (w.worker_id.as_str().to_string(), w.files.progress_file.clone()))
            .collect();

        if newly_dead.is_empty() {
            return Ok(());
        }

        let dead_ids: Vec<String> = newly_dead.iter().map(|(id, _)| id.clone()).collect();
        let escalated = self.store.with_locked_registry(task_id, {
            let dead_ids = dead_ids.clone();
            move |task| {
                for worker_id in &dead_ids {
                    if let Some(w) = task.find_worker_mut(worker_id)
                        && !w.status.is_terminal()
                    {
                        w.status = WorkerStatus::Terminated;
                        w.completed_at = Some(chrono::Utc::now());
                    }
                }

                let terminal_ids: Vec<String> = task
                    .workers
                    .iter()
                    .filter(|w| w.status.is_terminal())
                    .map(|w| w.worker_id.as_str().to_string())
                    .collect();

                let mut escalated = Vec::new();
                for idx in 0..task.reviews.len() {
                    if task.reviews[idx].status != ReviewStatus::InProgress {
                        continue;
                    }
                    if !task.reviews[idx].is_escalation(&terminal_ids) {
                        continue;
                    }
                    task.reviews[idx].status = ReviewStatus::Escalated;
                    task.reviews[idx].escalation_reason =
                        Some("all registered reviewers terminated without a verdict".to_string());
                    escalated.push(task.reviews[idx].review_id.as_str().to_string());
                    let phase_index = task.reviews[idx].phase_index;
                    if let Some(phase) = task.phases.get_mut(phase_index)
                        && phase.status == PhaseStatus::UnderReview
                    {
                        let _ = phase.try_transition(PhaseStatus::Escalated);
                    }
                }

                task.recompute_counters();
                Ok(escalated)
            }
        })?;

        for (worker_id, progress_path) in &newly_dead {
            let event = ProgressEvent {
                timestamp: chrono::Utc::now(),
                agent_id: worker_id.clone(),
                status: WorkerStatus::Terminated.to_string(),
                message: "health scan: mux session or process no longer alive".to_string(),
                progress: 0,
            };
            let _ = eventlog::append(progress_path, &event).await;
        }

        report.terminated_workers.extend(dead_ids);
        report.escalated_reviews.extend(escalated);
        Ok(())
    }
}

#[cfg(unix)]
fn pid_alive(pid: Option<u32>) -> bool {
    match pid {
        // PID not yet discovered (spawn race): don't treat as dead on this alone.
        None => true,
        Some(pid) => unsafe {
            if libc::kill(pid as libc::pid_t, 0) == 0 {
                true
            } else {
                std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
            }
        },
    }
}

#[cfg(not(unix))]
fn pid_alive(_pid: Option<u32>) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwarmdConfig;
    use crate::mux::FakeMuxAdapter;
    use crate::supervisor::WorkerSupervisor;
    use std::path::PathBuf;
    use swarmd_common::{Phase, Priority, Task};
    use tempfile::tempdir;

    async fn harness(dir: &std::path::Path) -> (HealthDaemon, WorkerSupervisor, String, Arc<FakeMuxAdapter>) {
        let config = SwarmdConfig { workspace_base: dir.to_path_buf(), ..SwarmdConfig::default() };
        let store = Arc::new(StateStore::open(config.clone()).unwrap());
        let mux = Arc::new(FakeMuxAdapter::new());
        let phase = Phase::new(0, "Investigation".into(), None, vec!["design.md".into()], vec!["documented".into()]);
        let mut task = Task::new(
            "investigate the cache layer for thread safety".into(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            dir.join("TASK-x"),
            vec![phase],
        );
        task.phases[0].status = PhaseStatus::Active;
        let task_id = task.task_id.as_str().to_string();
        store.create_task(task).unwrap();

        let supervisor = WorkerSupervisor::new(Arc::clone(&store), Arc::clone(&mux) as Arc<dyn MuxAdapter>, config);
        let health = HealthDaemon::new(store, Arc::clone(&mux) as Arc<dyn MuxAdapter>, Duration::from_secs(30));
        (health, supervisor, task_id, mux)
    }

    #[tokio::test]
    async fn scan_marks_worker_terminated_after_session_dies() {
        let dir = tempdir().unwrap();
        let (health, supervisor, task_id, mux) = harness(dir.path()).await;
        let outcome = supervisor.spawn_worker(&task_id, "investigator", "analyze cache").await.unwrap();
        mux.simulate_death(&outcome.worker.mux_session);

        let report = health.scan().await;
        assert_eq!(report.terminated_workers, vec![outcome.worker.worker_id.as_str().to_string()]);

        let task = supervisor.store().read_registry(&task_id).unwrap();
        assert_eq!(task.find_worker(outcome.worker.worker_id.as_str()).unwrap().status, WorkerStatus::Terminated);
        assert_eq!(task.counters.active_count, 0);
    }

    #[tokio::test]
    async fn scan_is_a_no_op_after_a_worker_is_already_terminated() {
        let dir = tempdir().unwrap();
        let (health, supervisor, task_id, mux) = harness(dir.path()).await;
        let outcome = supervisor.spawn_worker(&task_id, "investigator", "analyze cache").await.unwrap();
        supervisor.kill_worker(&task_id, outcome.worker.worker_id.as_str()).await.unwrap();
        let _ = mux;

        let report = health.scan().await;
        assert!(report.terminated_workers.is_empty());
    }

    #[tokio::test]
    async fn orphan_session_is_reported_but_not_killed() {
        let dir = tempdir().unwrap();
        let (health, _supervisor, _task_id, mux) = harness(dir.path()).await;
        mux.start_session("agent_ghost-000000-ab12cd", std::path::Path::new("/tmp"), &[]).await.unwrap();

        let report = health.scan().await;
        assert_eq!(report.orphan_sessions, vec!["agent_ghost-000000-ab12cd".to_string()]);
        assert!(mux.session_alive("agent_ghost-000000-ab12cd").await.unwrap());
    }
}
