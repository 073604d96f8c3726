//! WorkerSupervisor: spawns workers inside mux sessions, tracks PIDs and
//! file handles, detects termination, performs guaranteed cleanup
//! (`spec.md` §4.2).

mod tee;

use crate::config::SwarmdConfig;
use crate::errors::{StoreError, SupervisorError};
use crate::eventlog::{self, OutputFormat};
use crate::mux::MuxAdapter;
use crate::store::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarmd_common::{Task, Worker, WorkerFiles, WorkerStatus};
use tracing::{info, warn};

pub use tee::run_output_tee;

/// Minimum free disk required to spawn, per `spec.md` §4.2.1 / §6.5.
const MIN_FREE_DISK_BYTES: u64 = 100 * 1024 * 1024;

pub struct WorkerSupervisor {
    store: Arc<StateStore>,
    mux: Arc<dyn MuxAdapter>,
    config: SwarmdConfig,
}

pub struct SpawnOutcome {
    pub worker: Worker,
}

impl WorkerSupervisor {
    pub fn new(store: Arc<StateStore>, mux: Arc<dyn MuxAdapter>, config: SwarmdConfig) -> Self {
        Self { store, mux, config }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Current task-wide counters, for the minimal coordination response's
    /// `agent_counts` (`spec.md` §6.2.3).
    pub fn task_counters(&self, task_id: &str) -> Result<swarmd_common::Counters, SupervisorError> {
        Ok(self.store.read_registry(task_id)?.counters)
    }

    /// Last `n` findings across every worker in the task, newest last
    /// (`spec.md` §6.2.3: "last 3 findings across the task"). Each worker's
    /// own tail of at most `n` lines is a superset of its contribution to
    /// the task-wide top `n`, so reading per-worker tails and merging is
    /// sufficient without scanning whole files.
    pub async fn recent_findings(&self, task_id: &str, n: usize) -> Result<Vec<swarmd_common::FindingEvent>, SupervisorError> {
        let task = self.store.read_registry(task_id)?;
        let mut all = Vec::new();
        for worker in &task.workers {
            let tail = eventlog::read_tail(&worker.files.findings_file, n)
                .await
                .map_err(|e| SupervisorError::SpawnFailed(std::io::Error::other(e)))?;
            all.extend(tail.into_iter().filter_map(|v| serde_json::from_value(v).ok()));
        }
        all.sort_by_key(|e: &swarmd_common::FindingEvent| e.timestamp);
        let start = all.len().saturating_sub(n);
        Ok(all[start..].to_vec())
    }

    /// `spawn_worker`: root-level spawn, parent defaults to the
    /// orchestrator sentinel.
    pub async fn spawn_worker(
        &self,
        task_id: &str,
        worker_type: &str,
        prompt: &str,
    ) -> Result<SpawnOutcome, SupervisorError> {
        self.spawn(task_id, worker_type, prompt, swarmd_common::ORCHESTRATOR_PARENT, false).await
    }

    /// `spawn_child`: same as `spawn_worker` but parent is the caller,
    /// enforcing max-depth.
    pub async fn spawn_child(
        &self,
        task_id: &str,
        parent_worker_id: &str,
        worker_type: &str,
        prompt: &str,
    ) -> Result<SpawnOutcome, SupervisorError> {
        self.spawn(task_id, worker_type, prompt, parent_worker_id, false).await
    }

    /// Root-level spawn for a reviewer worker, called only from
    /// `trigger_agentic_review`. Reviewer-ness is the caller's explicit
    /// intent, not something inferred from `worker_type` or spawn topology
    /// (`spec.md` §4.2.1 step 2: the phase-acceptance gate must tell an
    /// ordinary worker from a reviewer correctly).
    pub async fn spawn_reviewer(&self, task_id: &str, worker_type: &str, prompt: &str) -> Result<SpawnOutcome, SupervisorError> {
        self.spawn(task_id, worker_type, prompt, swarmd_common::ORCHESTRATOR_PARENT, true).await
    }

    async fn spawn(
        &self,
        task_id: &str,
        worker_type: &str,
        prompt: &str,
        parent_id: &str,
        is_reviewer: bool,
    ) -> Result<SpawnOutcome, SupervisorError> {
        crate::validation::validate_worker_type(worker_type)
            .map_err(|e| SupervisorError::Store(StoreError::Other(anyhow::anyhow!(e))))?;
        preflight_disk_and_write_access(&self.config.task_dir(task_id), self.config.min_free_disk_bytes)?;

        let task_dir = self.config.task_dir(task_id);
        let agent_binary = self.config.agent_binary.clone();
        let mux_for_start = Arc::clone(&self.mux);
        let worker_type_owned = worker_type.to_string();
        let prompt_owned = prompt.to_string();
        let parent_id_owned = parent_id.to_string();

        let worker = self
            .store
            .with_locked_registry(task_id, move |task| {
                validate_spawn_capacity(task, is_reviewer)?;

                let parent_depth = if parent_id_owned == swarmd_common::ORCHESTRATOR_PARENT {
                    0
                } else {
                    task.find_worker(&parent_id_owned)
                        .map(|w| w.depth)
                        .ok_or_else(|| StoreError::Other(anyhow::anyhow!("parent worker not found")))?
                };
                if parent_depth as usize + 1 > task.limits.max_depth {
                    return Err(StoreError::Other(anyhow::anyhow!(
                        "max_depth ({}) exceeded spawning under {}",
                        task.limits.max_depth,
                        parent_id_owned
                    )));
                }

                let files = build_worker_files(&task_dir, &worker_type_owned, task.workers.len());
                let mut worker = if parent_id_owned == swarmd_common::ORCHESTRATOR_PARENT {
                    Worker::new_root(worker_type_owned.clone(), task.current_phase_index, &prompt_owned, files)
                } else {
                    Worker::new_child(
                        worker_type_owned.clone(),
                        parent_id_owned.clone(),
                        parent_depth,
                        task.current_phase_index,
                        &prompt_owned,
                        files,
                    )
                };

                // Dedup on the vanishingly rare id collision (spec.md §4.4).
                while StateStore::worker_id_taken(task, worker.worker_id.as_str()) {
                    let files = worker.files.clone();
                    worker = Worker::new_root(worker_type_owned.clone(), task.current_phase_index, &prompt_owned, files);
                }

                std::fs::write(&worker.files.prompt_file, &prompt_owned)
                    .map_err(|source| StoreError::WriteFailed { path: worker.files.prompt_file.clone(), source })?;
                for path in [&worker.files.output_file, &worker.files.progress_file, &worker.files.findings_file] {
                    std::fs::File::create(path)
                        .map_err(|source| StoreError::WriteFailed { path: path.clone(), source })?;
                }

                task.hierarchy.insert(worker.worker_id.as_str().to_string(), parent_id_owned.clone());
                task.workers.push(worker.clone());
                task.counters.total_spawned += 1;
                task.counters.active_count += 1;
                if task.status == swarmd_common::TaskStatus::Initialized {
                    task.status = swarmd_common::TaskStatus::Active;
                }
                Ok(worker)
            })
            .map_err(SupervisorError::from)?;

        let raw_path_for_command = raw_output_path(&worker.files.output_file);
        let command = vec![spawn_command_line(&agent_binary, &worker, &raw_path_for_command)];
        if let Err(e) = mux_for_start
            .start_session(&worker.mux_session, &task_dir, &command)
            .await
        {
            warn!(target: "swarmd::supervisor", worker_id = %worker.worker_id, error = %e, "mux session start failed, reverting spawn");
            let _ = self.cleanup_failed_spawn(task_id, worker.worker_id.as_str()).await;
            return Err(SupervisorError::MuxStartFailed {
                session: worker.mux_session.clone(),
                reason: e.to_string(),
            });
        }

        let mux_for_tee = Arc::clone(&self.mux);
        let line_cap = self.config.smart_tee_line_cap;
        let field_cap = self.config.tool_result_content_cap;
        let raw_path = raw_output_path(&worker.files.output_file);
        let output_path = worker.files.output_file.clone();
        tokio::spawn(tee::run_output_tee(mux_for_tee, worker.mux_session.clone(), raw_path, output_path, line_cap, field_cap));

        let mux_for_pid = Arc::clone(&self.mux);
        let store_for_pid = Arc::clone(&self.store);
        let task_id_owned = task_id.to_string();
        let worker_id_owned = worker.worker_id.as_str().to_string();
        let session = worker.mux_session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if let Ok(Some(pid)) = mux_for_pid.pane_pid(&session).await {
                let _ = store_for_pid.with_locked_registry(&task_id_owned, |task| {
                    if let Some(w) = task.find_worker_mut(&worker_id_owned) {
                        w.pid = Some(pid);
                    }
                    Ok(())
                });
            }
        });

        info!(target: "swarmd::supervisor", worker_id = %worker.worker_id, task_id, "worker spawned");
        Ok(SpawnOutcome { worker })
    }

    async fn cleanup_failed_spawn(&self, task_id: &str, worker_id: &str) -> Result<(), StoreError> {
        self.store.with_locked_registry(task_id, |task| {
            if let Some(pos) = task.workers.iter().position(|w| w.worker_id.as_str() == worker_id) {
                let worker = task.workers.remove(pos);
                let _ = std::fs::remove_file(&worker.files.prompt_file);
                let _ = std::fs::remove_file(&worker.files.output_file);
                let _ = std::fs::remove_file(&worker.files.progress_file);
                let _ = std::fs::remove_file(&worker.files.findings_file);
                task.hierarchy.remove(worker_id);
                task.counters.total_spawned = task.counters.total_spawned.saturating_sub(1);
                task.counters.active_count = task.counters.active_count.saturating_sub(1);
            }
            Ok(())
        })
    }

    pub async fn get_worker_output(
        &self,
        task_id: &str,
        worker_id: &str,
        tail: Option<usize>,
        filter: Option<&regex::Regex>,
        format: OutputFormat,
        include_metadata: bool,
    ) -> Result<eventlog::BoundedRead, SupervisorError> {
        let task = self.store.read_registry(task_id)?;
        let worker = task
            .find_worker(worker_id)
            .ok_or_else(|| SupervisorError::WorkerNotFound { task_id: task_id.to_string(), worker_id: worker_id.to_string() })?;
        eventlog::read_bounded(&worker.files.output_file, tail, filter, format, include_metadata)
            .await
            .map_err(|e| SupervisorError::SpawnFailed(std::io::Error::other(e)))
    }

    /// `kill_worker`: marks terminated, kills the mux session, decrements
    /// `active_count`, schedules file-handle cleanup.
    pub async fn kill_worker(&self, task_id: &str, worker_id: &str) -> Result<Worker, SupervisorError> {
        let session = {
            let task = self.store.read_registry(task_id)?;
            task.find_worker(worker_id)
                .map(|w| w.mux_session.clone())
                .ok_or_else(|| SupervisorError::WorkerNotFound { task_id: task_id.to_string(), worker_id: worker_id.to_string() })?
        };

        let _ = self.mux.kill_session(&session).await;

        let worker_id_owned = worker_id.to_string();
        let updated = self
            .store
            .with_locked_registry(task_id, move |task| {
                let worker = task
                    .find_worker_mut(&worker_id_owned)
                    .ok_or_else(|| StoreError::Other(anyhow::anyhow!("worker vanished under lock")))?;
                if !worker.status.is_terminal() {
                    worker.status = WorkerStatus::Terminated;
                    worker.completed_at = Some(chrono::Utc::now());
                }
                let result = worker.clone();
                task.recompute_counters();
                Ok(result)
            })
            .map_err(SupervisorError::from)?;

        Ok(updated)
    }

    /// `update_progress`: appends to the progress stream, updates the
    /// materialized worker record under lock.
    pub async fn update_progress(
        &self,
        task_id: &str,
        worker_id: &str,
        status: WorkerStatus,
        message: &str,
        progress: u8,
    ) -> Result<Worker, SupervisorError> {
        let progress_path = {
            let task = self.store.read_registry(task_id)?;
            task.find_worker(worker_id)
                .map(|w| w.files.progress_file.clone())
                .ok_or_else(|| SupervisorError::WorkerNotFound { task_id: task_id.to_string(), worker_id: worker_id.to_string() })?
        };

        let event = swarmd_common::ProgressEvent {
            timestamp: chrono::Utc::now(),
            agent_id: worker_id.to_string(),
            status: status.to_string(),
            message: message.to_string(),
            progress,
        };
        eventlog::append(&progress_path, &event)
            .await
            .map_err(|e| SupervisorError::SpawnFailed(std::io::Error::other(e)))?;

        let worker_id_owned = worker_id.to_string();
        let updated = self
            .store
            .with_locked_registry(task_id, move |task| {
                let worker = task
                    .find_worker_mut(&worker_id_owned)
                    .ok_or_else(|| StoreError::Other(anyhow::anyhow!("worker vanished under lock")))?;
                if worker.status.is_terminal() {
                    // Terminal workers never mutate again (spec.md §3 Lifecycle).
                    return Ok(worker.clone());
                }
                worker.apply_progress_update(status, progress);
                let result = worker.clone();
                task.recompute_counters();
                Ok(result)
            })
            .map_err(SupervisorError::from)?;

        Ok(updated)
    }

    /// `report_finding`: appends to the findings stream only; no registry
    /// mutation beyond what the caller layers on top (auto-review check).
    pub async fn report_finding(
        &self,
        task_id: &str,
        worker_id: &str,
        finding_type: swarmd_common::FindingType,
        severity: swarmd_common::Severity,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), SupervisorError> {
        let findings_path = {
            let task = self.store.read_registry(task_id)?;
            task.find_worker(worker_id)
                .map(|w| w.files.findings_file.clone())
                .ok_or_else(|| SupervisorError::WorkerNotFound { task_id: task_id.to_string(), worker_id: worker_id.to_string() })?
        };
        let event = swarmd_common::FindingEvent {
            timestamp: chrono::Utc::now(),
            agent_id: worker_id.to_string(),
            finding_type,
            severity,
            message: message.to_string(),
            data,
        };
        eventlog::append(&findings_path, &event)
            .await
            .map_err(|e| SupervisorError::SpawnFailed(std::io::Error::other(e)))?;
        Ok(())
    }

    /// Lazy termination detection (`spec.md` §4.2.3): mark a worker
    /// `terminated` if its mux session is gone. Called on any read and by
    /// `HealthDaemon`.
    pub async fn detect_termination(&self, task_id: &str, worker: &Worker) -> Result<bool, SupervisorError> {
        if worker.status.is_terminal() {
            return Ok(false);
        }
        let alive = self.mux.session_alive(&worker.mux_session).await.unwrap_or(false);
        if alive {
            return Ok(false);
        }
        let worker_id = worker.worker_id.as_str().to_string();
        self.store
            .with_locked_registry(task_id, move |task| {
                if let Some(w) = task.find_worker_mut(&worker_id)
                    && !w.status.is_terminal()
                {
                    w.status = WorkerStatus::Terminated;
                    w.completed_at = Some(chrono::Utc::now());
                }
                task.recompute_counters();
                Ok(())
            })
            .map_err(SupervisorError::from)?;
        Ok(true)
    }
}

fn validate_spawn_capacity(task: &Task, is_reviewer: bool) -> Result<(), StoreError> {
    if task.counters.total_spawned >= task.limits.max_agents {
        return Err(StoreError::Other(anyhow::anyhow!("max_agents exceeded")));
    }
    if task.counters.active_count >= task.limits.max_concurrent {
        return Err(StoreError::Other(anyhow::anyhow!("max_concurrent exceeded")));
    }
    let phase = task
        .current_phase()
        .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no current phase")))?;
    let accepts = if is_reviewer { phase.status.accepts_reviewer_workers() } else { phase.status.accepts_new_workers() };
    if !accepts {
        return Err(StoreError::Other(anyhow::anyhow!(
            "phase {} does not accept new workers",
            phase.status
        )));
    }
    Ok(())
}

fn preflight_disk_and_write_access(task_dir: &std::path::Path, min_free: u64) -> Result<(), SupervisorError> {
    std::fs::create_dir_all(task_dir)
        .map_err(|_| SupervisorError::WorkspaceNotWritable { path: task_dir.to_path_buf() })?;
    let probe = task_dir.join(".write_probe");
    std::fs::write(&probe, b"x").map_err(|_| SupervisorError::WorkspaceNotWritable { path: task_dir.to_path_buf() })?;
    let _ = std::fs::remove_file(&probe);

    match fs2::available_space(task_dir) {
        Ok(available) if available < min_free.max(MIN_FREE_DISK_BYTES) => {
            Err(SupervisorError::InsufficientResources { path: task_dir.to_path_buf() })
        }
        Ok(_) => Ok(()),
        Err(_) => Ok(()), // platform without statvfs support: don't block spawns on it
    }
}

fn build_worker_files(task_dir: &std::path::Path, worker_type: &str, ordinal: usize) -> WorkerFiles {
    let stem = format!("{worker_type}-{ordinal}");
    WorkerFiles {
        prompt_file: task_dir.join("prompts").join(format!("{stem}.prompt")),
        output_file: task_dir.join("logs").join(format!("{stem}.output.jsonl")),
        progress_file: task_dir.join("progress").join(format!("{stem}.progress.jsonl")),
        findings_file: task_dir.join("findings").join(format!("{stem}.findings.jsonl")),
        deploy_log: task_dir.join("logs").join(format!("{stem}.deploy.json")),
    }
}

fn raw_output_path(output_file: &std::path::Path) -> PathBuf {
    let mut raw = output_file.to_path_buf();
    raw.set_extension("raw.jsonl");
    raw
}

/// stdout+stderr are redirected into the worker's raw output file; the
/// background tee task (`tee::run_output_tee`) polls that file and smart-tees
/// each complete line into the official output stream (`spec.md` §4.2.1 step 7).
fn spawn_command_line(agent_binary: &str, worker: &Worker, raw_path: &std::path::Path) -> String {
    format!(
        "{} --stream-json --prompt-file {} >> {} 2>&1",
        agent_binary,
        worker.files.prompt_file.display(),
        raw_path.display()
    )
}
