//! PhaseEngine: owns the task/phase lifecycle and the agentic review
//! protocol (`spec.md` §4.1).

use crate::config::SwarmdConfig;
use crate::errors::{PhaseEngineError, StoreError};
use crate::store::StateStore;
use crate::supervisor::WorkerSupervisor;
use crate::validation::{validate_new_task, PhaseSpec};
use std::sync::Arc;
use swarmd_common::{Phase, PhaseStatus, Priority, Review, ReviewStatus, SeverityCounts, Task, TaskStatus, Verdict, VerdictRecord};
use tracing::info;

pub struct PhaseEngine {
    store: Arc<StateStore>,
    supervisor: Arc<WorkerSupervisor>,
    config: SwarmdConfig,
}

/// Handover document produced when a phase reaches `APPROVED`
/// (`spec.md` §3 Phase.handover).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PhaseHandover {
    pub phase_id: String,
    pub order_index: usize,
    pub summary: String,
    pub expected_deliverables: Vec<String>,
    pub success_criteria: Vec<String>,
}

impl PhaseEngine {
    pub fn new(store: Arc<StateStore>, supervisor: Arc<WorkerSupervisor>, config: SwarmdConfig) -> Self {
        Self { store, supervisor, config }
    }

    /// Validates input (`spec.md` §4.5), then registers a new task with its
    /// phases in `PENDING`, activating the first phase.
    pub fn create_task(
        &self,
        description: String,
        priority: Priority,
        client_working_dir: std::path::PathBuf,
        phases: Vec<PhaseSpec>,
    ) -> Result<Task, PhaseEngineError> {
        validate_new_task(&description, &phases)
            .map_err(|errors| PhaseEngineError::Store(StoreError::Other(anyhow::anyhow!(errors.join("; ")))))?;

        let phase_entities: Vec<Phase> = phases
            .into_iter()
            .enumerate()
            .map(|(idx, spec)| {
                Phase::new(idx, spec.name, spec.description, spec.expected_deliverables, spec.success_criteria)
            })
            .collect();

        let task_id = swarmd_common::TaskId::generate();
        let workspace_path = self.config.task_dir(task_id.as_str());
        let mut task = Task::new(description, priority, client_working_dir, workspace_path, phase_entities);
        task.task_id = task_id;
        if let Some(first) = task.phases.first_mut() {
            first.try_transition(PhaseStatus::Active);
        }

        let task = self.store.create_task(task)?;
        info!(target: "swarmd::phase_engine", task_id = %task.task_id, "task created");
        Ok(task)
    }

    pub fn get_phase_status(&self, task_id: &str) -> Result<Phase, PhaseEngineError> {
        let task = self.store.read_registry(task_id)?;
        current_phase(&task).map(|p| p.clone())
    }

    /// Re-derives counters and runs the auto-submission check
    /// (`spec.md` §4.1.2) without requiring a worker status transition to
    /// have just happened — used for polling/on-demand progress checks.
    pub fn check_phase_progress(&self, task_id: &str) -> Result<Task, PhaseEngineError> {
        self.store
            .with_locked_registry(task_id, |task| {
                task.recompute_counters();
                maybe_auto_submit(task);
                Ok(())
            })?;
        Ok(self.store.read_registry(task_id)?)
    }

    /// Manual equivalent of auto-submission: forces the current phase from
    /// `ACTIVE`/`REVISING` into `AWAITING_REVIEW`.
    pub fn submit_phase_for_review(&self, task_id: &str) -> Result<Phase, PhaseEngineError> {
        self.store.with_locked_registry(task_id, |task| {
            let idx = task.current_phase_index;
            let phase = task
                .phases
                .get_mut(idx)
                .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no current phase")))?;
            require_phase_state(phase, &[PhaseStatus::Active, PhaseStatus::Revising])?;
            phase.try_transition(PhaseStatus::AwaitingReview);
            Ok(())
        })?;
        self.trigger_agentic_review(task_id)
    }

    /// Spawns `default_reviewer_count` reviewer workers against the current
    /// phase and transitions it into `UNDER_REVIEW`.
    pub async fn trigger_agentic_review(&self, task_id: &str) -> Result<Phase, PhaseEngineError> {
        let phase_index = {
            let task = self.store.read_registry(task_id)?;
            task.current_phase_index
        };

        let mut reviewer_ids = Vec::new();
        for n in 0..self.config.default_reviewer_count {
            let prompt = format!("review phase {phase_index} deliverables (reviewer {n})");
            let outcome = self.supervisor.spawn_reviewer(task_id, "reviewer", &prompt).await?;
            reviewer_ids.push(outcome.worker.worker_id.as_str().to_string());
        }

        let phase = self.store.with_locked_registry(task_id, move |task| {
            let phase = task
                .phases
                .get_mut(phase_index)
                .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no phase at index {phase_index}")))?;
            require_phase_state(phase, &[PhaseStatus::AwaitingReview])?;
            phase.try_transition(PhaseStatus::UnderReview);
            let review = Review::new(phase_index, reviewer_ids);
            task.reviews.push(review);
            Ok(phase.clone())
        })?;
        Ok(phase)
    }

    /// Idempotent: the first verdict from a given reviewer wins
    /// (`spec.md` §4.1.5).
    pub fn submit_review_verdict(
        &self,
        task_id: &str,
        review_id: &str,
        reviewer_id: &str,
        verdict: Verdict,
        severity_counts: SeverityCounts,
    ) -> Result<Review, PhaseEngineError> {
        let review_id_owned = review_id.to_string();
        let reviewer_id_owned = reviewer_id.to_string();
        self.store.with_locked_registry(task_id, move |task| {
            let terminal_ids: Vec<String> = task
                .workers
                .iter()
                .filter(|w| w.status.is_terminal())
                .map(|w| w.worker_id.as_str().to_string())
                .collect();

            let review = task
                .find_review_mut(&review_id_owned)
                .ok_or_else(|| StoreError::Other(anyhow::anyhow!("review {review_id_owned} not found")))?;

            let record = VerdictRecord {
                reviewer_id: reviewer_id_owned.clone(),
                verdict,
                severity_counts,
                submitted_at: chrono::Utc::now(),
            };
            if !review.record_verdict(record) {
                return Err(StoreError::Other(anyhow::anyhow!(
                    "verdict already submitted by reviewer {reviewer_id_owned}"
                )));
            }

            let phase_index = review.phase_index;
            if review.is_escalation(&terminal_ids) {
                escalate_review(task, phase_index);
            } else if let Some(final_verdict) = review.aggregate(&terminal_ids) {
                apply_aggregated_verdict(task, phase_index, final_verdict)?;
            }

            Ok(task.find_review(&review_id_owned).cloned().unwrap())
        })
        .map_err(Into::into)
    }

    pub fn get_review_status(&self, task_id: &str, review_id: &str) -> Result<Review, PhaseEngineError> {
        let task = self.store.read_registry(task_id)?;
        task.find_review(review_id)
            .cloned()
            .ok_or_else(|| PhaseEngineError::ReviewNotFound { review_id: review_id.to_string() })
    }

    /// Manually escalates a review that is not converging (e.g. stuck
    /// `in_progress` with no reviewers left alive but not yet caught by
    /// `HealthDaemon`).
    pub fn abort_stalled_review(&self, task_id: &str, review_id: &str) -> Result<Review, PhaseEngineError> {
        let review_id_owned = review_id.to_string();
        self.store
            .with_locked_registry(task_id, move |task| {
                let review = task
                    .find_review_mut(&review_id_owned)
                    .ok_or_else(|| StoreError::Other(anyhow::anyhow!("review {review_id_owned} not found")))?;
                review.status = ReviewStatus::Aborted;
                review.escalation_reason = Some("aborted: stalled review".to_string());
                let phase_index = review.phase_index;
                if let Some(phase) = task.phases.get_mut(phase_index)
                    && phase.status == PhaseStatus::UnderReview
                {
                    phase.try_transition(PhaseStatus::Escalated);
                }
                Ok(task.find_review(&review_id_owned).cloned().unwrap())
            })
            .map_err(Into::into)
    }

    /// Blocked whenever an auto-review is `in_progress`; the only bypass is
    /// `force_escalated=true` with the review in `escalated` state
    /// (`spec.md` §4.1.4).
    pub fn approve_phase_review(
        &self,
        task_id: &str,
        review_id: &str,
        force_escalated: bool,
    ) -> Result<Phase, PhaseEngineError> {
        let review_id_owned = review_id.to_string();
        self.store
            .with_locked_registry(task_id, move |task| {
                let review = task
                    .find_review(&review_id_owned)
                    .ok_or_else(|| StoreError::Other(anyhow::anyhow!("review {review_id_owned} not found")))?
                    .clone();

                if review.status == ReviewStatus::InProgress {
                    return Err(StoreError::Other(anyhow::anyhow!(
                        "review {review_id_owned} is in progress; manual verdicts are blocked"
                    )));
                }
                if review.status != ReviewStatus::Escalated || !force_escalated {
                    return Err(StoreError::Other(anyhow::anyhow!(
                        "manual approval requires an escalated review and force_escalated=true"
                    )));
                }

                let phase_index = review.phase_index;
                let workspace_path = task.workspace_path.clone();
                let phase = task
                    .phases
                    .get_mut(phase_index)
                    .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no phase at index {phase_index}")))?;
                if phase.try_transition(PhaseStatus::Approved) {
                    write_phase_handover(&workspace_path, phase)?;
                }
                Ok(phase.clone())
            })
            .map_err(Into::into)
    }

    /// Always rejected: the external caller may never reject its own
    /// phase review (`spec.md` §4.1.4).
    pub fn reject_phase_review(&self, _task_id: &str, review_id: &str) -> Result<Phase, PhaseEngineError> {
        Err(PhaseEngineError::ReviewBlocked { review_id: review_id.to_string() })
    }

    /// On the final phase, marks the task `COMPLETED` instead of advancing.
    /// Idempotent: once the task is already `COMPLETED`, further calls fail
    /// cleanly rather than re-running the transition (`spec.md` §8 laws).
    pub fn advance_to_next_phase(&self, task_id: &str) -> Result<PhaseAdvance, PhaseEngineError> {
        self.store
            .with_locked_registry(task_id, |task| {
                if task.status == TaskStatus::Completed {
                    return Err(StoreError::Other(anyhow::anyhow!("task is already completed")));
                }
                let idx = task.current_phase_index;
                let phase = task
                    .phases
                    .get(idx)
                    .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no current phase")))?;
                require_phase_state(phase, &[PhaseStatus::Approved])?;

                if idx + 1 >= task.phases.len() {
                    task.status = TaskStatus::Completed;
                    return Ok(PhaseAdvance::TaskCompleted);
                }

                task.current_phase_index = idx + 1;
                let next = &mut task.phases[idx + 1];
                next.try_transition(PhaseStatus::Active);
                Ok(PhaseAdvance::Advanced(next.clone()))
            })
            .map_err(Into::into)
    }

    /// Reads the handover document rendered by `write_phase_handover` once
    /// the phase reached `APPROVED`. Falls back to a one-line placeholder
    /// for a phase that hasn't been approved yet.
    pub fn get_phase_handover(&self, task_id: &str, phase_index: usize) -> Result<PhaseHandover, PhaseEngineError> {
        let task = self.store.read_registry(task_id)?;
        let phase = task
            .phases
            .get(phase_index)
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("no phase at index {phase_index}")))?;
        Ok(PhaseHandover {
            phase_id: phase.phase_id.as_str().to_string(),
            order_index: phase.order_index,
            summary: phase.handover.clone().unwrap_or_else(|| format!("phase {} approved", phase.name)),
            expected_deliverables: phase.expected_deliverables.clone(),
            success_criteria: phase.success_criteria.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub enum PhaseAdvance {
    Advanced(Phase),
    TaskCompleted,
}

fn current_phase(task: &Task) -> Result<&Phase, PhaseEngineError> {
    task.phases
        .get(task.current_phase_index)
        .ok_or_else(|| PhaseEngineError::TaskNotFound { task_id: task.task_id.as_str().to_string() })
}

fn require_phase_state(phase: &Phase, allowed: &[PhaseStatus]) -> Result<(), StoreError> {
    if allowed.contains(&phase.status) {
        Ok(())
    } else {
        Err(StoreError::Other(anyhow::anyhow!(
            "phase is in state {}, operation requires one of {:?}",
            phase.status,
            allowed.iter().map(|s| s.to_string()).collect::<Vec<_>>()
        )))
    }
}

/// `spec.md` §4.1.2: if every worker in the current phase is terminal and
/// the phase is `ACTIVE`, move it to `AWAITING_REVIEW`. The actual reviewer
/// spawn (`trigger_agentic_review`) happens out of band since it is async.
fn maybe_auto_submit(task: &mut Task) {
    let idx = task.current_phase_index;
    let Some(phase) = task.phases.get_mut(idx) else { return };
    if phase.status != PhaseStatus::Active {
        return;
    }
    let phase_workers: Vec<_> = task.workers.iter().filter(|w| w.phase_index == idx).collect();
    if phase_workers.is_empty() {
        return;
    }
    if phase_workers.iter().all(|w| w.status.is_terminal()) {
        task.phases[idx].try_transition(PhaseStatus::AwaitingReview);
    }
}

/// Applies `spec.md` §4.1.3's aggregated verdict to the review and its phase.
/// On approval, also renders and persists the phase's handover document
/// before returning, so `get_phase_handover` never finds `phase.handover`
/// empty for a phase that is already `APPROVED`.
fn apply_aggregated_verdict(
    task: &mut Task,
    phase_index: usize,
    final_verdict: swarmd_common::FinalVerdict,
) -> Result<(), StoreError> {
    use swarmd_common::FinalVerdict;

    if let Some(review) = task
        .reviews
        .iter_mut()
        .find(|r| r.phase_index == phase_index && r.status == ReviewStatus::InProgress)
    {
        review.final_verdict = Some(final_verdict);
        review.status = ReviewStatus::Completed;
    }

    let workspace_path = task.workspace_path.clone();
    let Some(phase) = task.phases.get_mut(phase_index) else { return Ok(()) };
    if phase.status != PhaseStatus::UnderReview {
        return Ok(());
    }
    match final_verdict {
        FinalVerdict::Approved => {
            if phase.try_transition(PhaseStatus::Approved) {
                write_phase_handover(&workspace_path, phase)?;
            }
        }
        FinalVerdict::Rejected => {
            phase.try_transition(PhaseStatus::Rejected);
        }
        FinalVerdict::NeedsRevision => {
            phase.try_transition(PhaseStatus::Revising);
        }
    }
    Ok(())
}

/// Renders the phase's handover markdown and writes it to
/// `{workspace_path}/handover/phase-{order_index}.md`, setting
/// `phase.handover` to the rendered document. Called only once a phase has
/// just transitioned to `APPROVED` (`spec.md` §3 Phase.handover).
fn write_phase_handover(workspace_path: &std::path::Path, phase: &mut Phase) -> Result<(), StoreError> {
    let document = format!(
        "# Handover: {}\n\n{}\n\n## Expected deliverables\n{}\n\n## Success criteria\n{}\n",
        phase.name,
        phase.description.as_deref().unwrap_or("(no description)"),
        bullet_list(&phase.expected_deliverables),
        bullet_list(&phase.success_criteria),
    );

    let dir = workspace_path.join("handover");
    std::fs::create_dir_all(&dir).map_err(|source| StoreError::WriteFailed { path: dir.clone(), source })?;
    let path = dir.join(format!("phase-{}.md", phase.order_index));
    std::fs::write(&path, &document).map_err(|source| StoreError::WriteFailed { path, source })?;

    phase.handover = Some(document);
    Ok(())
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items.iter().map(|item| format!("- {item}")).collect::<Vec<_>>().join("\n")
}

/// `spec.md` §4.1.3: all registered reviewers dead without a verdict —
/// the review escalates rather than aggregating to a `FinalVerdict`.
fn escalate_review(task: &mut Task, phase_index: usize) {
    if let Some(review) = task
        .reviews
        .iter_mut()
        .find(|r| r.phase_index == phase_index && r.status == ReviewStatus::InProgress)
    {
        review.status = ReviewStatus::Escalated;
        review.escalation_reason = Some("all registered reviewers terminated without a verdict".to_string());
    }
    if let Some(phase) = task.phases.get_mut(phase_index)
        && phase.status == PhaseStatus::UnderReview
    {
        phase.try_transition(PhaseStatus::Escalated);
    }
}
