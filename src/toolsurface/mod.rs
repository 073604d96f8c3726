//! ToolSurface: the single externally-callable API, wrapping every
//! PhaseEngine / WorkerSupervisor / HealthDaemon operation in a
//! `{success, ..., guidance}` envelope (`spec.md` §6, §4).

use crate::errors::DaemonError;
use crate::eventlog::OutputFormat;
use crate::health::{HealthDaemon, HealthReport};
use crate::phase_engine::{PhaseAdvance, PhaseEngine, PhaseHandover};
use crate::supervisor::WorkerSupervisor;
use crate::validation::PhaseSpec;
use serde::Serialize;
use std::sync::Arc;
use swarmd_common::{
    state_tag, FindingType, Guidance, Phase, PhaseStatus, Priority, Review, ReviewStatus, Severity, SeverityCounts,
    Task, ToolResponse, Verdict, Worker,
};

pub struct ToolSurface {
    phase_engine: Arc<PhaseEngine>,
    supervisor: Arc<WorkerSupervisor>,
    health: Arc<HealthDaemon>,
}

/// Findings-stream messages are worker-authored and unbounded; the ack only
/// ever carries a short preview of one, never the full text.
const COORDINATION_MESSAGE_PREVIEW_CHARS: usize = 200;

fn preview(message: &str) -> String {
    message.chars().take(COORDINATION_MESSAGE_PREVIEW_CHARS).collect()
}

/// Minimal coordination response (`spec.md` §6.2.3): what `update_progress`
/// and `report_finding` return instead of the full worker/task payload, to
/// keep the agent's tool-call loop cheap. Capped at `coordination_response_cap`
/// (2 KiB) by carrying only previews and counts, never full worker lists,
/// prompts, or finding `data` blobs.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinationAck {
    pub acknowledged: bool,
    pub own_update: Option<OwnUpdate>,
    pub own_finding: Option<FindingSummary>,
    pub agent_counts: AgentCounts,
    pub recent_findings: Vec<FindingSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnUpdate {
    pub status: String,
    pub message: String,
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindingSummary {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub agent_id: String,
    pub finding_type: FindingType,
    pub severity: Severity,
    pub message: String,
}

impl FindingSummary {
    fn from_event(event: swarmd_common::FindingEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            agent_id: event.agent_id,
            finding_type: event.finding_type,
            severity: event.severity,
            message: preview(&event.message),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentCounts {
    pub total_spawned: usize,
    pub active: usize,
    pub completed: usize,
}

impl ToolSurface {
    pub fn new(phase_engine: Arc<PhaseEngine>, supervisor: Arc<WorkerSupervisor>, health: Arc<HealthDaemon>) -> Self {
        Self { phase_engine, supervisor, health }
    }

    pub fn create_task(
        &self,
        description: String,
        priority: Priority,
        client_working_dir: std::path::PathBuf,
        phases: Vec<PhaseSpec>,
    ) -> ToolResponse<Task> {
        match self.phase_engine.create_task(description, priority, client_working_dir, phases) {
            Ok(task) => ToolResponse::ok(task, task_created_guidance()),
            Err(e) => error_response(e.into()),
        }
    }

    pub fn get_phase_status(&self, task_id: &str) -> ToolResponse<Phase> {
        match self.phase_engine.get_phase_status(task_id) {
            Ok(phase) => {
                let guidance = phase_status_guidance(&phase);
                ToolResponse::ok(phase, guidance)
            }
            Err(e) => error_response(e.into()),
        }
    }

    pub fn check_phase_progress(&self, task_id: &str) -> ToolResponse<Task> {
        match self.phase_engine.check_phase_progress(task_id) {
            Ok(task) => {
                let phase = task.phases.get(task.current_phase_index);
                let guidance = phase.map(phase_status_guidance).unwrap_or_else(|| {
                    Guidance::builder(state_tag::TASK_COMPLETED, "no further phases", vec![]).build()
                });
                ToolResponse::ok(task, guidance)
            }
            Err(e) => error_response(e.into()),
        }
    }

    pub fn submit_phase_for_review(&self, task_id: &str) -> ToolResponse<Phase> {
        match self.phase_engine.submit_phase_for_review(task_id) {
            Ok(phase) => ToolResponse::ok(phase, phase_status_guidance(&phase)),
            Err(e) => error_response(e.into()),
        }
    }

    pub async fn trigger_agentic_review(&self, task_id: &str) -> ToolResponse<Phase> {
        match self.phase_engine.trigger_agentic_review(task_id).await {
            Ok(phase) => ToolResponse::ok(phase, phase_status_guidance(&phase)),
            Err(e) => error_response(e.into()),
        }
    }

    pub fn submit_review_verdict(
        &self,
        task_id: &str,
        review_id: &str,
        reviewer_id: &str,
        verdict: Verdict,
        severity_counts: SeverityCounts,
    ) -> ToolResponse<Review> {
        match self
            .phase_engine
            .submit_review_verdict(task_id, review_id, reviewer_id, verdict, severity_counts)
        {
            Ok(review) => ToolResponse::ok(review, review_status_guidance(&review)),
            Err(e) => error_response(e.into()),
        }
    }

    pub fn get_review_status(&self, task_id: &str, review_id: &str) -> ToolResponse<Review> {
        match self.phase_engine.get_review_status(task_id, review_id) {
            Ok(review) => {
                let guidance = review_status_guidance(&review);
                ToolResponse::ok(review, guidance)
            }
            Err(e) => error_response(e.into()),
        }
    }

    pub fn abort_stalled_review(&self, task_id: &str, review_id: &str) -> ToolResponse<Review> {
        match self.phase_engine.abort_stalled_review(task_id, review_id) {
            Ok(review) => ToolResponse::ok(review, review_status_guidance(&review)),
            Err(e) => error_response(e.into()),
        }
    }

    pub fn approve_phase_review(&self, task_id: &str, review_id: &str, force_escalated: bool) -> ToolResponse<Phase> {
        match self.phase_engine.approve_phase_review(task_id, review_id, force_escalated) {
            Ok(phase) => ToolResponse::ok(phase, phase_status_guidance(&phase)),
            Err(e) => error_response(e.into()),
        }
    }

    /// Always blocked (`spec.md` §4.1.4); included on the surface so callers
    /// get a well-formed `ToolResponse` explaining why instead of a 404.
    pub fn reject_phase_review(&self, task_id: &str, review_id: &str) -> ToolResponse<Phase> {
        let err: DaemonError = self.phase_engine.reject_phase_review(task_id, review_id).unwrap_err().into();
        error_response(err)
    }

    pub fn advance_to_next_phase(&self, task_id: &str) -> ToolResponse<PhaseAdvanceView> {
        match self.phase_engine.advance_to_next_phase(task_id) {
            Ok(PhaseAdvance::Advanced(phase)) => {
                let guidance = phase_status_guidance(&phase);
                ToolResponse::ok(PhaseAdvanceView { completed: false, phase: Some(phase) }, guidance)
            }
            Ok(PhaseAdvance::TaskCompleted) => {
                let guidance = Guidance::builder(state_tag::TASK_COMPLETED, "no further phases", vec![]).build();
                ToolResponse::ok(PhaseAdvanceView { completed: true, phase: None }, guidance)
            }
            Err(e) => error_response(e.into()),
        }
    }

    pub fn get_phase_handover(&self, task_id: &str, phase_index: usize) -> ToolResponse<PhaseHandover> {
        match self.phase_engine.get_phase_handover(task_id, phase_index) {
            Ok(handover) => {
                let guidance = Guidance::builder(
                    state_tag::PHASE_APPROVED_READY_TO_ADVANCE,
                    "call advance_to_next_phase to proceed",
                    vec!["advance_to_next_phase".to_string()],
                )
                .build();
                ToolResponse::ok(handover, guidance)
            }
            Err(e) => error_response(e.into()),
        }
    }

    pub async fn spawn_worker(&self, task_id: &str, worker_type: &str, prompt: &str) -> ToolResponse<Worker> {
        match self.supervisor.spawn_worker(task_id, worker_type, prompt).await {
            Ok(outcome) => {
                let guidance = Guidance::builder(
                    state_tag::AGENT_DEPLOYED,
                    "poll get_worker_output or update_progress for status",
                    vec!["get_worker_output".to_string(), "update_progress".to_string()],
                )
                .build();
                ToolResponse::ok(outcome.worker, guidance)
            }
            Err(e) => error_response(DaemonError::Supervisor(e)),
        }
    }

    pub async fn spawn_child(
        &self,
        task_id: &str,
        parent_worker_id: &str,
        worker_type: &str,
        prompt: &str,
    ) -> ToolResponse<Worker> {
        match self.supervisor.spawn_child(task_id, parent_worker_id, worker_type, prompt).await {
            Ok(outcome) => {
                let guidance = Guidance::builder(
                    state_tag::AGENT_DEPLOYED,
                    "poll get_worker_output or update_progress for status",
                    vec!["get_worker_output".to_string(), "update_progress".to_string()],
                )
                .build();
                ToolResponse::ok(outcome.worker, guidance)
            }
            Err(e) => error_response(DaemonError::Supervisor(e)),
        }
    }

    pub async fn get_worker_output(
        &self,
        task_id: &str,
        worker_id: &str,
        tail: Option<usize>,
        filter: Option<&regex::Regex>,
        format: OutputFormat,
        include_metadata: bool,
    ) -> ToolResponse<crate::eventlog::BoundedRead> {
        match self.supervisor.get_worker_output(task_id, worker_id, tail, filter, format, include_metadata).await {
            Ok(read) => {
                let guidance = Guidance::builder(state_tag::AGENT_PROGRESS_UPDATED, "inspect output", vec![]).build();
                ToolResponse::ok(read, guidance)
            }
            Err(e) => error_response(DaemonError::Supervisor(e)),
        }
    }

    pub async fn kill_worker(&self, task_id: &str, worker_id: &str) -> ToolResponse<Worker> {
        match self.supervisor.kill_worker(task_id, worker_id).await {
            Ok(worker) => {
                let guidance = Guidance::builder(state_tag::AGENT_TERMINATED, "worker terminated", vec![]).build();
                ToolResponse::ok(worker, guidance)
            }
            Err(e) => error_response(DaemonError::Supervisor(e)),
        }
    }

    /// Minimal coordination response (`spec.md` §6.2.3).
    pub async fn update_progress(
        &self,
        task_id: &str,
        worker_id: &str,
        status: swarmd_common::WorkerStatus,
        message: &str,
        progress: u8,
    ) -> ToolResponse<CoordinationAck> {
        match self.supervisor.update_progress(task_id, worker_id, status, message, progress).await {
            Ok(_worker) => {
                if status.is_terminal() {
                    let _ = self.phase_engine.check_phase_progress(task_id);
                }
                let guidance = Guidance::builder(state_tag::AGENT_PROGRESS_UPDATED, "continue working", vec![]).build();
                let own_update = OwnUpdate { status: status.to_string(), message: preview(message), progress };
                let ack = self.build_coordination_ack(task_id, Some(own_update), None).await;
                ToolResponse::ok(ack, guidance)
            }
            Err(e) => error_response(DaemonError::Supervisor(e)),
        }
    }

    /// Minimal coordination response (`spec.md` §6.2.3).
    pub async fn report_finding(
        &self,
        task_id: &str,
        worker_id: &str,
        finding_type: FindingType,
        severity: Severity,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> ToolResponse<CoordinationAck> {
        match self.supervisor.report_finding(task_id, worker_id, finding_type, severity, message, data).await {
            Ok(()) => {
                let guidance = Guidance::builder(state_tag::AGENT_PROGRESS_UPDATED, "continue working", vec![]).build();
                let own_finding = FindingSummary {
                    timestamp: chrono::Utc::now(),
                    agent_id: worker_id.to_string(),
                    finding_type,
                    severity,
                    message: preview(message),
                };
                let ack = self.build_coordination_ack(task_id, None, Some(own_finding)).await;
                ToolResponse::ok(ack, guidance)
            }
            Err(e) => error_response(DaemonError::Supervisor(e)),
        }
    }

    /// Assembles the bounded ack: the caller's own event plus task-wide
    /// counters and the last 3 findings across all workers.
    async fn build_coordination_ack(
        &self,
        task_id: &str,
        own_update: Option<OwnUpdate>,
        own_finding: Option<FindingSummary>,
    ) -> CoordinationAck {
        let counts = self.supervisor.task_counters(task_id).unwrap_or_default();
        let recent_findings = self
            .supervisor
            .recent_findings(task_id, 3)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(FindingSummary::from_event)
            .collect();
        CoordinationAck {
            acknowledged: true,
            own_update,
            own_finding,
            agent_counts: AgentCounts {
                total_spawned: counts.total_spawned,
                active: counts.active_count,
                completed: counts.completed_count,
            },
            recent_findings,
        }
    }

    pub async fn trigger_health_scan(&self) -> ToolResponse<HealthReport> {
        let report = self.health.scan().await;
        let guidance = Guidance::builder(
            state_tag::AGENT_PROGRESS_UPDATED,
            "review terminated workers and escalated reviews",
            vec![],
        )
        .build();
        ToolResponse::ok(report, guidance)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseAdvanceView {
    pub completed: bool,
    pub phase: Option<Phase>,
}

fn task_created_guidance() -> Guidance {
    Guidance::builder(
        state_tag::TASK_INITIALIZED,
        "call spawn_worker to begin the first phase",
        vec!["spawn_worker".to_string()],
    )
    .build()
}

fn phase_status_guidance(phase: &Phase) -> Guidance {
    let (tag, next_action, actions): (&str, &str, Vec<&str>) = match phase.status {
        PhaseStatus::Pending => (state_tag::TASK_ACTIVE_NO_AGENTS, "wait for the phase to activate", vec![]),
        PhaseStatus::Active => (
            state_tag::PHASE_ACTIVE_AGENTS_WORKING,
            "spawn workers or poll check_phase_progress",
            vec!["spawn_worker", "check_phase_progress"],
        ),
        PhaseStatus::AwaitingReview => (
            state_tag::PHASE_AWAITING_REVIEW,
            "call trigger_agentic_review",
            vec!["trigger_agentic_review"],
        ),
        PhaseStatus::UnderReview => (
            state_tag::PHASE_UNDER_REVIEW,
            "wait for reviewer verdicts or poll get_review_status",
            vec!["get_review_status"],
        ),
        PhaseStatus::Approved => (
            state_tag::PHASE_APPROVED_READY_TO_ADVANCE,
            "call advance_to_next_phase",
            vec!["advance_to_next_phase", "get_phase_handover"],
        ),
        PhaseStatus::Rejected => (state_tag::PHASE_REJECTED, "address findings then resume work", vec!["spawn_worker"]),
        PhaseStatus::Revising => (
            state_tag::PHASE_REVISING,
            "spawn workers to address the review findings",
            vec!["spawn_worker", "submit_phase_for_review"],
        ),
        PhaseStatus::Escalated => (
            state_tag::PHASE_ESCALATED,
            "manual intervention required: approve_phase_review with force_escalated=true",
            vec!["approve_phase_review"],
        ),
    };
    Guidance::builder(tag, next_action, actions.into_iter().map(String::from).collect()).build()
}

fn review_status_guidance(review: &Review) -> Guidance {
    let (tag, next_action) = match review.status {
        ReviewStatus::Pending | ReviewStatus::InProgress => {
            (state_tag::PHASE_UNDER_REVIEW, "wait for remaining reviewer verdicts")
        }
        ReviewStatus::Completed => (state_tag::PHASE_APPROVED_READY_TO_ADVANCE, "check phase status"),
        ReviewStatus::Aborted => (state_tag::PHASE_ESCALATED, "review aborted; escalation required"),
        ReviewStatus::Escalated => (
            state_tag::PHASE_ESCALATED,
            "manual intervention required: approve_phase_review with force_escalated=true",
        ),
    };
    Guidance::builder(tag, next_action, vec![]).build()
}

fn error_response<T>(err: DaemonError) -> ToolResponse<T> {
    let kind = err.kind();
    let tag = match kind {
        "ValidationError" => state_tag::ERROR_VALIDATION,
        "PhaseStateInvalid" => state_tag::ERROR_PHASE_NOT_APPROVED,
        "RegistryLockConflict" => state_tag::REGISTRY_LOCK_CONFLICT,
        _ => state_tag::ERROR_VALIDATION,
    };
    let guidance = Guidance::builder(tag, "see blocked_reason", vec![]).blocked_reason(err.to_string()).build();
    ToolResponse::err(kind, guidance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwarmdConfig;
    use crate::mux::{FakeMuxAdapter, MuxAdapter};
    use crate::store::StateStore;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    fn harness(dir: &std::path::Path) -> ToolSurface {
        let config = SwarmdConfig { workspace_base: dir.to_path_buf(), default_reviewer_count: 1, ..SwarmdConfig::default() };
        let store = Arc::new(StateStore::open(config.clone()).unwrap());
        let mux = Arc::new(FakeMuxAdapter::new()) as Arc<dyn MuxAdapter>;
        let supervisor = Arc::new(WorkerSupervisor::new(Arc::clone(&store), Arc::clone(&mux), config.clone()));
        let phase_engine = Arc::new(PhaseEngine::new(Arc::clone(&store), Arc::clone(&supervisor), config.clone()));
        let health = Arc::new(HealthDaemon::new(store, mux, Duration::from_secs(30)));
        ToolSurface::new(phase_engine, supervisor, health)
    }

    fn phase_spec(name: &str) -> PhaseSpec {
        PhaseSpec {
            name: name.to_string(),
            description: None,
            expected_deliverables: vec!["design.md".to_string()],
            success_criteria: vec!["documented".to_string()],
        }
    }

    #[test]
    fn create_task_returns_ok_envelope_with_deployment_guidance() {
        let dir = tempdir().unwrap();
        let surface = harness(dir.path());
        let response = surface.create_task(
            "investigate the cache layer for thread safety".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            vec![phase_spec("Investigation")],
        );
        assert!(response.success);
        assert_eq!(response.guidance.current_state, state_tag::TASK_INITIALIZED);
    }

    #[test]
    fn create_task_validation_failure_returns_err_envelope() {
        let dir = tempdir().unwrap();
        let surface = harness(dir.path());
        let response = surface.create_task(
            "too short".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            vec![phase_spec("A")],
        );
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("ValidationError"));
    }

    #[test]
    fn reject_phase_review_is_always_an_error_envelope() {
        let dir = tempdir().unwrap();
        let surface = harness(dir.path());
        let response = surface.reject_phase_review("TASK-x", "REVIEW-00-abc");
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("ReviewBlocked"));
    }

    #[tokio::test]
    async fn update_progress_returns_minimal_coordination_ack() {
        let dir = tempdir().unwrap();
        let surface = harness(dir.path());
        let task_response = surface.create_task(
            "investigate the cache layer for thread safety".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            vec![phase_spec("Investigation")],
        );
        let task = task_response.data.unwrap();
        let task_id = task.task_id.as_str().to_string();

        let spawn_response = surface.spawn_worker(&task_id, "investigator", "analyze cache").await;
        let worker = spawn_response.data.unwrap();

        let ack = surface
            .update_progress(&task_id, worker.worker_id.as_str(), swarmd_common::WorkerStatus::Working, "halfway", 50)
            .await;
        assert!(ack.success);
        let ack = ack.data.unwrap();
        assert!(ack.acknowledged);
        assert_eq!(ack.own_update.unwrap().message, "halfway");
        assert!(ack.own_finding.is_none());
        assert_eq!(ack.agent_counts.total_spawned, 1);
        assert_eq!(ack.agent_counts.active, 1);
    }

    #[tokio::test]
    async fn report_finding_ack_carries_own_finding_and_recent_findings() {
        let dir = tempdir().unwrap();
        let surface = harness(dir.path());
        let task_response = surface.create_task(
            "investigate the cache layer for thread safety".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            vec![phase_spec("Investigation")],
        );
        let task = task_response.data.unwrap();
        let task_id = task.task_id.as_str().to_string();
        let spawn_response = surface.spawn_worker(&task_id, "investigator", "analyze cache").await;
        let worker = spawn_response.data.unwrap();

        let ack = surface
            .report_finding(
                &task_id,
                worker.worker_id.as_str(),
                FindingType::Issue,
                Severity::High,
                "race condition in cache eviction",
                None,
            )
            .await;
        assert!(ack.success);
        let ack = ack.data.unwrap();
        assert_eq!(ack.own_finding.unwrap().message, "race condition in cache eviction");
        assert_eq!(ack.recent_findings.len(), 1);
        assert_eq!(ack.recent_findings[0].severity, Severity::High);
    }
}
