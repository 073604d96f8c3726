//! End-to-end scenarios driven against an in-process `ToolSurface`, with a
//! fake mux adapter standing in for tmux and a real agent binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use swarmd::config::SwarmdConfig;
use swarmd::health::HealthDaemon;
use swarmd::mux::{FakeMuxAdapter, MuxAdapter};
use swarmd::phase_engine::PhaseEngine;
use swarmd::store::StateStore;
use swarmd::supervisor::WorkerSupervisor;
use swarmd::toolsurface::ToolSurface;
use swarmd::validation::PhaseSpec;
use swarmd_common::{Priority, SeverityCounts, Verdict, WorkerStatus};
use tempfile::tempdir;

struct Harness {
    surface: ToolSurface,
    mux: Arc<FakeMuxAdapter>,
}

fn build(dir: &std::path::Path, default_reviewer_count: usize) -> Harness {
    let config = SwarmdConfig { workspace_base: dir.to_path_buf(), default_reviewer_count, ..SwarmdConfig::default() };
    let store = Arc::new(StateStore::open(config.clone()).unwrap());
    let mux = Arc::new(FakeMuxAdapter::new());
    let mux_dyn = Arc::clone(&mux) as Arc<dyn MuxAdapter>;
    let supervisor = Arc::new(WorkerSupervisor::new(Arc::clone(&store), Arc::clone(&mux_dyn), config.clone()));
    let phase_engine = Arc::new(PhaseEngine::new(Arc::clone(&store), Arc::clone(&supervisor), config.clone()));
    let health = Arc::new(HealthDaemon::new(store, mux_dyn, Duration::from_secs(30)));
    let surface = ToolSurface::new(phase_engine, supervisor, health);
    Harness { surface, mux }
}

fn investigation_phase() -> PhaseSpec {
    PhaseSpec {
        name: "Investigation".to_string(),
        description: None,
        expected_deliverables: vec!["design.md".to_string()],
        success_criteria: vec!["documented".to_string()],
    }
}

/// S1. Single-phase happy path.
#[tokio::test]
async fn single_phase_happy_path_reaches_task_completed() {
    let dir = tempdir().unwrap();
    let harness = build(dir.path(), 3);
    let surface = &harness.surface;

    let task = surface
        .create_task(
            "rewrite the cache layer to be thread-safe".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            vec![investigation_phase()],
        )
        .data
        .unwrap();
    let task_id = task.task_id.as_str().to_string();

    let worker = surface.spawn_worker(&task_id, "investigator", "analyze cache").await.data.unwrap();
    assert_eq!(worker.status, WorkerStatus::Running);

    surface.update_progress(&task_id, worker.worker_id.as_str(), WorkerStatus::Working, "halfway", 50).await;
    surface.update_progress(&task_id, worker.worker_id.as_str(), WorkerStatus::Completed, "done", 100).await;

    let phase = surface.get_phase_status(&task_id).data.unwrap();
    assert_eq!(phase.status, swarmd_common::PhaseStatus::AwaitingReview);

    let phase = surface.trigger_agentic_review(&task_id).await.data.unwrap();
    assert_eq!(phase.status, swarmd_common::PhaseStatus::UnderReview);

    let task = surface.check_phase_progress(&task_id).data.unwrap();
    let review_id = task.reviews.last().unwrap().review_id.as_str().to_string();
    let reviewer_ids = task.reviews.last().unwrap().reviewer_worker_ids.clone();
    assert_eq!(reviewer_ids.len(), 3);

    for reviewer_id in &reviewer_ids {
        let response = surface.submit_review_verdict(
            &task_id,
            &review_id,
            reviewer_id,
            Verdict::Approve,
            SeverityCounts::default(),
        );
        assert!(response.success);
    }

    let phase = surface.get_phase_status(&task_id).data.unwrap();
    assert_eq!(phase.status, swarmd_common::PhaseStatus::Approved);

    let advance = surface.advance_to_next_phase(&task_id).data.unwrap();
    assert!(advance.completed);
    assert!(advance.phase.is_none());
}

/// S2. Rejection with revision loop.
#[tokio::test]
async fn rejection_feeds_a_revision_loop_then_approves() {
    let dir = tempdir().unwrap();
    let harness = build(dir.path(), 3);
    let surface = &harness.surface;

    let task = surface
        .create_task(
            "rewrite the cache layer to be thread-safe".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            vec![investigation_phase()],
        )
        .data
        .unwrap();
    let task_id = task.task_id.as_str().to_string();

    let worker = surface.spawn_worker(&task_id, "investigator", "analyze cache").await.data.unwrap();
    surface.update_progress(&task_id, worker.worker_id.as_str(), WorkerStatus::Completed, "done", 100).await;
    surface.trigger_agentic_review(&task_id).await;

    let task = surface.check_phase_progress(&task_id).data.unwrap();
    let review_id = task.reviews.last().unwrap().review_id.as_str().to_string();
    let reviewer_ids = task.reviews.last().unwrap().reviewer_worker_ids.clone();

    let mut medium = SeverityCounts::default();
    medium.medium = 1;
    let mut high = SeverityCounts::default();
    high.high = 1;

    surface.submit_review_verdict(&task_id, &review_id, &reviewer_ids[0], Verdict::NeedsRevision, medium.clone());
    surface.submit_review_verdict(&task_id, &review_id, &reviewer_ids[1], Verdict::NeedsRevision, medium);
    surface.submit_review_verdict(&task_id, &review_id, &reviewer_ids[2], Verdict::Reject, high);

    let phase = surface.get_phase_status(&task_id).data.unwrap();
    assert_eq!(phase.status, swarmd_common::PhaseStatus::Revising);

    let fixer = surface.spawn_worker(&task_id, "fixer", "address review findings").await.data.unwrap();
    surface.update_progress(&task_id, fixer.worker_id.as_str(), WorkerStatus::Completed, "fixed", 100).await;

    let phase = surface.submit_phase_for_review(&task_id).data.unwrap();
    assert_eq!(phase.status, swarmd_common::PhaseStatus::UnderReview);

    let task = surface.check_phase_progress(&task_id).data.unwrap();
    let review_id = task.reviews.last().unwrap().review_id.as_str().to_string();
    let reviewer_ids = task.reviews.last().unwrap().reviewer_worker_ids.clone();
    for reviewer_id in &reviewer_ids {
        surface.submit_review_verdict(&task_id, &review_id, reviewer_id, Verdict::Approve, SeverityCounts::default());
    }

    let phase = surface.get_phase_status(&task_id).data.unwrap();
    assert_eq!(phase.status, swarmd_common::PhaseStatus::Approved);
}

/// S3. Enforcement: reject_phase_review is always blocked, approve while
/// in_progress is blocked.
#[tokio::test]
async fn enforcement_blocks_self_approval_and_rejection() {
    let dir = tempdir().unwrap();
    let harness = build(dir.path(), 1);
    let surface = &harness.surface;

    let task = surface
        .create_task(
            "rewrite the cache layer to be thread-safe".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            vec![investigation_phase()],
        )
        .data
        .unwrap();
    let task_id = task.task_id.as_str().to_string();

    let reject = surface.reject_phase_review(&task_id, "REVIEW-00-whatever");
    assert!(!reject.success);
    assert_eq!(reject.error.as_deref(), Some("ReviewBlocked"));

    let worker = surface.spawn_worker(&task_id, "investigator", "analyze cache").await.data.unwrap();
    surface.update_progress(&task_id, worker.worker_id.as_str(), WorkerStatus::Completed, "done", 100).await;
    surface.trigger_agentic_review(&task_id).await;

    let task = surface.check_phase_progress(&task_id).data.unwrap();
    let review_id = task.reviews.last().unwrap().review_id.as_str().to_string();

    let approve = surface.approve_phase_review(&task_id, &review_id, false);
    assert!(!approve.success);
    assert_eq!(approve.error.as_deref(), Some("ReviewBlocked"));
}

/// S4. Escalation: all reviewers die without a verdict, a health scan
/// escalates the review and the phase, then a forced approval proceeds.
#[tokio::test]
async fn escalation_after_all_reviewers_die_then_forced_approval() {
    let dir = tempdir().unwrap();
    let harness = build(dir.path(), 3);
    let surface = &harness.surface;

    let task = surface
        .create_task(
            "rewrite the cache layer to be thread-safe".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            vec![investigation_phase()],
        )
        .data
        .unwrap();
    let task_id = task.task_id.as_str().to_string();

    let worker = surface.spawn_worker(&task_id, "investigator", "analyze cache").await.data.unwrap();
    surface.update_progress(&task_id, worker.worker_id.as_str(), WorkerStatus::Completed, "done", 100).await;
    surface.trigger_agentic_review(&task_id).await;

    let task = surface.check_phase_progress(&task_id).data.unwrap();
    let review_id = task.reviews.last().unwrap().review_id.as_str().to_string();
    let reviewer_ids = task.reviews.last().unwrap().reviewer_worker_ids.clone();

    for reviewer_id in &reviewer_ids {
        surface.kill_worker(&task_id, reviewer_id).await;
    }

    let report = surface.trigger_health_scan().await.data.unwrap();
    assert!(!report.escalated_reviews.is_empty());

    let phase = surface.get_phase_status(&task_id).data.unwrap();
    assert_eq!(phase.status, swarmd_common::PhaseStatus::Escalated);

    let phase = surface.approve_phase_review(&task_id, &review_id, true).data.unwrap();
    assert_eq!(phase.status, swarmd_common::PhaseStatus::Approved);

    let _ = &harness.mux;
}

/// Invariant 5 (spec.md §8): reject_phase_review always returns
/// ReviewBlocked, regardless of task/review existence.
#[test]
fn reject_phase_review_is_always_blocked_even_for_unknown_review() {
    let dir = tempdir().unwrap();
    let harness = build(dir.path(), 1);
    let response = harness.surface.reject_phase_review("TASK-unknown", "REVIEW-unknown");
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("ReviewBlocked"));
}

/// Law: advance_to_next_phase is idempotent on an already-completed task.
#[tokio::test]
async fn advance_to_next_phase_on_completed_task_is_clean_error() {
    let dir = tempdir().unwrap();
    let harness = build(dir.path(), 1);
    let surface = &harness.surface;

    let task = surface
        .create_task(
            "rewrite the cache layer to be thread-safe".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            vec![investigation_phase()],
        )
        .data
        .unwrap();
    let task_id = task.task_id.as_str().to_string();

    let worker = surface.spawn_worker(&task_id, "investigator", "analyze cache").await.data.unwrap();
    surface.update_progress(&task_id, worker.worker_id.as_str(), WorkerStatus::Completed, "done", 100).await;
    surface.trigger_agentic_review(&task_id).await;
    let task = surface.check_phase_progress(&task_id).data.unwrap();
    let review_id = task.reviews.last().unwrap().review_id.as_str().to_string();
    let reviewer_ids = task.reviews.last().unwrap().reviewer_worker_ids.clone();
    for reviewer_id in &reviewer_ids {
        surface.submit_review_verdict(&task_id, &review_id, reviewer_id, Verdict::Approve, SeverityCounts::default());
    }
    let advance = surface.advance_to_next_phase(&task_id).data.unwrap();
    assert!(advance.completed);

    let second = surface.advance_to_next_phase(&task_id);
    assert!(!second.success);
}
