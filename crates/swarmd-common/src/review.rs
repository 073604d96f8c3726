//! The `Review` entity and verdict aggregation (`spec.md` §4.1.3).

use crate::events::Severity;
use crate::ids::ReviewId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Completed,
    Aborted,
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
    NeedsRevision,
}

impl Verdict {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "needs_revision" => Some(Self::NeedsRevision),
            _ => None,
        }
    }
}

/// Final aggregate outcome of a review; `None` until quorum is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalVerdict {
    Approved,
    Rejected,
    NeedsRevision,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    pub fn has_critical(&self) -> bool {
        self.critical > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub reviewer_id: String,
    pub verdict: Verdict,
    pub severity_counts: SeverityCounts,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub review_id: ReviewId,
    pub phase_index: usize,
    pub status: ReviewStatus,
    pub started_at: DateTime<Utc>,
    pub reviewer_worker_ids: Vec<String>,
    pub verdicts: Vec<VerdictRecord>,
    pub final_verdict: Option<FinalVerdict>,
    pub escalation_reason: Option<String>,
}

impl Review {
    pub fn new(phase_index: usize, reviewer_worker_ids: Vec<String>) -> Self {
        Self {
            review_id: ReviewId::generate(phase_index),
            phase_index,
            status: ReviewStatus::Pending,
            started_at: Utc::now(),
            reviewer_worker_ids,
            verdicts: Vec::new(),
            final_verdict: None,
            escalation_reason: None,
        }
    }

    pub fn has_verdict_from(&self, reviewer_id: &str) -> bool {
        self.verdicts.iter().any(|v| v.reviewer_id == reviewer_id)
    }

    /// Records one reviewer's verdict. Returns `false` if this reviewer
    /// already submitted — double-submission is idempotent, first wins
    /// (`spec.md` §4.1.5).
    pub fn record_verdict(&mut self, record: VerdictRecord) -> bool {
        if self.has_verdict_from(&record.reviewer_id) {
            return false;
        }
        if self.status == ReviewStatus::Pending {
            self.status = ReviewStatus::InProgress;
        }
        self.verdicts.push(record);
        true
    }

    /// How many registered reviewers have not yet voted and are also not
    /// known-dead; callers pass in the set of dead reviewer ids.
    pub fn died_without_verdict(&self, dead_ids: &[String]) -> usize {
        dead_ids
            .iter()
            .filter(|id| !self.has_verdict_from(id) && self.reviewer_worker_ids.contains(id))
            .count()
    }

    /// Aggregation per `spec.md` §4.1.3. Runs only once
    /// `A + R + V + D == N`; returns `None` until then.
    pub fn aggregate(&self, dead_ids: &[String]) -> Option<FinalVerdict> {
        let n = self.reviewer_worker_ids.len();
        let d = self.died_without_verdict(dead_ids);
        let a = self.verdicts.iter().filter(|v| v.verdict == Verdict::Approve).count();
        let r = self.verdicts.iter().filter(|v| v.verdict == Verdict::Reject).count();
        let v = self.verdicts.iter().filter(|v| v.verdict == Verdict::NeedsRevision).count();
        if a + r + v + d != n {
            return None;
        }
        if d == n {
            return None; // escalation, not a FinalVerdict — caller checks d == n separately
        }
        let any_critical = self.verdicts.iter().any(|rec| rec.severity_counts.has_critical());
        if any_critical {
            Some(FinalVerdict::Rejected)
        } else if a > r + v {
            Some(FinalVerdict::Approved)
        } else if v >= r {
            Some(FinalVerdict::NeedsRevision)
        } else {
            Some(FinalVerdict::Rejected)
        }
    }

    pub fn is_escalation(&self, dead_ids: &[String]) -> bool {
        let n = self.reviewer_worker_ids.len();
        n > 0 && self.died_without_verdict(dead_ids) == n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(reviewer: &str, verdict: Verdict, critical: bool) -> VerdictRecord {
        let mut counts = SeverityCounts::default();
        if critical {
            counts.record(Severity::Critical);
        }
        VerdictRecord {
            reviewer_id: reviewer.into(),
            verdict,
            severity_counts: counts,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn all_approve_yields_approved() {
        let mut r = Review::new(0, vec!["RV1".into(), "RV2".into(), "RV3".into()]);
        r.record_verdict(verdict("RV1", Verdict::Approve, false));
        r.record_verdict(verdict("RV2", Verdict::Approve, false));
        r.record_verdict(verdict("RV3", Verdict::Approve, false));
        assert_eq!(r.aggregate(&[]), Some(FinalVerdict::Approved));
    }

    #[test]
    fn critical_finding_forces_rejection_even_if_approves_win() {
        let mut r = Review::new(0, vec!["RV1".into(), "RV2".into(), "RV3".into()]);
        r.record_verdict(verdict("RV1", Verdict::Approve, true));
        r.record_verdict(verdict("RV2", Verdict::Approve, false));
        r.record_verdict(verdict("RV3", Verdict::Reject, false));
        assert_eq!(r.aggregate(&[]), Some(FinalVerdict::Rejected));
    }

    #[test]
    fn needs_revision_wins_ties_over_reject() {
        let mut r = Review::new(0, vec!["RV1".into(), "RV2".into(), "RV3".into()]);
        r.record_verdict(verdict("RV1", Verdict::NeedsRevision, false));
        r.record_verdict(verdict("RV2", Verdict::NeedsRevision, false));
        r.record_verdict(verdict("RV3", Verdict::Reject, true));
        assert_eq!(r.aggregate(&[]), Some(FinalVerdict::NeedsRevision));
    }

    #[test]
    fn all_dead_is_escalation_not_a_final_verdict() {
        let r = Review::new(0, vec!["RV1".into(), "RV2".into(), "RV3".into()]);
        let dead = vec!["RV1".into(), "RV2".into(), "RV3".into()];
        assert!(r.is_escalation(&dead));
        assert_eq!(r.aggregate(&dead), None);
    }

    #[test]
    fn double_submission_is_idempotent_first_wins() {
        let mut r = Review::new(0, vec!["RV1".into()]);
        assert!(r.record_verdict(verdict("RV1", Verdict::Approve, false)));
        assert!(!r.record_verdict(verdict("RV1", Verdict::Reject, false)));
        assert_eq!(r.verdicts[0].verdict, Verdict::Approve);
    }

    #[test]
    fn aggregate_waits_for_full_quorum() {
        let mut r = Review::new(0, vec!["RV1".into(), "RV2".into(), "RV3".into()]);
        r.record_verdict(verdict("RV1", Verdict::Approve, false));
        assert_eq!(r.aggregate(&[]), None);
    }
}
