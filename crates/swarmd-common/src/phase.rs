//! The `Phase` entity and its 8-state machine (`spec.md` §4.1.1).

use crate::ids::PhaseId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the 8 states a phase can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    Pending,
    Active,
    AwaitingReview,
    UnderReview,
    Approved,
    Rejected,
    Revising,
    Escalated,
}

impl PhaseStatus {
    /// True for the five states that count as "not completed, not pending" —
    /// invariant 3 in `spec.md` §3 requires exactly one phase be in one of
    /// these (or ACTIVE) at a time.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            Self::Active
                | Self::AwaitingReview
                | Self::UnderReview
                | Self::Revising
                | Self::Rejected
                | Self::Escalated
        )
    }

    pub fn accepts_new_workers(self) -> bool {
        matches!(self, Self::Active | Self::Revising)
    }

    /// Reviewer workers may additionally be spawned while a review is live.
    pub fn accepts_reviewer_workers(self) -> bool {
        self.accepts_new_workers() || matches!(self, Self::AwaitingReview | Self::UnderReview)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::AwaitingReview => "AWAITING_REVIEW",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Revising => "REVISING",
            Self::Escalated => "ESCALATED",
        };
        f.write_str(s)
    }
}

/// A single legal edge of the state machine in `spec.md` §4.1.1, used both to
/// validate attempted transitions and to render `Guidance.available_actions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PhaseStatus,
    pub to: PhaseStatus,
}

/// The fixed edge list of the 8-state machine. Any transition not present
/// here is rejected with `PhaseStateInvalid`.
pub const TRANSITIONS: &[Transition] = &[
    Transition { from: PhaseStatus::Pending, to: PhaseStatus::Active },
    Transition { from: PhaseStatus::Active, to: PhaseStatus::AwaitingReview },
    Transition { from: PhaseStatus::AwaitingReview, to: PhaseStatus::UnderReview },
    Transition { from: PhaseStatus::UnderReview, to: PhaseStatus::Approved },
    Transition { from: PhaseStatus::UnderReview, to: PhaseStatus::Rejected },
    Transition { from: PhaseStatus::UnderReview, to: PhaseStatus::Revising },
    Transition { from: PhaseStatus::UnderReview, to: PhaseStatus::Escalated },
    Transition { from: PhaseStatus::Rejected, to: PhaseStatus::Revising },
    Transition { from: PhaseStatus::Revising, to: PhaseStatus::Active },
    Transition { from: PhaseStatus::Revising, to: PhaseStatus::AwaitingReview },
    Transition { from: PhaseStatus::Escalated, to: PhaseStatus::UnderReview },
    Transition { from: PhaseStatus::Escalated, to: PhaseStatus::Approved },
];

/// Whether `from -> to` is one of the enumerated edges.
pub fn is_legal_transition(from: PhaseStatus, to: PhaseStatus) -> bool {
    TRANSITIONS.iter().any(|t| t.from == from && t.to == to)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub phase_id: PhaseId,
    pub order_index: usize,
    pub name: String,
    pub description: Option<String>,
    pub status: PhaseStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expected_deliverables: Vec<String>,
    pub success_criteria: Vec<String>,
    /// Populated only once the phase reaches APPROVED.
    pub handover: Option<String>,
}

impl Phase {
    pub fn new(
        order_index: usize,
        name: String,
        description: Option<String>,
        expected_deliverables: Vec<String>,
        success_criteria: Vec<String>,
    ) -> Self {
        Self {
            phase_id: PhaseId::generate(order_index),
            order_index,
            name,
            description,
            status: PhaseStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            expected_deliverables,
            success_criteria,
            handover: None,
        }
    }

    /// Attempt `self.status -> to`, returning `false` (and leaving state
    /// unchanged) if the edge is not in `TRANSITIONS`.
    #[must_use]
    pub fn try_transition(&mut self, to: PhaseStatus) -> bool {
        if !is_legal_transition(self.status, to) {
            return false;
        }
        if to == PhaseStatus::Active && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if to == PhaseStatus::Approved {
            self.completed_at = Some(Utc::now());
        }
        self.status = to;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_edges_are_legal() {
        assert!(is_legal_transition(PhaseStatus::Pending, PhaseStatus::Active));
        assert!(is_legal_transition(PhaseStatus::Active, PhaseStatus::AwaitingReview));
        assert!(is_legal_transition(PhaseStatus::AwaitingReview, PhaseStatus::UnderReview));
        assert!(is_legal_transition(PhaseStatus::UnderReview, PhaseStatus::Approved));
    }

    #[test]
    fn rejected_must_pass_through_revising() {
        assert!(!is_legal_transition(PhaseStatus::Rejected, PhaseStatus::Active));
        assert!(is_legal_transition(PhaseStatus::Rejected, PhaseStatus::Revising));
        assert!(is_legal_transition(PhaseStatus::Revising, PhaseStatus::Active));
    }

    #[test]
    fn escalated_only_escapes_via_documented_edges() {
        assert!(is_legal_transition(PhaseStatus::Escalated, PhaseStatus::UnderReview));
        assert!(is_legal_transition(PhaseStatus::Escalated, PhaseStatus::Approved));
        assert!(!is_legal_transition(PhaseStatus::Escalated, PhaseStatus::Active));
    }

    #[test]
    fn approved_has_no_outgoing_edge_in_this_table() {
        assert!(!TRANSITIONS.iter().any(|t| t.from == PhaseStatus::Approved));
    }

    #[test]
    fn try_transition_rejects_illegal_edge_and_keeps_state() {
        let mut phase = Phase::new(0, "Investigation".into(), None, vec![], vec![]);
        assert!(!phase.try_transition(PhaseStatus::Approved));
        assert_eq!(phase.status, PhaseStatus::Pending);
        assert!(phase.try_transition(PhaseStatus::Active));
        assert_eq!(phase.status, PhaseStatus::Active);
        assert!(phase.started_at.is_some());
    }

    #[test]
    fn approved_sets_completed_at() {
        let mut phase = Phase::new(0, "Investigation".into(), None, vec![], vec![]);
        phase.status = PhaseStatus::UnderReview;
        assert!(phase.try_transition(PhaseStatus::Approved));
        assert!(phase.completed_at.is_some());
    }

    fn any_status() -> impl proptest::strategy::Strategy<Value = PhaseStatus> {
        proptest::prop_oneof![
            proptest::strategy::Just(PhaseStatus::Pending),
            proptest::strategy::Just(PhaseStatus::Active),
            proptest::strategy::Just(PhaseStatus::AwaitingReview),
            proptest::strategy::Just(PhaseStatus::UnderReview),
            proptest::strategy::Just(PhaseStatus::Approved),
            proptest::strategy::Just(PhaseStatus::Rejected),
            proptest::strategy::Just(PhaseStatus::Revising),
            proptest::strategy::Just(PhaseStatus::Escalated),
        ]
    }

    proptest::proptest! {
        /// `spec.md` §8 invariant 3: a random walk over `try_transition` never
        /// lands the phase on an edge outside `TRANSITIONS`.
        #[test]
        fn random_walk_never_takes_an_undocumented_edge(targets in proptest::collection::vec(any_status(), 0..50)) {
            let mut phase = Phase::new(0, "Investigation".into(), None, vec![], vec![]);
            for to in targets {
                let from = phase.status;
                let accepted = phase.try_transition(to);
                if accepted {
                    proptest::prop_assert!(is_legal_transition(from, to));
                    proptest::prop_assert_eq!(phase.status, to);
                } else {
                    proptest::prop_assert_eq!(phase.status, from);
                }
            }
        }
    }
}
