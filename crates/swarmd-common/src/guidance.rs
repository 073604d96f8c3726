//! The `Guidance` envelope attached to every tool response (`spec.md` §6.2).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Machine-readable state tags, `spec.md` §6.2.2. Kept as string constants
/// rather than an enum: the vocabulary is explicitly "at minimum" this set,
/// and a new tag should never require touching every call site's match arm.
pub mod state_tag {
    pub const TASK_INITIALIZED: &str = "task_initialized";
    pub const TASK_ACTIVE_NO_AGENTS: &str = "task_active_no_agents";
    pub const PHASE_ACTIVE_AGENTS_WORKING: &str = "phase_active_agents_working";
    pub const PHASE_COMPLETE_AWAITING_REVIEW: &str = "phase_complete_awaiting_review";
    pub const PHASE_AWAITING_REVIEW: &str = "phase_awaiting_review";
    pub const PHASE_UNDER_REVIEW: &str = "phase_under_review";
    pub const PHASE_APPROVED_READY_TO_ADVANCE: &str = "phase_approved_ready_to_advance";
    pub const PHASE_REJECTED: &str = "phase_rejected";
    pub const PHASE_REVISING: &str = "phase_revising";
    pub const PHASE_ESCALATED: &str = "phase_escalated";
    pub const TASK_COMPLETED: &str = "task_completed";
    pub const AGENT_DEPLOYED: &str = "agent_deployed";
    pub const AGENT_TERMINATED: &str = "agent_terminated";
    pub const AGENT_PROGRESS_UPDATED: &str = "agent_progress_updated";
    pub const ERROR_VALIDATION: &str = "error_validation";
    pub const ERROR_PHASE_NOT_APPROVED: &str = "error_phase_not_approved";
    pub const REGISTRY_LOCK_CONFLICT: &str = "registry_lock_conflict";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guidance {
    pub current_state: String,
    pub next_action: String,
    pub available_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, Value>>,
}

/// Builds a `Guidance`, enforcing the three mandatory fields at the type
/// level (`current_state`, `next_action`, `available_actions` are
/// constructor arguments; everything else is opt-in).
pub struct GuidanceBuilder {
    guidance: Guidance,
}

impl Guidance {
    pub fn builder(
        current_state: impl Into<String>,
        next_action: impl Into<String>,
        available_actions: Vec<String>,
    ) -> GuidanceBuilder {
        GuidanceBuilder {
            guidance: Guidance {
                current_state: current_state.into(),
                next_action: next_action.into(),
                available_actions,
                warnings: None,
                blocked_reason: None,
                context: None,
            },
        }
    }
}

impl GuidanceBuilder {
    pub fn warning(mut self, warning: impl Into<String>) -> Self {
        self.guidance
            .warnings
            .get_or_insert_with(Vec::new)
            .push(warning.into());
        self
    }

    pub fn blocked_reason(mut self, reason: impl Into<String>) -> Self {
        self.guidance.blocked_reason = Some(reason.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.guidance
            .context
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn build(self) -> Guidance {
        self.guidance
    }
}

/// Generic tool response envelope, `spec.md` §6.2: `{success, ..., error,
/// guidance}`. `T` is the tool-specific payload, flattened into the same
/// JSON object as the envelope fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub guidance: Guidance,
}

impl<T> ToolResponse<T> {
    pub fn ok(data: T, guidance: Guidance) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            guidance,
        }
    }

    pub fn err(error_kind: impl Into<String>, guidance: Guidance) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error_kind.into()),
            guidance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Payload {
        worker_id: String,
    }

    #[test]
    fn builder_requires_three_mandatory_fields() {
        let guidance = Guidance::builder(
            state_tag::TASK_INITIALIZED,
            "Call spawn_worker to begin the first phase.",
            vec!["spawn_worker - start a worker".into()],
        )
        .build();
        assert_eq!(guidance.current_state, state_tag::TASK_INITIALIZED);
        assert!(guidance.warnings.is_none());
    }

    #[test]
    fn builder_accumulates_warnings_in_order() {
        let guidance = Guidance::builder(state_tag::PHASE_REJECTED, "retry", vec![])
            .warning("first")
            .warning("second")
            .build();
        assert_eq!(guidance.warnings.unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn ok_response_serializes_flattened_payload_alongside_envelope() {
        let guidance = Guidance::builder(state_tag::AGENT_DEPLOYED, "poll progress", vec![]).build();
        let response = ToolResponse::ok(
            Payload { worker_id: "investigator-101010-abcdef".into() },
            guidance,
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["worker_id"], "investigator-101010-abcdef");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn err_response_has_no_data_and_carries_error_kind() {
        let guidance = Guidance::builder(state_tag::ERROR_VALIDATION, "fix description length", vec![])
            .blocked_reason("description too short")
            .build();
        let response: ToolResponse<Payload> = ToolResponse::err("ValidationError", guidance);
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("ValidationError"));
        assert!(response.data.is_none());
    }
}
