//! `create_task` input validation (`spec.md` §4.5). Collects every violated
//! rule instead of failing on the first one, mirroring
//! `SwarmdToml::validate`'s warnings-collection style.

use swarmd_common::Priority;

const MIN_DESCRIPTION_LEN: usize = 20;
const MAX_PHASE_NAME_LEN: usize = 80;
const MAX_WORKER_TYPE_LEN: usize = 40;

/// One requested phase, prior to being materialized into a `Phase` entity.
pub struct PhaseSpec {
    pub name: String,
    pub description: Option<String>,
    pub expected_deliverables: Vec<String>,
    pub success_criteria: Vec<String>,
}

/// Returns `Ok(())` if every rule in `spec.md` §4.5 is satisfied, otherwise
/// `Err` with one message per violated field.
pub fn validate_new_task(description: &str, phases: &[PhaseSpec]) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if description.trim().chars().count() < MIN_DESCRIPTION_LEN {
        errors.push(format!(
            "description must be at least {MIN_DESCRIPTION_LEN} characters, got {}",
            description.trim().chars().count()
        ));
    }

    if phases.is_empty() {
        errors.push("phases must be non-empty".to_string());
    }

    for (idx, phase) in phases.iter().enumerate() {
        if phase.name.trim().is_empty() {
            errors.push(format!("phases[{idx}].name must not be empty"));
        } else if phase.name.chars().count() > MAX_PHASE_NAME_LEN {
            errors.push(format!("phases[{idx}].name exceeds {MAX_PHASE_NAME_LEN} characters"));
        }
        if phase.expected_deliverables.iter().any(|d| d.trim().is_empty()) {
            errors.push(format!("phases[{idx}].expected_deliverables contains an empty entry"));
        }
        if phase.success_criteria.iter().any(|c| c.trim().is_empty()) {
            errors.push(format!("phases[{idx}].success_criteria contains an empty entry"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Worker type is an open string (`spec.md` §9: "dynamic open-set worker
/// types") — no compiled enum of roles. Only length and charset are
/// validated; reviewer-ness is derived from review membership, never from
/// this tag.
pub fn validate_worker_type(raw: &str) -> Result<(), String> {
    if raw.is_empty() || raw.chars().count() > MAX_WORKER_TYPE_LEN {
        return Err(format!("worker type must be 1-{MAX_WORKER_TYPE_LEN} characters, got {}", raw.chars().count()));
    }
    if !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(format!("worker type {raw:?} must be alphanumeric, '-' or '_'"));
    }
    Ok(())
}

/// `priority` is always one of the five `Priority` enum variants once
/// deserialized — this validates a raw string from an untyped transport.
pub fn validate_priority(raw: &str) -> Result<Priority, String> {
    match raw {
        "P0" => Ok(Priority::P0),
        "P1" => Ok(Priority::P1),
        "P2" => Ok(Priority::P2),
        "P3" => Ok(Priority::P3),
        "P4" => Ok(Priority::P4),
        other => Err(format!("priority must be one of P0..P4, got {other:?}")),
    }
}
