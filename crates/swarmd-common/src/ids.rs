//! Typed identifiers and their generation rules.
//!
//! `spec.md` §9 flags the source's inconsistent `id` vs `agent_id` naming as
//! a bug to fix. Wrapping every identifier in its own newtype means the
//! compiler enforces the choice instead of a naming convention.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

fn random_hex(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len.div_ceil(2)).map(|_| rng.random()).collect();
    let mut s = hex::encode(bytes);
    s.truncate(len);
    s
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(TaskId);
string_id!(WorkerId);
string_id!(ReviewId);
string_id!(PhaseId);

/// Sentinel parent id for root-level workers (depth 1, parent depth 0).
pub const ORCHESTRATOR_PARENT: &str = "orchestrator";

impl TaskId {
    /// `TASK-{UTCdate}-{UTCtime}-{8 random hex}` per `spec.md` §3.
    pub fn generate() -> Self {
        let now = Utc::now();
        Self(format!(
            "TASK-{}-{}-{}",
            now.format("%Y%m%d"),
            now.format("%H%M%S"),
            random_hex(8)
        ))
    }
}

impl WorkerId {
    /// `{type}-{HHMMSS}-{6 random hex}` per `spec.md` §3.
    ///
    /// `worker_type` is an open-set string tag (`spec.md` §9): validated for
    /// length and charset by the caller, not constrained here.
    pub fn generate(worker_type: &str) -> Self {
        let now = Utc::now();
        Self(format!(
            "{}-{}-{}",
            worker_type,
            now.format("%H%M%S"),
            random_hex(6)
        ))
    }

    /// The mux session name hosting this worker: `agent_{id}`.
    pub fn mux_session_name(&self) -> String {
        format!("agent_{}", self.0)
    }
}

impl ReviewId {
    pub fn generate(phase_index: usize) -> Self {
        let now = Utc::now();
        Self(format!(
            "REVIEW-{:02}-{}-{}",
            phase_index,
            now.format("%H%M%S"),
            random_hex(6)
        ))
    }
}

impl PhaseId {
    pub fn generate(order_index: usize) -> Self {
        Self(format!("PHASE-{:02}-{}", order_index, random_hex(4)))
    }
}
