//! Shared domain types for the swarmd orchestration daemon: typed ids, the
//! Task/Phase/Worker/Review entities, event-stream records, and the
//! `Guidance` response envelope. No I/O lives here — this crate is the
//! vocabulary the daemon binary builds its stores and supervisors out of.

pub mod events;
pub mod guidance;
pub mod ids;
pub mod phase;
pub mod review;
pub mod task;
pub mod worker;

pub use events::{FindingEvent, FindingType, ParseErrorSentinel, ProgressEvent, Severity};
pub use guidance::{state_tag, Guidance, GuidanceBuilder, ToolResponse};
pub use ids::{PhaseId, ReviewId, TaskId, WorkerId, ORCHESTRATOR_PARENT};
pub use phase::{is_legal_transition, Phase, PhaseStatus, Transition, TRANSITIONS};
pub use review::{FinalVerdict, Review, ReviewStatus, SeverityCounts, Verdict, VerdictRecord};
pub use task::{Counters, Limits, Priority, Task, TaskStatus};
pub use worker::{Worker, WorkerFiles, WorkerStatus};
