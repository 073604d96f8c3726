//! Typed error hierarchy for the swarmd daemon.
//!
//! One enum per subsystem, unified by `DaemonError` at the `ToolSurface`
//! boundary. Each subsystem enum's `Display` text is not the transport-visible
//! error kind — that's `DaemonError::kind()`, stable per `spec.md` §7.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("registry not found for task {task_id}")]
    TaskNotFound { task_id: String },

    #[error("failed to acquire registry lock for task {task_id}")]
    LockConflict { task_id: String },

    #[error("failed to read registry at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write registry at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry at {path} could not be deserialized: {source}")]
    Corrupt {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("worker id collision for {worker_id}")]
    WorkerIdCollision { worker_id: String },

    #[error("snapshot database error: {0}")]
    Snapshot(#[source] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("max agents ({max_agents}) exceeded for task {task_id}")]
    CapacityExceeded { task_id: String, max_agents: usize },

    #[error("max concurrent workers ({max_concurrent}) exceeded for task {task_id}")]
    ConcurrencyExceeded { task_id: String, max_concurrent: usize },

    #[error("max hierarchy depth ({max_depth}) exceeded spawning under {parent_id}")]
    DepthExceeded { parent_id: String, max_depth: usize },

    #[error("insufficient free disk space in workspace {path}")]
    InsufficientResources { path: std::path::PathBuf },

    #[error("workspace {path} is not writable")]
    WorkspaceNotWritable { path: std::path::PathBuf },

    #[error("worker {worker_id} not found for task {task_id}")]
    WorkerNotFound { task_id: String, worker_id: String },

    #[error("failed to start mux session {session}: {reason}")]
    MuxStartFailed { session: String, reason: String },

    #[error("failed to spawn worker subprocess: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum PhaseEngineError {
    #[error("phase is in state {current}, operation requires {required}")]
    PhaseStateInvalid { current: String, required: String },

    #[error("review {review_id} is in progress; manual verdicts are blocked")]
    ReviewBlocked { review_id: String },

    #[error("review {review_id} not found")]
    ReviewNotFound { review_id: String },

    #[error("verdict already submitted by reviewer {reviewer_id}")]
    AlreadySubmitted { reviewer_id: String },

    #[error("task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("failed to append to event stream at {path}: {source}")]
    AppendFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read event stream at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error unifying every subsystem at the `ToolSurface` boundary.
/// `kind()` returns the stable, transport-visible string from `spec.md` §7.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    PhaseEngine(#[from] PhaseEngineError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn store_kind(err: &StoreError) -> &'static str {
    match err {
        StoreError::TaskNotFound { .. } => "NotFound",
        StoreError::LockConflict { .. } => "RegistryLockConflict",
        _ => "SubprocessFailure",
    }
}

fn supervisor_kind(err: &SupervisorError) -> &'static str {
    match err {
        SupervisorError::CapacityExceeded { .. }
        | SupervisorError::ConcurrencyExceeded { .. }
        | SupervisorError::DepthExceeded { .. } => "CapacityExceeded",
        SupervisorError::InsufficientResources { .. } | SupervisorError::WorkspaceNotWritable { .. } => {
            "InsufficientResources"
        }
        SupervisorError::WorkerNotFound { .. } => "NotFound",
        SupervisorError::MuxStartFailed { .. } | SupervisorError::SpawnFailed(_) => "SubprocessFailure",
        SupervisorError::Store(inner) => store_kind(inner),
    }
}

fn phase_engine_kind(err: &PhaseEngineError) -> &'static str {
    match err {
        PhaseEngineError::PhaseStateInvalid { .. } => "PhaseStateInvalid",
        PhaseEngineError::ReviewBlocked { .. } => "ReviewBlocked",
        PhaseEngineError::ReviewNotFound { .. } | PhaseEngineError::TaskNotFound { .. } => "NotFound",
        PhaseEngineError::AlreadySubmitted { .. } => "AlreadySubmitted",
        PhaseEngineError::Store(inner) => store_kind(inner),
        PhaseEngineError::Supervisor(inner) => supervisor_kind(inner),
    }
}

impl DaemonError {
    /// The stable, transport-visible error kind string from `spec.md` §7.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Store(inner) => store_kind(inner),
            Self::Supervisor(inner) => supervisor_kind(inner),
            Self::PhaseEngine(inner) => phase_engine_kind(inner),
            Self::EventLog(_) => "SubprocessFailure",
            Self::Other(_) => "SubprocessFailure",
        }
    }
}
