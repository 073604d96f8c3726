//! Authoritative state store: per-task registry with locked read-modify-write,
//! a reconciled snapshot database for read-heavy consumers, and the
//! cross-task global index (`spec.md` §4.4).

pub mod snapshot;

use crate::config::SwarmdConfig;
use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use swarmd_common::{Task, TaskId, TaskStatus};

const REGISTRY_FILE_NAME: &str = "TASK_REGISTRY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub task_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
}

pub struct StateStore {
    config: SwarmdConfig,
    snapshots: snapshot::SnapshotStore,
}

impl StateStore {
    pub fn open(config: SwarmdConfig) -> Result<Self, StoreError> {
        config
            .ensure_directories()
            .map_err(|e| StoreError::WriteFailed {
                path: config.workspace_base.clone(),
                source: std::io::Error::other(e),
            })?;
        let snapshots = snapshot::SnapshotStore::open(&config.workspace_base)?;
        Ok(Self { config, snapshots })
    }

    pub fn registry_path(&self, task_id: &str) -> PathBuf {
        self.config.task_dir(task_id).join(REGISTRY_FILE_NAME)
    }

    /// Creates a brand-new task's workspace and registry, writing it once
    /// under lock so a concurrent reader never observes a partial file.
    pub fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        let dir = self.config.task_dir(task.task_id.as_str());
        std::fs::create_dir_all(dir.join("prompts"))
            .and_then(|_| std::fs::create_dir_all(dir.join("logs")))
            .and_then(|_| std::fs::create_dir_all(dir.join("progress")))
            .and_then(|_| std::fs::create_dir_all(dir.join("findings")))
            .and_then(|_| std::fs::create_dir_all(dir.join("handover")))
            .map_err(|source| StoreError::WriteFailed { path: dir.clone(), source })?;

        let path = self.registry_path(task.task_id.as_str());
        write_registry_locked(&path, &task)?;
        self.append_index_entry(&task)?;
        self.snapshots.reconcile(&task)?;
        Ok(task)
    }

    /// Acquires the exclusive advisory lock on the registry, reads and
    /// parses it, runs `mutate`, then atomically replaces the file contents
    /// before releasing the lock (`spec.md` §4.4 locked read-modify-write).
    pub fn with_locked_registry<R>(
        &self,
        task_id: &str,
        mutate: impl FnOnce(&mut Task) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let path = self.registry_path(task_id);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|_| StoreError::TaskNotFound { task_id: task_id.to_string() })?;
        lock_file
            .lock_exclusive()
            .map_err(|_| StoreError::LockConflict { task_id: task_id.to_string() })?;

        let result = (|| {
            let mut task = read_registry_unlocked(&path)?;
            let result = mutate(&mut task)?;
            write_registry_locked(&path, &task)?;
            self.snapshots.reconcile(&task)?;
            Ok(result)
        })();

        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    /// Shared-lock read, for callers that only need a consistent snapshot
    /// of the registry without mutating it.
    pub fn read_registry(&self, task_id: &str) -> Result<Task, StoreError> {
        let path = self.registry_path(task_id);
        let lock_file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|_| StoreError::TaskNotFound { task_id: task_id.to_string() })?;
        lock_file
            .lock_shared()
            .map_err(|_| StoreError::LockConflict { task_id: task_id.to_string() })?;
        let task = read_registry_unlocked(&path);
        let _ = fs2::FileExt::unlock(&lock_file);
        task
    }

    fn append_index_entry(&self, task: &Task) -> Result<(), StoreError> {
        let mut entries = self.read_index().unwrap_or_default();
        entries.push(IndexEntry {
            task_id: task.task_id.as_str().to_string(),
            description: task.description.clone(),
            created_at: task.created_at,
            status: task.status,
        });
        self.write_index(&entries)
    }

    pub fn update_index_status(&self, task_id: &str, status: TaskStatus) -> Result<(), StoreError> {
        let mut entries = self.read_index()?;
        if let Some(entry) = entries.iter_mut().find(|e| e.task_id == task_id) {
            entry.status = status;
        }
        self.write_index(&entries)
    }

    pub fn read_index(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let path = self.config.global_index_path();
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| serde_json::from_str(l).ok())
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(StoreError::ReadFailed { path, source }),
        }
    }

    fn write_index(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        let path = self.config.global_index_path();
        let mut rendered = String::new();
        for entry in entries {
            rendered.push_str(&serde_json::to_string(entry).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?);
            rendered.push('\n');
        }
        atomic_write(&path, rendered.as_bytes())
            .map_err(|source| StoreError::WriteFailed { path, source })
    }

    /// True id collision check before registering a new worker
    /// (`spec.md` §4.4 dedup: regenerate if collision).
    pub fn worker_id_taken(task: &Task, worker_id: &str) -> bool {
        task.workers.iter().any(|w| w.worker_id.as_str() == worker_id)
    }
}

fn read_registry_unlocked(path: &Path) -> Result<Task, StoreError> {
    let mut file = std::fs::File::open(path)
        .map_err(|source| StoreError::ReadFailed { path: path.to_path_buf(), source })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|source| StoreError::ReadFailed { path: path.to_path_buf(), source })?;
    serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt { path: path.to_path_buf(), source })
}

fn write_registry_locked(path: &Path, task: &Task) -> Result<(), StoreError> {
    let rendered = serde_json::to_vec_pretty(task)
        .map_err(|source| StoreError::Corrupt { path: path.to_path_buf(), source })?;
    atomic_write(path, &rendered).map_err(|source| StoreError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Write-to-temp-then-rename so a reader never observes a half-written
/// registry file.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
    }
    std::fs::rename(&tmp_path, path)
}
