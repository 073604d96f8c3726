//! Materialized snapshot database: a transactional read path keyed by
//! `(task_id, entity_kind, entity_id)`, kept converged with the registry by
//! reconciling on every mutation and at startup (`spec.md` §4.4, §9).

use crate::errors::StoreError;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use swarmd_common::Task;

pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    pub fn open(workspace_base: &Path) -> Result<Self, StoreError> {
        let path = workspace_base.join("snapshot.db");
        let conn = Connection::open(&path).map_err(StoreError::Snapshot)?;
        conn.execute_batch(SCHEMA).map_err(StoreError::Snapshot)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        Self { conn: Mutex::new(conn) }
    }

    /// Recompute every row belonging to `task` from the authoritative Task
    /// entity. Counters are always re-derived from the worker list, never
    /// trusted as a stored value (`spec.md` §9).
    pub fn reconcile(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let task_id = task.task_id.as_str();

        conn.execute(
            "INSERT INTO tasks (task_id, description, status, current_phase_index, active_count, completed_count, total_spawned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(task_id) DO UPDATE SET
               description=excluded.description, status=excluded.status,
               current_phase_index=excluded.current_phase_index,
               active_count=excluded.active_count, completed_count=excluded.completed_count,
               total_spawned=excluded.total_spawned",
            params![
                task_id,
                task.description,
                serde_json::to_string(&task.status).unwrap_or_default(),
                task.current_phase_index as i64,
                task.workers.iter().filter(|w| !w.status.is_terminal()).count() as i64,
                task.workers.iter().filter(|w| w.status == swarmd_common::WorkerStatus::Completed).count() as i64,
                task.workers.len() as i64,
            ],
        )
        .map_err(StoreError::Snapshot)?;

        for phase in &task.phases {
            conn.execute(
                "INSERT INTO phases (task_id, phase_id, order_index, status)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(task_id, phase_id) DO UPDATE SET status=excluded.status",
                params![
                    task_id,
                    phase.phase_id.as_str(),
                    phase.order_index as i64,
                    serde_json::to_string(&phase.status).unwrap_or_default(),
                ],
            )
            .map_err(StoreError::Snapshot)?;
        }

        for worker in &task.workers {
            conn.execute(
                "INSERT INTO workers (task_id, worker_id, phase_index, status, progress)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(task_id, worker_id) DO UPDATE SET
                   status=excluded.status, progress=excluded.progress",
                params![
                    task_id,
                    worker.worker_id.as_str(),
                    worker.phase_index as i64,
                    serde_json::to_string(&worker.status).unwrap_or_default(),
                    worker.progress as i64,
                ],
            )
            .map_err(StoreError::Snapshot)?;
        }

        Ok(())
    }

    pub fn active_count(&self, task_id: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT active_count FROM tasks WHERE task_id = ?1", params![task_id], |row| row.get(0))
            .map_err(StoreError::Snapshot)
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    current_phase_index INTEGER NOT NULL,
    active_count INTEGER NOT NULL,
    completed_count INTEGER NOT NULL,
    total_spawned INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS phases (
    task_id TEXT NOT NULL,
    phase_id TEXT NOT NULL,
    order_index INTEGER NOT NULL,
    status TEXT NOT NULL,
    PRIMARY KEY (task_id, phase_id)
);
CREATE TABLE IF NOT EXISTS workers (
    task_id TEXT NOT NULL,
    worker_id TEXT NOT NULL,
    phase_index INTEGER NOT NULL,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL,
    PRIMARY KEY (task_id, worker_id)
);
";

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use swarmd_common::Priority;

    fn sample_task() -> Task {
        Task::new(
            "investigate the cache layer for thread safety".to_string(),
            Priority::P1,
            PathBuf::from("/tmp/project"),
            PathBuf::from("/tmp/ws/TASK-x"),
            vec![],
        )
    }

    #[test]
    fn reconcile_then_query_active_count() {
        let store = SnapshotStore::open_in_memory();
        let task = sample_task();
        store.reconcile(&task).unwrap();
        assert_eq!(store.active_count(task.task_id.as_str()).unwrap(), 0);
    }

    #[test]
    fn reconcile_is_idempotent_via_upsert() {
        let store = SnapshotStore::open_in_memory();
        let task = sample_task();
        store.reconcile(&task).unwrap();
        store.reconcile(&task).unwrap();
        assert_eq!(store.active_count(task.task_id.as_str()).unwrap(), 0);
    }
}
