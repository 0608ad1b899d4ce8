use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::error::{Result, TilerError};
use crate::types::task::{SlicingTask, TaskStatus};
use crate::types::tile::{TileCoord, TileRecord};

/// Task and tile-record persistence collaborator.
///
/// Tile-record upserts are batched: one call is one transactional unit of
/// work. Status updates validate the task state machine and report
/// `StoreConflict` when a concurrent mutation got there first.
pub trait TaskStore: Send + Sync {
    /// Persist a new task, assigning and returning its id.
    fn create_task(&self, task: SlicingTask) -> Result<u64>;

    fn get_task(&self, id: u64) -> Result<Option<SlicingTask>>;

    /// Replace the stored task. Illegal status transitions are rejected
    /// with `StoreConflict`.
    fn update_task(&self, task: &SlicingTask) -> Result<()>;

    /// Rewind a finished task for reuse, bypassing transition validation.
    /// Only the orchestrator's incremental-reuse path calls this.
    fn reset_task(&self, task: &SlicingTask) -> Result<()>;

    /// Find a reusable task by its deterministic output prefix and creator.
    fn find_by_prefix(&self, output_prefix: &str, created_by: &str)
    -> Result<Option<SlicingTask>>;

    /// Remove the task and all of its tile records.
    fn delete_task(&self, id: u64) -> Result<()>;

    /// Insert-or-update a batch of tile records as one unit of work.
    fn upsert_tile_records(&self, records: &[TileRecord]) -> Result<()>;

    /// All records for a task, ordered by coordinate.
    fn tile_records(&self, task_id: u64) -> Result<Vec<TileRecord>>;

    fn delete_tile_records(&self, task_id: u64, coords: &[TileCoord]) -> Result<()>;
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    tasks: HashMap<u64, SlicingTask>,
    records: HashMap<u64, BTreeMap<TileCoord, TileRecord>>,
}

/// In-memory task store standing in for the database collaborator.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn create_task(&self, mut task: SlicingTask) -> Result<u64> {
        let mut inner = self.inner.lock().expect("task store lock");
        inner.next_id += 1;
        let id = inner.next_id;
        task.id = id;
        inner.tasks.insert(id, task);
        Ok(id)
    }

    fn get_task(&self, id: u64) -> Result<Option<SlicingTask>> {
        Ok(self
            .inner
            .lock()
            .expect("task store lock")
            .tasks
            .get(&id)
            .cloned())
    }

    fn update_task(&self, task: &SlicingTask) -> Result<()> {
        let mut inner = self.inner.lock().expect("task store lock");
        let current = inner.tasks.get(&task.id).ok_or_else(|| {
            TilerError::StoreConflict(format!("task {} no longer exists", task.id))
        })?;

        let status_change = current.status != task.status;
        if status_change && !current.status.can_transition_to(task.status) {
            return Err(TilerError::StoreConflict(format!(
                "task {} cannot move {} -> {}",
                task.id, current.status, task.status
            )));
        }

        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn reset_task(&self, task: &SlicingTask) -> Result<()> {
        let mut inner = self.inner.lock().expect("task store lock");
        if !inner.tasks.contains_key(&task.id) {
            return Err(TilerError::StoreConflict(format!(
                "task {} no longer exists",
                task.id
            )));
        }
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn find_by_prefix(
        &self,
        output_prefix: &str,
        created_by: &str,
    ) -> Result<Option<SlicingTask>> {
        Ok(self
            .inner
            .lock()
            .expect("task store lock")
            .tasks
            .values()
            .find(|t| t.output_prefix == output_prefix && t.created_by == created_by)
            .cloned())
    }

    fn delete_task(&self, id: u64) -> Result<()> {
        let mut inner = self.inner.lock().expect("task store lock");
        inner.tasks.remove(&id);
        inner.records.remove(&id);
        Ok(())
    }

    fn upsert_tile_records(&self, records: &[TileRecord]) -> Result<()> {
        let mut inner = self.inner.lock().expect("task store lock");
        for record in records {
            inner
                .records
                .entry(record.task_id)
                .or_default()
                .insert(record.coord, record.clone());
        }
        Ok(())
    }

    fn tile_records(&self, task_id: u64) -> Result<Vec<TileRecord>> {
        Ok(self
            .inner
            .lock()
            .expect("task store lock")
            .records
            .get(&task_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn delete_tile_records(&self, task_id: u64, coords: &[TileCoord]) -> Result<()> {
        let mut inner = self.inner.lock().expect("task store lock");
        if let Some(map) = inner.records.get_mut(&task_id) {
            for coord in coords {
                map.remove(coord);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlicingConfig;
    use crate::types::geometry::BoundingBox;

    fn make_task() -> SlicingTask {
        SlicingTask {
            id: 0,
            name: "test".into(),
            source_path: "/data/a.obj".into(),
            model_type: "obj".into(),
            config: SlicingConfig::default(),
            output_prefix: "/out/a_123".into(),
            origin_transform: None,
            status: TaskStatus::Created,
            progress: 0,
            created_by: "alice".into(),
            created_at: 1,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    fn make_record(task_id: u64, level: u32, x: u32) -> TileRecord {
        TileRecord {
            task_id,
            coord: TileCoord::new(level, x, 0, 0),
            bounds: BoundingBox {
                min: [0.0; 3],
                max: [1.0; 3],
            },
            relative_path: format!("{level}/{x}_0_0.b3dm"),
            byte_size: 10,
            content_hash: "00".repeat(32),
            created_at: 1,
        }
    }

    #[test]
    fn create_assigns_ids() {
        let store = MemoryTaskStore::new();
        let a = store.create_task(make_task()).unwrap();
        let b = store.create_task(make_task()).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.get_task(a).unwrap().unwrap().id, a);
    }

    #[test]
    fn update_validates_transitions() {
        let store = MemoryTaskStore::new();
        let id = store.create_task(make_task()).unwrap();

        let mut task = store.get_task(id).unwrap().unwrap();
        task.status = TaskStatus::Queued;
        store.update_task(&task).unwrap();

        task.status = TaskStatus::Processing;
        store.update_task(&task).unwrap();

        // Completed task can't be re-queued
        task.status = TaskStatus::Completed;
        store.update_task(&task).unwrap();
        task.status = TaskStatus::Queued;
        assert!(matches!(
            store.update_task(&task),
            Err(TilerError::StoreConflict(_))
        ));
    }

    #[test]
    fn same_status_update_is_not_a_conflict() {
        let store = MemoryTaskStore::new();
        let id = store.create_task(make_task()).unwrap();
        let mut task = store.get_task(id).unwrap().unwrap();
        task.progress = 50;
        store.update_task(&task).unwrap();
        assert_eq!(store.get_task(id).unwrap().unwrap().progress, 50);
    }

    #[test]
    fn find_by_prefix_matches_creator() {
        let store = MemoryTaskStore::new();
        store.create_task(make_task()).unwrap();

        assert!(
            store
                .find_by_prefix("/out/a_123", "alice")
                .unwrap()
                .is_some()
        );
        assert!(store.find_by_prefix("/out/a_123", "bob").unwrap().is_none());
        assert!(store.find_by_prefix("/out/other", "alice").unwrap().is_none());
    }

    #[test]
    fn records_upsert_and_order() {
        let store = MemoryTaskStore::new();
        let id = store.create_task(make_task()).unwrap();

        store
            .upsert_tile_records(&[make_record(id, 1, 1), make_record(id, 0, 0)])
            .unwrap();
        // Upsert same coord replaces
        let mut updated = make_record(id, 1, 1);
        updated.byte_size = 99;
        store.upsert_tile_records(&[updated]).unwrap();

        let records = store.tile_records(id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].coord.level, 0);
        assert_eq!(records[1].byte_size, 99);
    }

    #[test]
    fn delete_task_drops_records() {
        let store = MemoryTaskStore::new();
        let id = store.create_task(make_task()).unwrap();
        store.upsert_tile_records(&[make_record(id, 0, 0)]).unwrap();

        store.delete_task(id).unwrap();
        assert!(store.get_task(id).unwrap().is_none());
        assert!(store.tile_records(id).unwrap().is_empty());
    }

    #[test]
    fn delete_selected_records() {
        let store = MemoryTaskStore::new();
        let id = store.create_task(make_task()).unwrap();
        store
            .upsert_tile_records(&[make_record(id, 0, 0), make_record(id, 1, 1)])
            .unwrap();

        store
            .delete_tile_records(id, &[TileCoord::new(0, 0, 0, 0)])
            .unwrap();
        let records = store.tile_records(id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].coord.level, 1);
    }
}
