pub mod eta;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, unbounded};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::codec::{GeometryCodec, TextureCodec};
use crate::config::{StorageLocation, TaskRequest};
use crate::error::{Result, TilerError};
use crate::ingestion::ModelLoader;
use crate::orchestrate::eta::EtaEstimator;
use crate::storage::{BlobStore, TaskStore};
use crate::tiling::engine::{RunProgress, TilingEngine, unix_now};
use crate::types::task::{ProgressReport, SlicingTask, Stage, TaskStatus};

/// One live (queued or running) task.
struct RunHandle {
    cancel: CancelToken,
    progress: Arc<RunProgress>,
    eta: Mutex<EtaEstimator>,
}

struct Shared {
    loader: Arc<dyn ModelLoader>,
    task_store: Arc<dyn TaskStore>,
    local_store: Arc<dyn BlobStore>,
    object_store: Arc<dyn BlobStore>,
    texture_codec: Mutex<Option<Arc<dyn TextureCodec>>>,
    geometry_codec: Mutex<Option<Arc<dyn GeometryCodec>>>,
    slices_root: Mutex<PathBuf>,
    runs: Mutex<HashMap<u64, Arc<RunHandle>>>,
}

impl Shared {
    fn blob_store_for(&self, location: StorageLocation) -> Arc<dyn BlobStore> {
        match location {
            StorageLocation::LocalFilesystem => self.local_store.clone(),
            StorageLocation::ObjectStore => self.object_store.clone(),
        }
    }
}

/// Accepts slicing jobs, runs the engine off the request path on a
/// crossbeam-fed worker pool, and surfaces progress with smoothed ETAs.
pub struct TaskOrchestrator {
    shared: Arc<Shared>,
    jobs: Sender<u64>,
}

impl TaskOrchestrator {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        task_store: Arc<dyn TaskStore>,
        local_store: Arc<dyn BlobStore>,
        object_store: Arc<dyn BlobStore>,
        worker_count: usize,
    ) -> Self {
        let shared = Arc::new(Shared {
            loader,
            task_store,
            local_store,
            object_store,
            texture_codec: Mutex::new(None),
            geometry_codec: Mutex::new(None),
            slices_root: Mutex::new(std::env::current_dir().unwrap_or_default().join("slices")),
            runs: Mutex::new(HashMap::new()),
        });

        let (jobs, receiver) = unbounded::<u64>();
        for worker in 0..worker_count.max(1) {
            let shared = shared.clone();
            let receiver: Receiver<u64> = receiver.clone();
            std::thread::Builder::new()
                .name(format!("slice-worker-{worker}"))
                .spawn(move || worker_loop(&shared, &receiver))
                .expect("spawn worker thread");
        }

        Self { shared, jobs }
    }

    pub fn with_texture_codec(self, codec: Arc<dyn TextureCodec>) -> Self {
        *self.shared.texture_codec.lock().expect("codec lock") = Some(codec);
        self
    }

    pub fn with_geometry_codec(self, codec: Arc<dyn GeometryCodec>) -> Self {
        *self.shared.geometry_codec.lock().expect("codec lock") = Some(codec);
        self
    }

    /// Base directory relative local output rebases onto (`{cwd}/slices` by
    /// default).
    pub fn with_slices_root(self, root: PathBuf) -> Self {
        *self.shared.slices_root.lock().expect("root lock") = root;
        self
    }

    /// Validate a request and create (or, in incremental mode, reuse) the
    /// task record. The task is left in `Created`; `start` queues it.
    pub fn create_task(&self, request: &TaskRequest, user: &str) -> Result<u64> {
        request.validate()?;

        let source = Path::new(&request.source_model_path);
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !self.shared.loader.supports(&extension) {
            return Err(TilerError::InvalidRequest(format!(
                "unsupported model type '.{extension}'; convert to a core format first"
            )));
        }

        let (location, output_prefix) = self.resolve_output(request);

        if request.slicing_config.enable_incremental_updates {
            if let Some(mut existing) = self
                .shared
                .task_store
                .find_by_prefix(&output_prefix, user)?
            {
                if matches!(existing.status, TaskStatus::Queued | TaskStatus::Processing) {
                    return Err(TilerError::StoreConflict(format!(
                        "task {} for this output is still {}",
                        existing.id, existing.status
                    )));
                }
                info!(task_id = existing.id, "reusing incremental task");
                existing.config = request.slicing_config.clone();
                existing.config.storage_location = Some(location);
                existing.status = TaskStatus::Created;
                existing.progress = 0;
                existing.started_at = None;
                existing.completed_at = None;
                existing.error_message = None;
                existing.origin_transform = request.origin_transform;
                self.shared.task_store.reset_task(&existing)?;
                return Ok(existing.id);
            }
        }

        // Persist the resolved location so later runs and deletes hit the
        // same backend.
        let mut config = request.slicing_config.clone();
        config.storage_location = Some(location);
        let task = SlicingTask {
            id: 0,
            name: request.name.clone(),
            source_path: request.source_model_path.clone(),
            model_type: request.model_type.clone(),
            config,
            output_prefix,
            origin_transform: request.origin_transform,
            status: TaskStatus::Created,
            progress: 0,
            created_by: user.to_string(),
            created_at: unix_now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        };
        let id = self.shared.task_store.create_task(task)?;
        info!(task_id = id, "task created");
        Ok(id)
    }

    /// Queue a created task onto the worker pool.
    pub fn start(&self, task_id: u64) -> Result<()> {
        let mut task = self
            .shared
            .task_store
            .get_task(task_id)?
            .ok_or_else(|| TilerError::InvalidRequest(format!("no task {task_id}")))?;
        task.status = TaskStatus::Queued;
        self.shared.task_store.update_task(&task)?;

        let handle = Arc::new(RunHandle {
            cancel: CancelToken::new(),
            progress: Arc::new(RunProgress::default()),
            eta: Mutex::new(EtaEstimator::new(Instant::now())),
        });
        self.shared
            .runs
            .lock()
            .expect("runs lock")
            .insert(task_id, handle);

        self.jobs
            .send(task_id)
            .map_err(|_| TilerError::TransientIo("worker pool is gone".into()))?;
        Ok(())
    }

    /// Progress snapshot; ETA only while the task is processing.
    pub fn get_progress(&self, task_id: u64) -> Result<ProgressReport> {
        let task = self
            .shared
            .task_store
            .get_task(task_id)?
            .ok_or_else(|| TilerError::InvalidRequest(format!("no task {task_id}")))?;

        let handle = self
            .shared
            .runs
            .lock()
            .expect("runs lock")
            .get(&task_id)
            .cloned();

        let (stage, processed, total) = match &handle {
            Some(h) => (
                h.progress.stage(),
                h.progress.processed_tiles(),
                h.progress.total_tiles(),
            ),
            None if task.status.is_terminal() => (Stage::Finalizing, 0, 0),
            None => (Stage::Loading, 0, 0),
        };

        let eta = match (&handle, task.status) {
            (Some(h), TaskStatus::Processing) => h
                .eta
                .lock()
                .expect("eta lock")
                .observe(f64::from(task.progress), Instant::now()),
            _ => None,
        };

        Ok(ProgressReport {
            task_id,
            progress: task.progress,
            current_stage: stage,
            status: task.status,
            processed_tiles: processed,
            total_tiles: total,
            estimated_time_remaining_seconds: eta,
        })
    }

    /// Cooperative cancel: creator only, from `Queued` or `Processing`.
    pub fn cancel(&self, task_id: u64, user: &str) -> Result<()> {
        let mut task = self
            .shared
            .task_store
            .get_task(task_id)?
            .ok_or_else(|| TilerError::InvalidRequest(format!("no task {task_id}")))?;
        if task.created_by != user {
            return Err(TilerError::InvalidRequest(
                "only the task creator may cancel it".into(),
            ));
        }
        if !matches!(task.status, TaskStatus::Queued | TaskStatus::Processing) {
            return Err(TilerError::StoreConflict(format!(
                "task {task_id} is {}, cannot cancel",
                task.status
            )));
        }

        let handle = self
            .shared
            .runs
            .lock()
            .expect("runs lock")
            .get(&task_id)
            .cloned();
        match handle {
            Some(h) => {
                // The engine observes the token between tiles and records
                // the terminal status itself.
                h.cancel.cancel();
                if task.status == TaskStatus::Queued {
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(unix_now());
                    self.shared.task_store.update_task(&task)?;
                }
            }
            None => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(unix_now());
                self.shared.task_store.update_task(&task)?;
            }
        }
        info!(task_id, "cancel requested");
        Ok(())
    }

    /// Remove the task, its tile blobs, and its hierarchy documents.
    pub fn delete(&self, task_id: u64, user: &str) -> Result<()> {
        let task = self
            .shared
            .task_store
            .get_task(task_id)?
            .ok_or_else(|| TilerError::InvalidRequest(format!("no task {task_id}")))?;
        if task.created_by != user {
            return Err(TilerError::InvalidRequest(
                "only the task creator may delete it".into(),
            ));
        }
        if matches!(task.status, TaskStatus::Queued | TaskStatus::Processing) {
            return Err(TilerError::StoreConflict(
                "cancel the task before deleting it".into(),
            ));
        }

        let store = self.shared.blob_store_for(
            task.config
                .storage_location
                .unwrap_or(StorageLocation::LocalFilesystem),
        );
        for record in self.shared.task_store.tile_records(task_id)? {
            if let Err(e) = store.delete(&task.output_prefix, &record.relative_path) {
                warn!(task_id, path = record.relative_path, error = %e, "blob delete failed");
            }
        }
        let _ = store.delete(&task.output_prefix, "tileset.json");
        let _ = store.delete(&task.output_prefix, "incremental_index.json");
        self.shared.task_store.delete_task(task_id)?;
        info!(task_id, "task deleted");
        Ok(())
    }

    /// Poll the task store until the task reaches a terminal state.
    pub fn wait(&self, task_id: u64, timeout: Duration) -> Result<TaskStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let task = self
                .shared
                .task_store
                .get_task(task_id)?
                .ok_or_else(|| TilerError::InvalidRequest(format!("no task {task_id}")))?;
            if task.status.is_terminal() {
                return Ok(task.status);
            }
            if Instant::now() >= deadline {
                return Err(TilerError::TransientIo(format!(
                    "task {task_id} still {} after {:?}",
                    task.status, timeout
                )));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn task(&self, task_id: u64) -> Result<Option<SlicingTask>> {
        self.shared.task_store.get_task(task_id)
    }

    /// Final output location resolution, in override order: an explicit
    /// `storage_location` wins; with no override, an absolute output path
    /// selects the local filesystem; everything else routes to the object
    /// store.
    ///
    /// Local prefixes take absolute paths verbatim and rebase relative ones
    /// onto the slices root; object-store prefixes use a relative output
    /// path or the deterministic prefix name.
    fn resolve_output(&self, request: &TaskRequest) -> (StorageLocation, String) {
        let derived = derived_prefix_name(&request.source_model_path);
        let has_absolute_output = request
            .output_path
            .as_ref()
            .is_some_and(|p| Path::new(p).is_absolute());

        let location = match request.slicing_config.storage_location {
            Some(explicit) => explicit,
            None if has_absolute_output => StorageLocation::LocalFilesystem,
            None => StorageLocation::ObjectStore,
        };

        match location {
            StorageLocation::ObjectStore => {
                let prefix = match &request.output_path {
                    Some(p) if !Path::new(p).is_absolute() => p.clone(),
                    _ => derived,
                };
                (StorageLocation::ObjectStore, prefix)
            }
            StorageLocation::LocalFilesystem => {
                let root = self.shared.slices_root.lock().expect("root lock").clone();
                let prefix = match &request.output_path {
                    Some(p) if Path::new(p).is_absolute() => PathBuf::from(p),
                    Some(p) => root.join(p),
                    None => root.join(&derived),
                };
                (
                    StorageLocation::LocalFilesystem,
                    prefix.display().to_string(),
                )
            }
        }
    }
}

fn worker_loop(shared: &Arc<Shared>, receiver: &Receiver<u64>) {
    while let Ok(task_id) = receiver.recv() {
        let handle = shared
            .runs
            .lock()
            .expect("runs lock")
            .get(&task_id)
            .cloned();
        let Some(handle) = handle else { continue };

        if !handle.cancel.is_cancelled() {
            let task = shared.task_store.get_task(task_id).ok().flatten();
            let location = task
                .and_then(|t| t.config.storage_location)
                .unwrap_or(StorageLocation::LocalFilesystem);

            let mut engine = TilingEngine::new(
                shared.loader.clone(),
                shared.blob_store_for(location),
                shared.task_store.clone(),
            );
            if let Some(codec) = shared.texture_codec.lock().expect("codec lock").clone() {
                engine = engine.with_texture_codec(codec);
            }
            if let Some(codec) = shared.geometry_codec.lock().expect("codec lock").clone() {
                engine = engine.with_geometry_codec(codec);
            }

            engine.run(task_id, &handle.cancel, &handle.progress);
        }

        shared.runs.lock().expect("runs lock").remove(&task_id);
    }
}

/// `clean_basename + "_" + sha256(source_path)[0..16]`: stable per source,
/// safe in paths and object keys.
pub fn derived_prefix_name(source_path: &str) -> String {
    let stem = Path::new(source_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model");
    let clean: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    let digest = hasher.finalize();
    let mut hash = String::with_capacity(16);
    for byte in &digest[..8] {
        hash.push_str(&format!("{byte:02x}"));
    }

    format!("{clean}_{hash}")
}
