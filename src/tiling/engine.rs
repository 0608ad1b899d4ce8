use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::codec::{GeometryCodec, TextureCodec};
use crate::error::{Result, TilerError};
use crate::generate::TileGenerator;
use crate::ingestion::{LoadedModel, ModelLoader};
use crate::partition::{PartitionContext, descriptors_for_level};
use crate::spatial::GridIndex;
use crate::storage::{BlobStore, TaskStore};
use crate::types::geometry::{BoundingBox, Triangle};
use crate::types::material::MaterialSet;
use crate::types::task::{SlicingTask, Stage, TaskStatus};
use crate::types::tile::{TileCoord, TileDescriptor, TileRecord};

/// Source load ceiling.
const LOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Retry schedule for transient blob failures.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_secs(2),
];

/// A level goes parallel when the average candidate triangle count per tile
/// exceeds this.
const PARALLEL_TRIANGLE_THRESHOLD: usize = 256;

/// Below this many triangles a tile skips decimation; there is nothing
/// meaningful left to collapse.
const DECIMATION_FLOOR: usize = 64;

/// Tile records are committed in batches of this size.
const RECORD_BATCH: usize = 50;

/// Longest run of consecutive tile failures (in descriptor order) within
/// one level that a task survives; one more fails it. Both dispatch paths
/// apply the same rule, so the outcome never depends on which path a
/// level's size selects.
const ENCODE_FAILURE_BUDGET: usize = 8;

/// Live counters shared between a running engine and the orchestrator's
/// progress reporting. Updates are atomic; no locking.
#[derive(Debug, Default)]
pub struct RunProgress {
    stage: AtomicU8,
    processed_tiles: AtomicU64,
    total_tiles: AtomicU64,
}

impl RunProgress {
    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u8, Ordering::Relaxed);
    }

    pub fn stage(&self) -> Stage {
        match self.stage.load(Ordering::Relaxed) {
            0 => Stage::Loading,
            1 => Stage::Indexing,
            2 => Stage::Slicing,
            _ => Stage::Finalizing,
        }
    }

    pub fn add_processed(&self, n: u64) {
        self.processed_tiles.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_total(&self, n: u64) {
        self.total_tiles.fetch_add(n, Ordering::Relaxed);
    }

    pub fn processed_tiles(&self) -> u64 {
        self.processed_tiles.load(Ordering::Relaxed)
    }

    pub fn total_tiles(&self) -> u64 {
        self.total_tiles.load(Ordering::Relaxed)
    }
}

/// Outcome of one run, reflected into the task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// The tiling pipeline: loads the source, partitions it level by level,
/// encodes and stores tiles, and emits the tileset hierarchy.
///
/// `run` never raises to its caller; outcomes are observed via task status.
pub struct TilingEngine {
    loader: Arc<dyn ModelLoader>,
    blob_store: Arc<dyn BlobStore>,
    task_store: Arc<dyn TaskStore>,
    texture_codec: Option<Arc<dyn TextureCodec>>,
    geometry_codec: Option<Arc<dyn GeometryCodec>>,
}

struct TileWrite {
    record: TileRecord,
    /// False when the incremental diff found the payload unchanged.
    written: bool,
}

impl TilingEngine {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        blob_store: Arc<dyn BlobStore>,
        task_store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            loader,
            blob_store,
            task_store,
            texture_codec: None,
            geometry_codec: None,
        }
    }

    pub fn with_texture_codec(mut self, codec: Arc<dyn TextureCodec>) -> Self {
        self.texture_codec = Some(codec);
        self
    }

    pub fn with_geometry_codec(mut self, codec: Arc<dyn GeometryCodec>) -> Self {
        self.geometry_codec = Some(codec);
        self
    }

    /// Run the pipeline for a task in `Created` or `Queued` state.
    pub fn run(&self, task_id: u64, cancel: &CancelToken, progress: &RunProgress) -> RunOutcome {
        match self.execute(task_id, cancel, progress) {
            Ok(()) => RunOutcome::Completed,
            Err(TilerError::Cancelled) => {
                info!(task_id, "task cancelled");
                self.finish(task_id, TaskStatus::Cancelled, None);
                RunOutcome::Cancelled
            }
            Err(e) => {
                warn!(task_id, error = %e, "task failed");
                self.finish(task_id, TaskStatus::Failed, Some(e.to_string()));
                RunOutcome::Failed
            }
        }
    }

    fn execute(&self, task_id: u64, cancel: &CancelToken, progress: &RunProgress) -> Result<()> {
        let mut task = self
            .task_store
            .get_task(task_id)?
            .ok_or_else(|| TilerError::InvalidRequest(format!("no task {task_id}")))?;
        if !matches!(task.status, TaskStatus::Created | TaskStatus::Queued) {
            return Err(TilerError::StoreConflict(format!(
                "task {task_id} is {}, expected created or queued",
                task.status
            )));
        }

        task.status = TaskStatus::Processing;
        task.started_at = Some(unix_now());
        task.progress = 0;
        task.error_message = None;
        self.task_store.update_task(&task)?;

        // 1. Load source.
        progress.set_stage(Stage::Loading);
        let load_start = Instant::now();
        let model = self
            .loader
            .load(std::path::Path::new(&task.source_path), cancel)?;
        if load_start.elapsed() > LOAD_TIMEOUT {
            return Err(TilerError::TransientIo(format!(
                "source load exceeded {}s ceiling",
                LOAD_TIMEOUT.as_secs()
            )));
        }
        info!(
            task_id,
            triangles = model.stats.total_triangles,
            vertices = model.stats.total_vertices,
            format = %model.stats.input_format,
            "source loaded"
        );

        let LoadedModel {
            triangles,
            bounds,
            mut materials,
            ..
        } = model;
        if task.config.enable_texture_compression {
            self.compress_textures(&mut materials);
        }

        // 2. Build the spatial index; read-only and shared from here on.
        progress.set_stage(Stage::Indexing);
        cancel.check()?;
        let total_triangles = triangles.len();
        let index = GridIndex::build(triangles, bounds);

        // 3. Resolve incremental mode.
        let prior_records = self.task_store.tile_records(task_id)?;
        let incremental = task.config.enable_incremental_updates && !prior_records.is_empty();
        let prior: HashMap<TileCoord, TileRecord> = prior_records
            .into_iter()
            .map(|r| (r.coord, r))
            .collect();
        if incremental {
            info!(task_id, prior_tiles = prior.len(), "incremental mode");
        }

        // The context borrows a snapshot of the config so per-level progress
        // writes on the task stay possible.
        let config = task.config.clone();
        let generator = TileGenerator::from_config(&config, self.geometry_codec.clone());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel_count)
            .build()
            .map_err(|e| TilerError::InvalidRequest(format!("worker pool: {e}")))?;

        let ctx = PartitionContext {
            model_bounds: bounds,
            config: &config,
            index: &index,
        };

        progress.set_stage(Stage::Slicing);
        let mut produced: HashSet<TileCoord> = HashSet::new();
        let mut changed: Vec<TileRecord> = Vec::new();

        // 4. Per-level loop; levels are sequential, tiles within a level are
        // independent.
        for level in 0..=task.config.max_level {
            cancel.check()?;

            let descriptors = descriptors_for_level(&ctx, level);
            if descriptors.is_empty() {
                debug!(task_id, level, "no descriptors at level");
            } else {
                progress.add_total(descriptors.len() as u64);

                let quality = level_quality(level, task.config.max_level);
                let parallel = descriptors.len() > 1
                    && total_triangles / descriptors.len() > PARALLEL_TRIANGLE_THRESHOLD;
                debug!(
                    task_id,
                    level,
                    tiles = descriptors.len(),
                    quality,
                    parallel,
                    "processing level"
                );

                let writes = if parallel {
                    self.process_level_parallel(
                        &pool, &task, &generator, &index, &materials, &prior, &descriptors,
                        quality, incremental, cancel, progress,
                    )?
                } else {
                    self.process_level_sequential(
                        &task, &generator, &index, &materials, &prior, &descriptors, quality,
                        incremental, cancel, progress,
                    )?
                };

                // Level-end commit of whatever the batching left over.
                self.commit_records(&writes)?;
                for write in writes {
                    produced.insert(write.record.coord);
                    if write.written {
                        changed.push(write.record);
                    }
                }
            }

            task.progress =
                (100.0 * f64::from(level + 1) / f64::from(task.config.max_level + 1)).round() as u8;
            self.task_store.update_task(&task)?;
        }

        // 5. Incremental deletion: prior tiles not reproduced at any level,
        // and everything beyond the new max level.
        let stale: Vec<TileRecord> = prior
            .values()
            .filter(|r| !produced.contains(&r.coord))
            .cloned()
            .collect();
        if !stale.is_empty() {
            info!(task_id, stale = stale.len(), "deleting stale tiles");
            for record in &stale {
                self.blob_store
                    .delete(&task.output_prefix, &record.relative_path)?;
            }
            let coords: Vec<TileCoord> = stale.iter().map(|r| r.coord).collect();
            self.task_store.delete_tile_records(task_id, &coords)?;
        }

        // 6. Emit hierarchy documents.
        progress.set_stage(Stage::Finalizing);
        cancel.check()?;
        let records = self.task_store.tile_records(task_id)?;
        super::tileset_writer::write_tileset(
            self.blob_store.as_ref(),
            &task,
            &records,
            cancel,
        )?;
        if incremental {
            if changed.is_empty() && stale.is_empty() {
                // A no-op re-run leaves no stale change list behind.
                self.blob_store
                    .delete(&task.output_prefix, "incremental_index.json")?;
            } else {
                super::tileset_writer::write_incremental_index(
                    self.blob_store.as_ref(),
                    &task,
                    &changed,
                    cancel,
                )?;
            }
        }

        // 7. Done.
        task.status = TaskStatus::Completed;
        task.progress = 100;
        task.completed_at = Some(unix_now());
        self.task_store.update_task(&task)?;
        info!(task_id, tiles = records.len(), "task completed");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_level_sequential(
        &self,
        task: &SlicingTask,
        generator: &TileGenerator,
        index: &GridIndex,
        materials: &MaterialSet,
        prior: &HashMap<TileCoord, TileRecord>,
        descriptors: &[TileDescriptor],
        quality: f64,
        incremental: bool,
        cancel: &CancelToken,
        progress: &RunProgress,
    ) -> Result<Vec<TileWrite>> {
        let mut out = Vec::new();
        let mut uncommitted = 0usize;
        let mut consecutive_failures = 0usize;

        for descriptor in descriptors {
            if cancel.is_cancelled() {
                self.commit_records(&out)?;
                return Err(TilerError::Cancelled);
            }

            match self.process_tile(
                task, generator, index, materials, prior, descriptor, quality, incremental,
                cancel,
            ) {
                Ok(Some(write)) => {
                    consecutive_failures = 0;
                    out.push(write);
                    uncommitted += 1;
                    if uncommitted >= RECORD_BATCH {
                        self.commit_records(&out[out.len() - uncommitted..])?;
                        uncommitted = 0;
                    }
                }
                Ok(None) => {
                    consecutive_failures = 0;
                }
                Err(TilerError::Cancelled) => {
                    self.commit_records(&out)?;
                    return Err(TilerError::Cancelled);
                }
                Err(e) => {
                    warn!(coord = %descriptor.coord, error = %e, "tile skipped");
                    consecutive_failures += 1;
                    if consecutive_failures > ENCODE_FAILURE_BUDGET {
                        return Err(e);
                    }
                }
            }
            progress.add_processed(1);
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_level_parallel(
        &self,
        pool: &rayon::ThreadPool,
        task: &SlicingTask,
        generator: &TileGenerator,
        index: &GridIndex,
        materials: &MaterialSet,
        prior: &HashMap<TileCoord, TileRecord>,
        descriptors: &[TileDescriptor],
        quality: f64,
        incremental: bool,
        cancel: &CancelToken,
        progress: &RunProgress,
    ) -> Result<Vec<TileWrite>> {
        // Collected in descriptor order (indexed parallel iterator), so the
        // consecutive-failure scan below sees the same sequence the
        // sequential path would.
        let results: Vec<Result<Option<TileWrite>>> = pool.install(|| {
            descriptors
                .par_iter()
                .map(|descriptor| {
                    // Cooperative: tiles not yet started are skipped after a
                    // cancel; in-flight tiles run to completion.
                    if cancel.is_cancelled() {
                        return Err(TilerError::Cancelled);
                    }
                    let result = self.process_tile(
                        task, generator, index, materials, prior, descriptor, quality,
                        incremental, cancel,
                    );
                    progress.add_processed(1);
                    if let Err(e) = &result {
                        if !matches!(e, TilerError::Cancelled) {
                            warn!(coord = %descriptor.coord, error = %e, "tile skipped");
                        }
                    }
                    result
                })
                .collect()
        });

        let mut out = Vec::new();
        let mut cancelled = false;
        let mut run = 0usize;
        let mut longest_run = 0usize;
        let mut last_error = None;
        for result in results {
            match result {
                Ok(Some(write)) => {
                    run = 0;
                    out.push(write);
                }
                Ok(None) => {
                    run = 0;
                }
                Err(TilerError::Cancelled) => cancelled = true,
                Err(e) => {
                    run += 1;
                    longest_run = longest_run.max(run);
                    last_error = Some(e);
                }
            }
        }

        if cancelled {
            self.commit_records(&out)?;
            return Err(TilerError::Cancelled);
        }
        if longest_run > ENCODE_FAILURE_BUDGET {
            return Err(last_error.unwrap_or_else(|| {
                TilerError::Encode("generator failure budget exceeded".into())
            }));
        }
        Ok(out)
    }

    /// Process one tile: query, refine, decimate, encode, diff, write.
    /// Returns `None` when the tile has no geometry.
    #[allow(clippy::too_many_arguments)]
    fn process_tile(
        &self,
        task: &SlicingTask,
        generator: &TileGenerator,
        index: &GridIndex,
        materials: &MaterialSet,
        prior: &HashMap<TileCoord, TileRecord>,
        descriptor: &TileDescriptor,
        quality: f64,
        incremental: bool,
        cancel: &CancelToken,
    ) -> Result<Option<TileWrite>> {
        let candidates = index.query(&descriptor.bounds);
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut triangles: Vec<Triangle> = candidates.into_iter().cloned().collect();
        if quality < 1.0 && triangles.len() > DECIMATION_FLOOR {
            triangles = crate::tiling::simplifier::simplify(
                &triangles,
                quality,
                0.01,
                task.config.preserve_normals,
                task.config.preserve_uvs,
            );
            if triangles.is_empty() {
                return Ok(None);
            }
        }

        let seed = tile_seed(descriptor.coord);
        let payload = generator.generate(&triangles, &descriptor.bounds, materials, seed)?;
        let content_hash = content_hash(descriptor.coord, &descriptor.bounds, &payload);

        if incremental {
            if let Some(previous) = prior.get(&descriptor.coord) {
                if previous.content_hash == content_hash {
                    debug!(coord = %descriptor.coord, "unchanged, skipping write");
                    return Ok(Some(TileWrite {
                        record: previous.clone(),
                        written: false,
                    }));
                }
            }
        }

        let relative_path = descriptor
            .coord
            .relative_path(task.config.output_format.extension());
        self.put_with_retry(
            &task.output_prefix,
            &relative_path,
            &payload,
            task.config.output_format.content_type(),
            cancel,
        )?;

        Ok(Some(TileWrite {
            record: TileRecord {
                task_id: task.id,
                coord: descriptor.coord,
                bounds: descriptor.bounds,
                relative_path,
                byte_size: payload.len() as u64,
                content_hash,
                created_at: unix_now(),
            },
            written: true,
        }))
    }

    /// Blob write with the transient-failure retry schedule.
    fn put_with_retry(
        &self,
        prefix: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.blob_store.put(prefix, key, bytes, content_type, cancel) {
                Ok(()) => return Ok(()),
                Err(TilerError::TransientIo(reason)) if attempt < RETRY_BACKOFF.len() => {
                    debug!(key, attempt, reason, "transient write failure, retrying");
                    std::thread::sleep(RETRY_BACKOFF[attempt]);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn commit_records(&self, writes: &[TileWrite]) -> Result<()> {
        let records: Vec<TileRecord> = writes
            .iter()
            .filter(|w| w.written)
            .map(|w| w.record.clone())
            .collect();
        if records.is_empty() {
            return Ok(());
        }
        for chunk in records.chunks(RECORD_BATCH) {
            self.task_store.upsert_tile_records(chunk)?;
        }
        Ok(())
    }

    fn compress_textures(&self, materials: &mut MaterialSet) {
        let Some(codec) = &self.texture_codec else {
            return;
        };
        for texture in &mut materials.textures {
            // Only raw RGBA payloads can be re-encoded directly
            if texture.data.len() as u64 == u64::from(texture.width) * u64::from(texture.height) * 4
            {
                match codec.encode_preferred(&texture.data, texture.width, texture.height, 85) {
                    Ok(encoded) => *texture = encoded,
                    Err(e) => warn!("texture compression failed: {e}"),
                }
            }
        }
    }

    /// Terminal status write; conflicts leave the stored status untouched.
    fn finish(&self, task_id: u64, status: TaskStatus, error_message: Option<String>) {
        let Ok(Some(mut task)) = self.task_store.get_task(task_id) else {
            return;
        };
        if !task.status.can_transition_to(status) {
            return;
        }
        task.status = status;
        task.completed_at = Some(unix_now());
        task.error_message = error_message;
        if let Err(e) = self.task_store.update_task(&task) {
            warn!(task_id, error = %e, "could not record terminal status");
        }

        // Partial output survives a failure only in incremental mode;
        // otherwise the prefix is cleared best-effort.
        if status == TaskStatus::Failed && !task.config.enable_incremental_updates {
            if let Ok(records) = self.task_store.tile_records(task_id) {
                for record in &records {
                    let _ = self
                        .blob_store
                        .delete(&task.output_prefix, &record.relative_path);
                }
                let coords: Vec<TileCoord> = records.iter().map(|r| r.coord).collect();
                let _ = self.task_store.delete_tile_records(task_id, &coords);
            }
        }
    }
}

/// Decimation quality for a level: `sqrt(level / max_level)`. The finest
/// level keeps full detail; the root keeps the least.
pub fn level_quality(level: u32, max_level: u32) -> f64 {
    if max_level == 0 || level >= max_level {
        return 1.0;
    }
    (f64::from(level) / f64::from(max_level)).sqrt()
}

/// Deterministic per-tile seed for stochastic sampling.
fn tile_seed(coord: TileCoord) -> u64 {
    (u64::from(coord.level) << 48)
        ^ (u64::from(coord.x) << 32)
        ^ (u64::from(coord.y) << 16)
        ^ u64::from(coord.z)
}

/// Content address: sha256 over `(level, x, y, z, bounds, payload)`, hex.
pub fn content_hash(coord: TileCoord, bounds: &BoundingBox, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(coord.level.to_le_bytes());
    hasher.update(coord.x.to_le_bytes());
    hasher.update(coord.y.to_le_bytes());
    hasher.update(coord.z.to_le_bytes());
    for c in bounds.min.iter().chain(bounds.max.iter()) {
        hasher.update(c.to_le_bytes());
    }
    hasher.update(payload);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
