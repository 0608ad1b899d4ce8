//! End-to-end runs of the tiling engine against in-memory collaborators.

use std::path::Path;
use std::sync::Arc;

use mesh_tiler::cancel::CancelToken;
use mesh_tiler::config::{OutputFormat, SlicingConfig, StorageLocation, Strategy};
use mesh_tiler::generate::b3dm::B3dmLayout;
use mesh_tiler::generate::pnts;
use mesh_tiler::ingestion::{LoadStats, LoadedModel, ModelLoader};
use mesh_tiler::storage::{BlobStore, MemoryBlobStore, MemoryTaskStore, TaskStore};
use mesh_tiler::tiling::engine::{RunOutcome, RunProgress, TilingEngine};
use mesh_tiler::types::geometry::{BoundingBox, Triangle};
use mesh_tiler::types::material::MaterialSet;
use mesh_tiler::types::task::{SlicingTask, TaskStatus};

/// Loader that serves a fixed triangle soup regardless of path.
struct StaticLoader(Vec<Triangle>);

impl ModelLoader for StaticLoader {
    fn supports(&self, _extension: &str) -> bool {
        true
    }

    fn load(
        &self,
        _path: &Path,
        cancel: &CancelToken,
    ) -> mesh_tiler::Result<LoadedModel> {
        cancel.check()?;
        let triangles = self.0.clone();
        let bounds = BoundingBox::of_triangles(&triangles);
        Ok(LoadedModel {
            stats: LoadStats {
                total_vertices: triangles.len() * 3,
                total_triangles: triangles.len(),
                input_format: "static".into(),
                ..Default::default()
            },
            triangles,
            bounds,
            materials: MaterialSet::default(),
        })
    }
}

fn tri(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> Triangle {
    Triangle::new([a, b, c], None, None, None).unwrap()
}

/// 12 triangles forming the surface of an axis-aligned box.
fn box_triangles(lo: [f64; 3], hi: [f64; 3]) -> Vec<Triangle> {
    let v = |x: usize, y: usize, z: usize| {
        [
            if x == 1 { hi[0] } else { lo[0] },
            if y == 1 { hi[1] } else { lo[1] },
            if z == 1 { hi[2] } else { lo[2] },
        ]
    };
    vec![
        // -z
        tri(v(0, 0, 0), v(0, 1, 0), v(1, 1, 0)),
        tri(v(0, 0, 0), v(1, 1, 0), v(1, 0, 0)),
        // +z
        tri(v(0, 0, 1), v(1, 0, 1), v(1, 1, 1)),
        tri(v(0, 0, 1), v(1, 1, 1), v(0, 1, 1)),
        // -y
        tri(v(0, 0, 0), v(1, 0, 0), v(1, 0, 1)),
        tri(v(0, 0, 0), v(1, 0, 1), v(0, 0, 1)),
        // +y
        tri(v(0, 1, 0), v(0, 1, 1), v(1, 1, 1)),
        tri(v(0, 1, 0), v(1, 1, 1), v(1, 1, 0)),
        // -x
        tri(v(0, 0, 0), v(0, 0, 1), v(0, 1, 1)),
        tri(v(0, 0, 0), v(0, 1, 1), v(0, 1, 0)),
        // +x
        tri(v(1, 0, 0), v(1, 1, 0), v(1, 1, 1)),
        tri(v(1, 0, 0), v(1, 1, 1), v(1, 0, 1)),
    ]
}

struct Harness {
    task_store: Arc<MemoryTaskStore>,
    blob_store: Arc<MemoryBlobStore>,
    engine: TilingEngine,
    task_id: u64,
}

fn harness(triangles: Vec<Triangle>, config: SlicingConfig) -> Harness {
    let task_store = Arc::new(MemoryTaskStore::new());
    let blob_store = Arc::new(MemoryBlobStore::new());
    let engine = TilingEngine::new(
        Arc::new(StaticLoader(triangles)),
        blob_store.clone(),
        task_store.clone(),
    );

    let task = SlicingTask {
        id: 0,
        name: "test".into(),
        source_path: "/mem/model.obj".into(),
        model_type: "obj".into(),
        config,
        output_prefix: "out".into(),
        origin_transform: None,
        status: TaskStatus::Created,
        progress: 0,
        created_by: "tester".into(),
        created_at: 0,
        started_at: None,
        completed_at: None,
        error_message: None,
    };
    let task_id = task_store.create_task(task).unwrap();

    Harness {
        task_store,
        blob_store,
        engine,
        task_id,
    }
}

fn run(h: &Harness) -> RunOutcome {
    h.engine
        .run(h.task_id, &CancelToken::new(), &RunProgress::default())
}

fn reset_for_rerun(h: &Harness) {
    let mut task = h.task_store.get_task(h.task_id).unwrap().unwrap();
    task.status = TaskStatus::Created;
    task.progress = 0;
    task.completed_at = None;
    h.task_store.reset_task(&task).unwrap();
}

fn config(strategy: Strategy, max_level: u32, format: OutputFormat) -> SlicingConfig {
    SlicingConfig {
        strategy,
        max_level,
        output_format: format,
        tile_size: 2.0,
        geometric_error_threshold: 16.0,
        enable_incremental_updates: false,
        storage_location: Some(StorageLocation::ObjectStore),
        ..Default::default()
    }
}

fn triangle_count_of_b3dm(payload: &[u8]) -> usize {
    let (_, inner) = B3dmLayout::parse(payload).expect("b3dm layout");
    let (doc, buffers, _) = gltf::import_slice(inner).expect("embedded glb");
    let prim = doc.meshes().next().unwrap().primitives().next().unwrap();
    let reader = prim.reader(|b| Some(&buffers[b.index()]));
    reader.read_indices().unwrap().into_u32().count() / 3
}

#[test]
fn unit_cube_grid_level0_b3dm() {
    let h = harness(
        box_triangles([0.0; 3], [1.0; 3]),
        config(Strategy::Grid, 0, OutputFormat::B3dm),
    );
    assert_eq!(run(&h), RunOutcome::Completed);

    let records = h.task_store.tile_records(h.task_id).unwrap();
    assert_eq!(records.len(), 1, "exactly one root tile");
    let record = &records[0];
    assert_eq!(
        (record.coord.level, record.coord.x, record.coord.y, record.coord.z),
        (0, 0, 0, 0)
    );
    assert_eq!(record.bounds.min, [0.0; 3]);
    assert_eq!(record.bounds.max, [1.0; 3]);

    // Payload parses and carries all 12 recentered triangles
    let payload = h.blob_store.get("out", &record.relative_path).unwrap();
    assert_eq!(triangle_count_of_b3dm(&payload), 12);

    // tileset.json: root error = threshold * 2^0
    let tileset: serde_json::Value =
        serde_json::from_slice(&h.blob_store.get("out", "tileset.json").unwrap()).unwrap();
    assert_eq!(tileset["geometricError"], 16.0);
    assert_eq!(tileset["root"]["geometricError"], 16.0);
    assert_eq!(tileset["root"]["content"]["uri"], "0/0_0_0.b3dm");
}

#[test]
fn unit_cube_grid_level1_glb() {
    let h = harness(
        box_triangles([0.0; 3], [1.0; 3]),
        config(Strategy::Grid, 1, OutputFormat::Glb),
    );
    assert_eq!(run(&h), RunOutcome::Completed);

    let records = h.task_store.tile_records(h.task_id).unwrap();
    let level1: Vec<_> = records.iter().filter(|r| r.coord.level == 1).collect();
    // 2x2 horizontal cells, one vertical layer
    assert_eq!(level1.len(), 4);
    for r in &level1 {
        assert!(r.coord.x <= 1 && r.coord.y <= 1 && r.coord.z == 0);
    }

    // Union of level-1 bounds covers the cube
    let mut union = BoundingBox::empty();
    for r in &level1 {
        union = union.merge(&r.bounds);
    }
    assert_eq!(union.min, [0.0; 3]);
    assert_eq!(union.max, [1.0; 3]);

    // Straddling triangles land in multiple tiles: per-tile counts sum to
    // at least the source count
    let mut total = 0;
    for r in &level1 {
        let payload = h.blob_store.get("out", &r.relative_path).unwrap();
        let (doc, buffers, _) = gltf::import_slice(&payload).unwrap();
        let prim = doc.meshes().next().unwrap().primitives().next().unwrap();
        let reader = prim.reader(|b| Some(&buffers[b.index()]));
        total += reader.read_indices().unwrap().into_u32().count() / 3;
    }
    assert!(total >= 12, "pre-dedup per-tile counts sum to {total}");
}

#[test]
fn two_disjoint_cubes_adaptive_omits_empty_gap() {
    let mut triangles = box_triangles([0.0; 3], [1.0; 3]);
    triangles.extend(box_triangles([10.0; 3], [11.0; 3]));

    let mut cfg = config(Strategy::Adaptive, 2, OutputFormat::B3dm);
    cfg.tile_size = 4.0;
    let h = harness(triangles, cfg);
    assert_eq!(run(&h), RunOutcome::Completed);

    let records = h.task_store.tile_records(h.task_id).unwrap();
    assert!(records.iter().any(|r| r.coord.level > 0), "refined levels exist");

    // Every refined tile touches one of the two cubes; the empty middle
    // region gets no tiles of its own
    let cube_a = BoundingBox {
        min: [0.0; 3],
        max: [1.0; 3],
    };
    let cube_b = BoundingBox {
        min: [10.0; 3],
        max: [11.0; 3],
    };
    for r in records.iter().filter(|r| r.coord.level > 0) {
        assert!(
            r.bounds.intersects(&cube_a, 1e-9) || r.bounds.intersects(&cube_b, 1e-9),
            "tile {} covers only empty space",
            r.coord
        );
    }

    // Root bounding volume spans both cubes
    let tileset: serde_json::Value =
        serde_json::from_slice(&h.blob_store.get("out", "tileset.json").unwrap()).unwrap();
    let bv = tileset["root"]["boundingVolume"]["box"].as_array().unwrap();
    let center_x = bv[0].as_f64().unwrap();
    let half_x = bv[3].as_f64().unwrap();
    assert!((center_x - half_x).abs() < 1e-9);
    assert!((center_x + half_x - 11.0).abs() < 1e-9);
}

#[test]
fn pnts_quad_vertices_only() {
    // Two coplanar triangles sharing an edge: 4 unique vertices
    let quad = vec![
        tri([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
        tri([0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]),
    ];
    let h = harness(quad, config(Strategy::Grid, 0, OutputFormat::Pnts));
    assert_eq!(run(&h), RunOutcome::Completed);

    let records = h.task_store.tile_records(h.task_id).unwrap();
    assert_eq!(records.len(), 1);
    let payload = h.blob_store.get("out", &records[0].relative_path).unwrap();
    let (ft, bin) = pnts::parse_feature_table(&payload).unwrap();
    assert_eq!(ft["POINTS_LENGTH"], 4);

    // Nonzero z range: colors span the blue-to-red gradient
    let rgb_offset = ft["RGB"]["byteOffset"].as_u64().unwrap() as usize;
    let rgb = &bin[rgb_offset..rgb_offset + 4 * 3];
    assert!(rgb.chunks(3).any(|c| c[2] > 200), "has a blue low point");
    assert!(rgb.chunks(3).any(|c| c[0] > 200), "has a red high point");
}

#[test]
fn incremental_second_run_rewrites_nothing() {
    let mut cfg = config(Strategy::Grid, 1, OutputFormat::B3dm);
    cfg.enable_incremental_updates = true;
    let h = harness(box_triangles([0.0; 3], [1.0; 3]), cfg);

    assert_eq!(run(&h), RunOutcome::Completed);
    let first_run_puts = h.blob_store.put_count();
    let first_records = h.task_store.tile_records(h.task_id).unwrap();

    reset_for_rerun(&h);
    assert_eq!(run(&h), RunOutcome::Completed);

    // Only tileset.json is rewritten; no tile blob writes
    let second_run_puts = h.blob_store.put_count() - first_run_puts;
    assert_eq!(second_run_puts, 1, "second run rewrites only tileset.json");
    assert!(!h.blob_store.exists("out", "incremental_index.json").unwrap());

    // Records and hashes are unchanged
    let second_records = h.task_store.tile_records(h.task_id).unwrap();
    assert_eq!(first_records, second_records);
}

#[test]
fn incremental_rerun_rewrites_only_changed_region() {
    // Two disjoint quads in opposite grid cells; corner pins keep the model
    // bounds identical across runs.
    let pin_low = tri([0.0, 0.0, 0.0], [0.01, 0.0, 0.0], [0.0, 0.01, 0.0]);
    let pin_high = tri([1.0, 1.0, 0.0], [0.99, 1.0, 0.0], [1.0, 0.99, 0.0]);

    let quad_a = vec![
        tri([0.1, 0.1, 0.0], [0.3, 0.1, 0.0], [0.3, 0.3, 0.0]),
        tri([0.1, 0.1, 0.0], [0.3, 0.3, 0.0], [0.1, 0.3, 0.0]),
    ];
    let quad_b = |x0: f64| {
        vec![
            tri([x0, 0.7, 0.0], [x0 + 0.2, 0.7, 0.0], [x0 + 0.2, 0.9, 0.0]),
            tri([x0, 0.7, 0.0], [x0 + 0.2, 0.9, 0.0], [x0, 0.9, 0.0]),
        ]
    };

    let mut first = vec![pin_low.clone(), pin_high.clone()];
    first.extend(quad_a.clone());
    first.extend(quad_b(0.6));

    let mut cfg = config(Strategy::Grid, 1, OutputFormat::B3dm);
    cfg.enable_incremental_updates = true;

    let h = harness(first, cfg.clone());
    assert_eq!(run(&h), RunOutcome::Completed);
    let before = h.task_store.tile_records(h.task_id).unwrap();

    // Second run with quad B nudged inside its cell
    let mut second = vec![pin_low, pin_high];
    second.extend(quad_a);
    second.extend(quad_b(0.65));

    let task_store = h.task_store.clone();
    let blob_store = h.blob_store.clone();
    let engine = TilingEngine::new(Arc::new(StaticLoader(second)), blob_store.clone(), task_store.clone());
    reset_for_rerun(&h);
    assert_eq!(
        engine.run(h.task_id, &CancelToken::new(), &RunProgress::default()),
        RunOutcome::Completed
    );

    let after = task_store.tile_records(h.task_id).unwrap();
    assert_eq!(before.len(), after.len(), "same coord set");

    // Tiles away from quad B keep their hashes
    let changed: Vec<String> = before
        .iter()
        .zip(&after)
        .filter(|(a, b)| a.content_hash != b.content_hash)
        .map(|(_, b)| b.relative_path.clone())
        .collect();
    assert!(!changed.is_empty(), "the modified region must re-encode");
    assert!(
        changed.len() < before.len(),
        "unchanged regions must keep their hashes"
    );

    // The index lists exactly the changed tiles
    let index: serde_json::Value =
        serde_json::from_slice(&blob_store.get("out", "incremental_index.json").unwrap()).unwrap();
    let listed: Vec<String> = index["tiles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["path"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(listed.len(), changed.len());
    for path in &changed {
        assert!(listed.contains(path), "{path} missing from index");
    }
}

/// Flat sheet of `n x n` quads spanning [0,1]^2 at z = 0.5.
fn sheet(n: usize) -> Vec<Triangle> {
    let step = 1.0 / n as f64;
    let mut out = Vec::with_capacity(n * n * 2);
    for y in 0..n {
        for x in 0..n {
            let x0 = x as f64 * step;
            let y0 = y as f64 * step;
            let a = [x0, y0, 0.5];
            let b = [x0 + step, y0, 0.5];
            let c = [x0 + step, y0 + step, 0.5];
            let d = [x0, y0 + step, 0.5];
            out.push(tri(a, b, c));
            out.push(tri(a, c, d));
        }
    }
    out
}

/// `"{level}/{x}_{y}_{z}.{ext}"` -> coordinates.
fn parse_tile_key(key: &str) -> Option<(u32, u32, u32, u32)> {
    let (level, rest) = key.split_once('/')?;
    let name = rest.split_once('.')?.0;
    let mut parts = name.split('_');
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    Some((level.parse().ok()?, x, y, z))
}

/// Blob store that permanently rejects writes for selected tile coords,
/// simulating tiles that can never be stored.
struct FlakyStore {
    inner: MemoryBlobStore,
    rejected: std::sync::atomic::AtomicUsize,
    fail: fn(u32, u32, u32, u32) -> bool,
}

impl FlakyStore {
    fn new(fail: fn(u32, u32, u32, u32) -> bool) -> Self {
        Self {
            inner: MemoryBlobStore::new(),
            rejected: std::sync::atomic::AtomicUsize::new(0),
            fail,
        }
    }

    fn rejected(&self) -> usize {
        self.rejected.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl BlobStore for FlakyStore {
    fn put(
        &self,
        prefix: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cancel: &CancelToken,
    ) -> mesh_tiler::Result<()> {
        if let Some((level, x, y, z)) = parse_tile_key(key) {
            if (self.fail)(level, x, y, z) {
                self.rejected
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                // Permanent rejection: not retryable
                return Err(mesh_tiler::TilerError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "injected tile write rejection",
                )));
            }
        }
        self.inner.put(prefix, key, bytes, content_type, cancel)
    }

    fn get(&self, prefix: &str, key: &str) -> mesh_tiler::Result<Vec<u8>> {
        self.inner.get(prefix, key)
    }

    fn exists(&self, prefix: &str, key: &str) -> mesh_tiler::Result<bool> {
        self.inner.exists(prefix, key)
    }

    fn delete(&self, prefix: &str, key: &str) -> mesh_tiler::Result<()> {
        self.inner.delete(prefix, key)
    }
}

fn flaky_harness(
    triangles: Vec<Triangle>,
    config: SlicingConfig,
    fail: fn(u32, u32, u32, u32) -> bool,
) -> (Arc<MemoryTaskStore>, Arc<FlakyStore>, TilingEngine, u64) {
    let task_store = Arc::new(MemoryTaskStore::new());
    let blob_store = Arc::new(FlakyStore::new(fail));
    let engine = TilingEngine::new(
        Arc::new(StaticLoader(triangles)),
        blob_store.clone(),
        task_store.clone(),
    );
    let task = SlicingTask {
        id: 0,
        name: "flaky".into(),
        source_path: "/mem/model.obj".into(),
        model_type: "obj".into(),
        config,
        output_prefix: "out".into(),
        origin_transform: None,
        status: TaskStatus::Created,
        progress: 0,
        created_by: "tester".into(),
        created_at: 0,
        started_at: None,
        completed_at: None,
        error_message: None,
    };
    let task_id = task_store.create_task(task).unwrap();
    (task_store, blob_store, engine, task_id)
}

/// Scattered failures at level 2: every tile except the `x = 3` column is
/// rejected. Runs are at most 3 long, far below the per-level tolerance,
/// even though the total rejection count is well above it.
fn scattered_failure(level: u32, x: u32, _y: u32, _z: u32) -> bool {
    level == 2 && x != 3
}

/// Twelve consecutive rejections at level 2 (rows y = 0..2 of the z = 0
/// layer, in descriptor order).
fn consecutive_failure(level: u32, _x: u32, y: u32, z: u32) -> bool {
    level == 2 && y < 3 && z == 0
}

#[test]
fn scattered_failures_complete_on_both_dispatch_paths() {
    // Same failure pattern; the small sheet dispatches level 2
    // sequentially, the dense one in parallel.
    for triangles in [sheet(8), sheet(70)] {
        let (task_store, blob_store, engine, task_id) =
            flaky_harness(triangles, config(Strategy::Grid, 2, OutputFormat::Glb), scattered_failure);

        let outcome = engine.run(task_id, &CancelToken::new(), &RunProgress::default());
        assert_eq!(outcome, RunOutcome::Completed);

        // Far more total rejections than any run of consecutive ones
        assert!(blob_store.rejected() > 8, "rejected {}", blob_store.rejected());

        let records = task_store.tile_records(task_id).unwrap();
        let level2: Vec<_> = records.iter().filter(|r| r.coord.level == 2).collect();
        assert!(!level2.is_empty());
        for r in &level2 {
            assert_eq!(r.coord.x, 3, "rejected tile {} must not be recorded", r.coord);
        }
    }
}

#[test]
fn consecutive_failures_fail_the_task_on_both_dispatch_paths() {
    for triangles in [sheet(8), sheet(70)] {
        let (task_store, _blob_store, engine, task_id) = flaky_harness(
            triangles,
            config(Strategy::Grid, 2, OutputFormat::Glb),
            consecutive_failure,
        );

        let outcome = engine.run(task_id, &CancelToken::new(), &RunProgress::default());
        assert_eq!(outcome, RunOutcome::Failed);

        let task = task_store.get_task(task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.is_some());
    }
}

/// Blob store that trips a cancel token after a fixed number of tile puts.
struct CancellingStore {
    inner: MemoryBlobStore,
    token: CancelToken,
    allow: std::sync::atomic::AtomicUsize,
}

impl BlobStore for CancellingStore {
    fn put(
        &self,
        prefix: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cancel: &CancelToken,
    ) -> mesh_tiler::Result<()> {
        use std::sync::atomic::Ordering;
        if self.allow.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            == Err(0)
        {
            self.token.cancel();
        }
        self.inner.put(prefix, key, bytes, content_type, cancel)
    }

    fn get(&self, prefix: &str, key: &str) -> mesh_tiler::Result<Vec<u8>> {
        self.inner.get(prefix, key)
    }

    fn exists(&self, prefix: &str, key: &str) -> mesh_tiler::Result<bool> {
        self.inner.exists(prefix, key)
    }

    fn delete(&self, prefix: &str, key: &str) -> mesh_tiler::Result<()> {
        self.inner.delete(prefix, key)
    }
}

#[test]
fn cancellation_mid_level_leaves_partial_output() {
    let token = CancelToken::new();
    let store = Arc::new(CancellingStore {
        inner: MemoryBlobStore::new(),
        token: token.clone(),
        allow: std::sync::atomic::AtomicUsize::new(2),
    });
    let task_store = Arc::new(MemoryTaskStore::new());

    let mut cfg = config(Strategy::Grid, 2, OutputFormat::B3dm);
    cfg.parallel_count = 1;
    let engine = TilingEngine::new(
        Arc::new(StaticLoader(box_triangles([0.0; 3], [1.0; 3]))),
        store.clone(),
        task_store.clone(),
    );
    let task = SlicingTask {
        id: 0,
        name: "cancel".into(),
        source_path: "/mem/model.obj".into(),
        model_type: "obj".into(),
        config: cfg,
        output_prefix: "out".into(),
        origin_transform: None,
        status: TaskStatus::Created,
        progress: 0,
        created_by: "tester".into(),
        created_at: 0,
        started_at: None,
        completed_at: None,
        error_message: None,
    };
    let task_id = task_store.create_task(task).unwrap();

    let outcome = engine.run(task_id, &token, &RunProgress::default());
    assert_eq!(outcome, RunOutcome::Cancelled);

    let task = task_store.get_task(task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);

    // Already-written tiles remain; the hierarchy documents were never
    // emitted
    assert!(store.inner.len() >= 2);
    assert!(!store.inner.exists("out", "tileset.json").unwrap());
    assert!(!store.inner.exists("out", "incremental_index.json").unwrap());

    // The same task restarts cleanly
    let mut task = task_store.get_task(task_id).unwrap().unwrap();
    task.status = TaskStatus::Created;
    task_store.reset_task(&task).unwrap();
    let outcome = engine.run(task_id, &CancelToken::new(), &RunProgress::default());
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(store.inner.exists("out", "tileset.json").unwrap());
}

#[test]
fn same_input_same_config_is_bit_identical() {
    let build = || {
        let h = harness(
            box_triangles([0.0; 3], [1.0; 3]),
            config(Strategy::Grid, 1, OutputFormat::B3dm),
        );
        assert_eq!(run(&h), RunOutcome::Completed);
        let records = h.task_store.tile_records(h.task_id).unwrap();
        let tileset = h.blob_store.get("out", "tileset.json").unwrap();
        (records, tileset)
    };

    let (records_a, tileset_a) = build();
    let (records_b, tileset_b) = build();

    assert_eq!(records_a.len(), records_b.len());
    for (a, b) in records_a.iter().zip(&records_b) {
        assert_eq!(a.coord, b.coord);
        assert_eq!(a.content_hash, b.content_hash, "hash differs at {}", a.coord);
    }
    assert_eq!(tileset_a, tileset_b, "tileset.json must be bit-identical");
}

#[test]
fn child_bounds_contained_in_parent() {
    let h = harness(
        box_triangles([0.0; 3], [2.0; 3]),
        {
            let mut cfg = config(Strategy::Octree, 2, OutputFormat::Glb);
            cfg.tile_size = 0.5;
            cfg
        },
    );
    assert_eq!(run(&h), RunOutcome::Completed);

    let records = h.task_store.tile_records(h.task_id).unwrap();
    let by_coord: std::collections::HashMap<_, _> =
        records.iter().map(|r| (r.coord, r)).collect();

    for record in &records {
        if let Some(parent_coord) = record.coord.parent() {
            if let Some(parent) = by_coord.get(&parent_coord) {
                let eps = 1e-9;
                for axis in 0..3 {
                    assert!(record.bounds.min[axis] >= parent.bounds.min[axis] - eps);
                    assert!(record.bounds.max[axis] <= parent.bounds.max[axis] + eps);
                }
            }
        }
    }

    // Root level covers the model bounds
    let roots: Vec<_> = records.iter().filter(|r| r.coord.level == 0).collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].bounds.min, [0.0; 3]);
    assert_eq!(roots[0].bounds.max, [2.0; 3]);
}

#[test]
fn gzip_wrapped_payloads_round_trip() {
    let mut cfg = config(Strategy::Grid, 0, OutputFormat::Glb);
    cfg.compression_level = 6;
    let h = harness(box_triangles([0.0; 3], [1.0; 3]), cfg);
    assert_eq!(run(&h), RunOutcome::Completed);

    let records = h.task_store.tile_records(h.task_id).unwrap();
    let payload = h.blob_store.get("out", &records[0].relative_path).unwrap();
    assert_eq!(&payload[0..2], &[0x1F, 0x8B], "gzip magic");

    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(&payload[..]);
    let mut inner = Vec::new();
    decoder.read_to_end(&mut inner).unwrap();
    assert_eq!(&inner[0..4], b"glTF");
}

#[test]
fn transient_blob_failures_are_retried() {
    let h = harness(
        box_triangles([0.0; 3], [1.0; 3]),
        config(Strategy::Grid, 0, OutputFormat::B3dm),
    );
    // Fewer failures than the retry budget: the run still completes
    h.blob_store.inject_failures(2);
    assert_eq!(run(&h), RunOutcome::Completed);
    assert_eq!(h.task_store.tile_records(h.task_id).unwrap().len(), 1);
}

#[test]
fn kdtree_tiles_stay_reachable_from_root() {
    let mut cfg = config(Strategy::KdTree, 3, OutputFormat::Glb);
    cfg.tile_size = 0.4;
    let h = harness(box_triangles([0.0; 3], [1.0; 3]), cfg);
    assert_eq!(run(&h), RunOutcome::Completed);

    let records = h.task_store.tile_records(h.task_id).unwrap();
    assert!(records.iter().any(|r| r.coord.level > 0));

    // Every record's relative path appears somewhere in tileset.json
    let tileset = String::from_utf8(h.blob_store.get("out", "tileset.json").unwrap()).unwrap();
    for record in &records {
        assert!(
            tileset.contains(&record.relative_path),
            "{} not reachable in tileset.json",
            record.relative_path
        );
    }
}

#[test]
fn failed_load_marks_task_failed() {
    struct FailingLoader;
    impl ModelLoader for FailingLoader {
        fn supports(&self, _: &str) -> bool {
            true
        }
        fn load(&self, _: &Path, _: &CancelToken) -> mesh_tiler::Result<LoadedModel> {
            Err(mesh_tiler::TilerError::SourceUnavailable(
                "corrupt header".into(),
            ))
        }
    }

    let task_store = Arc::new(MemoryTaskStore::new());
    let engine = TilingEngine::new(
        Arc::new(FailingLoader),
        Arc::new(MemoryBlobStore::new()),
        task_store.clone(),
    );
    let task = SlicingTask {
        id: 0,
        name: "bad".into(),
        source_path: "/mem/bad.obj".into(),
        model_type: "obj".into(),
        config: config(Strategy::Grid, 0, OutputFormat::B3dm),
        output_prefix: "out".into(),
        origin_transform: None,
        status: TaskStatus::Created,
        progress: 0,
        created_by: "tester".into(),
        created_at: 0,
        started_at: None,
        completed_at: None,
        error_message: None,
    };
    let task_id = task_store.create_task(task).unwrap();

    assert_eq!(
        engine.run(task_id, &CancelToken::new(), &RunProgress::default()),
        RunOutcome::Failed
    );
    let task = task_store.get_task(task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("corrupt header"));
}
