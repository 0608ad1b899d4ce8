use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gltf::binary::Glb;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::codec::BuiltinTextureCodec;
use crate::config::{OutputFormat, TaskRequest};
use crate::error::{Result, TilerError};
use crate::generate::b3dm::B3dmLayout;
use crate::ingestion::{MeshLoader, ModelLoader};
use crate::orchestrate::TaskOrchestrator;
use crate::storage::{LocalFsStore, MemoryBlobStore, MemoryTaskStore, TaskStore};
use crate::types::task::TaskStatus;

/// Identity the CLI submits tasks under.
const CLI_USER: &str = "cli";

/// Ceiling for one CLI-driven run.
const RUN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Summary of a completed pipeline run.
#[derive(Debug)]
pub struct ProcessingResult {
    pub task_id: u64,
    pub status: TaskStatus,
    pub tile_count: usize,
    pub output_prefix: String,
    pub duration: Duration,
}

/// Options beyond the task request itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunOptions {
    pub dry_run: bool,
    pub validate: bool,
}

/// Binary-level driver: wires the built-in collaborators into an
/// orchestrator, submits one task, and follows it to a terminal state.
pub struct Pipeline;

impl Pipeline {
    pub fn run(request: &TaskRequest, options: RunOptions) -> Result<ProcessingResult> {
        let start = Instant::now();
        info!(source = %request.source_model_path, "Starting pipeline");

        if options.dry_run {
            info!("--dry-run: scanning input only");
            let model = MeshLoader.load(
                Path::new(&request.source_model_path),
                &CancelToken::new(),
            )?;
            print_dry_run_summary(&model.stats, &model.bounds);
            return Ok(ProcessingResult {
                task_id: 0,
                status: TaskStatus::Completed,
                tile_count: 0,
                output_prefix: String::new(),
                duration: start.elapsed(),
            });
        }

        let task_store = Arc::new(MemoryTaskStore::new());
        let orchestrator = TaskOrchestrator::new(
            Arc::new(MeshLoader),
            task_store.clone(),
            Arc::new(LocalFsStore),
            Arc::new(MemoryBlobStore::new()),
            1,
        )
        .with_texture_codec(Arc::new(BuiltinTextureCodec));

        let task_id = orchestrator.create_task(request, CLI_USER)?;
        orchestrator.start(task_id)?;

        let mut last_progress = 0u8;
        let status = loop {
            let report = orchestrator.get_progress(task_id)?;
            if report.progress != last_progress {
                info!(
                    progress = report.progress,
                    stage = %report.current_stage,
                    tiles = report.processed_tiles,
                    eta = ?report.estimated_time_remaining_seconds,
                    "progress"
                );
                last_progress = report.progress;
            }
            if report.status.is_terminal() {
                break report.status;
            }
            if start.elapsed() > RUN_TIMEOUT {
                orchestrator.cancel(task_id, CLI_USER)?;
                break orchestrator.wait(task_id, Duration::from_secs(60))?;
            }
            std::thread::sleep(Duration::from_millis(100));
        };

        let task = orchestrator
            .task(task_id)?
            .ok_or_else(|| TilerError::InvalidRequest(format!("no task {task_id}")))?;
        if status == TaskStatus::Failed {
            return Err(TilerError::SourceUnavailable(
                task.error_message
                    .unwrap_or_else(|| "task failed without diagnostic".into()),
            ));
        }

        let tile_count = task_store
            .tile_records(task_id)
            .map(|r| r.len())
            .unwrap_or(0);

        if options.validate && status == TaskStatus::Completed {
            info!("Validating tileset");
            validate_tileset(
                Path::new(&task.output_prefix),
                request.slicing_config.output_format,
                request.slicing_config.compression_level > 0,
            )?;
        }

        let duration = start.elapsed();
        info!(tiles = tile_count, elapsed = ?duration, status = %status, "Pipeline finished");

        Ok(ProcessingResult {
            task_id,
            status,
            tile_count,
            output_prefix: task.output_prefix,
            duration,
        })
    }
}

/// Walk the emitted tileset: structure, monotone geometric error, content
/// payloads present and parseable.
pub fn validate_tileset(out_dir: &Path, format: OutputFormat, gzipped: bool) -> Result<()> {
    let tileset_path = out_dir.join("tileset.json");
    let json_str = std::fs::read_to_string(&tileset_path).map_err(|e| {
        TilerError::InvalidRequest(format!("cannot read {}: {e}", tileset_path.display()))
    })?;
    let tileset: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| TilerError::InvalidRequest(format!("tileset.json is not valid JSON: {e}")))?;

    let version = tileset
        .pointer("/asset/version")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if version != "1.1" {
        return Err(TilerError::InvalidRequest(format!(
            "expected asset.version 1.1, got '{version}'"
        )));
    }

    let root = tileset
        .get("root")
        .ok_or_else(|| TilerError::InvalidRequest("missing root tile".into()))?;

    let mut tile_count = 0;
    let mut content_count = 0;
    let mut errors = Vec::new();
    validate_tile(
        root,
        out_dir,
        format,
        gzipped,
        None,
        &mut tile_count,
        &mut content_count,
        &mut errors,
    );

    for err in &errors {
        warn!("Validation: {err}");
    }
    if let Some(first) = errors.first() {
        return Err(TilerError::InvalidRequest(format!(
            "{} issues found: {first}",
            errors.len()
        )));
    }
    info!(tiles = tile_count, payloads = content_count, "Validation passed");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn validate_tile(
    tile: &serde_json::Value,
    out_dir: &Path,
    format: OutputFormat,
    gzipped: bool,
    parent_error: Option<f64>,
    tile_count: &mut usize,
    content_count: &mut usize,
    errors: &mut Vec<String>,
) {
    *tile_count += 1;

    if tile.get("boundingVolume").is_none() {
        errors.push(format!("tile {tile_count}: missing boundingVolume"));
    }

    let geo_error = tile
        .get("geometricError")
        .and_then(|v| v.as_f64())
        .unwrap_or(-1.0);
    if geo_error < 0.0 {
        errors.push(format!("tile {tile_count}: invalid geometricError {geo_error}"));
    }
    if let Some(parent) = parent_error {
        if geo_error > parent + 1e-6 {
            errors.push(format!(
                "tile {tile_count}: geometricError {geo_error} > parent {parent}"
            ));
        }
    }

    if let Some(uri) = tile.pointer("/content/uri").and_then(|u| u.as_str()) {
        let payload_path = out_dir.join(uri);
        match std::fs::read(&payload_path) {
            Ok(data) => {
                *content_count += 1;
                if !gzipped && !payload_parses(&data, format) {
                    errors.push(format!("tile {tile_count}: payload not parseable: {uri}"));
                }
            }
            Err(e) => {
                errors.push(format!("tile {tile_count}: cannot read {uri}: {e}"));
            }
        }
    }

    if let Some(children) = tile.get("children").and_then(|c| c.as_array()) {
        for child in children {
            validate_tile(
                child,
                out_dir,
                format,
                gzipped,
                Some(geo_error),
                tile_count,
                content_count,
                errors,
            );
        }
    }
}

fn payload_parses(data: &[u8], format: OutputFormat) -> bool {
    match format {
        OutputFormat::Glb => Glb::from_slice(data).is_ok(),
        OutputFormat::Gltf => serde_json::from_slice::<serde_json::Value>(data).is_ok(),
        OutputFormat::B3dm => {
            B3dmLayout::parse(data).is_some_and(|(_, inner)| Glb::from_slice(inner).is_ok())
        }
        OutputFormat::Pnts => data.len() >= 28 && &data[0..4] == b"pnts",
    }
}

/// Print dry-run statistics.
fn print_dry_run_summary(
    stats: &crate::ingestion::LoadStats,
    bounds: &crate::types::geometry::BoundingBox,
) {
    println!("=== Dry Run Summary ===");
    println!("  Format:    {}", stats.input_format);
    println!("  Vertices:  {}", stats.total_vertices);
    println!("  Triangles: {}", stats.total_triangles);
    println!("  Dropped:   {}", stats.dropped_triangles);
    println!("  Normals:   {}", if stats.has_normals { "yes" } else { "no" });
    println!("  UVs:       {}", if stats.has_uvs { "yes" } else { "no" });
    println!("  Materials: {}", stats.material_count);
    println!("  Textures:  {}", stats.texture_count);
    println!(
        "  Bounds:    ({:.3}, {:.3}, {:.3}) -> ({:.3}, {:.3}, {:.3})",
        bounds.min[0], bounds.min[1], bounds.min[2], bounds.max[0], bounds.max[1], bounds.max[2]
    );
    println!("  Diagonal:  {:.3}", bounds.diagonal());
}
