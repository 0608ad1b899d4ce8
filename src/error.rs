use std::io;

/// All error kinds for the mesh-tiler pipeline.
///
/// Geometry and per-tile encode errors are recovered inside the engine;
/// source and I/O errors propagate to the task status. Nothing here is
/// raised past the orchestrator boundary.
#[derive(thiserror::Error, Debug)]
pub enum TilerError {
    /// Malformed config, bad path, out-of-range levels. Rejected before the
    /// engine ever sees the task.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The loader cannot open or parse the source model.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),
    /// A single triangle failed validation (NaN/Inf or degenerate area).
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
    /// A tile generator could not produce bytes.
    #[error("Encode error: {0}")]
    Encode(String),
    /// A single tile payload exceeded the configured byte ceiling.
    #[error("Tile payload too large: {size} bytes (ceiling {ceiling})")]
    Oversize { size: usize, ceiling: usize },
    /// Retryable storage failure; the engine retries with backoff.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),
    /// Concurrent mutation of a task detected by the task store.
    #[error("Store conflict: {0}")]
    StoreConflict(String),
    /// User-initiated stop. A terminal state, not a failure.
    #[error("Cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TilerError>;
