pub mod engine;
pub mod simplifier;
pub mod tileset_writer;

pub use engine::{RunOutcome, RunProgress, TilingEngine};
