pub mod cancel;
pub mod codec;
pub mod config;
pub mod culling;
pub mod error;
pub mod generate;
pub mod ingestion;
pub mod orchestrate;
pub mod partition;
pub mod pipeline;
pub mod spatial;
pub mod storage;
pub mod tiling;
pub mod types;

pub use cancel::CancelToken;
pub use config::{OutputFormat, SlicingConfig, StorageLocation, Strategy, TaskRequest};
pub use error::{Result, TilerError};
pub use orchestrate::TaskOrchestrator;
pub use pipeline::Pipeline;
