pub mod local;
pub mod memory;
pub mod task_store;

pub use local::LocalFsStore;
pub use memory::MemoryBlobStore;
pub use task_store::{MemoryTaskStore, TaskStore};

use crate::cancel::CancelToken;
use crate::error::Result;

/// Blob persistence collaborator.
///
/// For local-filesystem mode `prefix` is the absolute output prefix and
/// `key` a relative path under it; for object stores `prefix` names the
/// bucket/prefix. Implementations are blocking; the engine owns retry and
/// backoff and never holds locks across a call.
pub trait BlobStore: Send + Sync {
    fn put(
        &self,
        prefix: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cancel: &CancelToken,
    ) -> Result<()>;

    fn get(&self, prefix: &str, key: &str) -> Result<Vec<u8>>;

    fn exists(&self, prefix: &str, key: &str) -> Result<bool>;

    fn delete(&self, prefix: &str, key: &str) -> Result<()>;
}
