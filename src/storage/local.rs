use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{Result, TilerError};
use crate::storage::BlobStore;

/// Filesystem-backed blob store.
///
/// Writes go through a temp file and rename, so a document (notably
/// `tileset.json`) is replaced atomically and readers never observe a
/// partial write. Failures surface as `TransientIo` for the engine's
/// retry loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFsStore;

impl LocalFsStore {
    fn resolve(prefix: &str, key: &str) -> PathBuf {
        Path::new(prefix).join(key)
    }
}

impl BlobStore for LocalFsStore {
    fn put(
        &self,
        prefix: &str,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        let path = Self::resolve(prefix, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| TilerError::TransientIo(format!("mkdir {}: {e}", parent.display())))?;
        }

        // Write-then-rename keeps the destination atomic.
        let tmp = path.with_extension("tmp-write");
        fs::write(&tmp, bytes)
            .map_err(|e| TilerError::TransientIo(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| TilerError::TransientIo(format!("rename to {}: {e}", path.display())))?;

        debug!(key, bytes = bytes.len(), "blob written");
        Ok(())
    }

    fn get(&self, prefix: &str, key: &str) -> Result<Vec<u8>> {
        let path = Self::resolve(prefix, key);
        fs::read(&path).map_err(|e| TilerError::TransientIo(format!("read {}: {e}", path.display())))
    }

    fn exists(&self, prefix: &str, key: &str) -> Result<bool> {
        Ok(Self::resolve(prefix, key).exists())
    }

    fn delete(&self, prefix: &str, key: &str) -> Result<()> {
        let path = Self::resolve(prefix, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TilerError::TransientIo(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }
}
