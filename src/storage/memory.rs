use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cancel::CancelToken;
use crate::error::{Result, TilerError};
use crate::storage::BlobStore;

/// In-memory blob store: the object-store stand-in used by tests and by
/// object-store storage resolution when no real backend is wired in.
///
/// `inject_failures` makes the next N puts fail with `TransientIo`, which
/// is how the engine's retry path gets exercised.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    put_count: AtomicUsize,
    failures_remaining: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(prefix: &str, key: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), key)
    }

    /// Total successful puts so far.
    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::Relaxed)
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob map lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .lock()
            .expect("blob map lock")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Fail the next `n` puts with `TransientIo`.
    pub fn inject_failures(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(
        &self,
        prefix: &str,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TilerError::TransientIo("injected failure".into()));
        }
        self.blobs
            .lock()
            .expect("blob map lock")
            .insert(Self::full_key(prefix, key), bytes.to_vec());
        self.put_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, prefix: &str, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .expect("blob map lock")
            .get(&Self::full_key(prefix, key))
            .cloned()
            .ok_or_else(|| TilerError::TransientIo(format!("no blob at {prefix}/{key}")))
    }

    fn exists(&self, prefix: &str, key: &str) -> Result<bool> {
        Ok(self
            .blobs
            .lock()
            .expect("blob map lock")
            .contains_key(&Self::full_key(prefix, key)))
    }

    fn delete(&self, prefix: &str, key: &str) -> Result<()> {
        self.blobs
            .lock()
            .expect("blob map lock")
            .remove(&Self::full_key(prefix, key));
        Ok(())
    }
}
