//! Instrumentation decorator.
//!
//! Wraps any backend with one `tracing` span per call and an in-flight
//! counter that progress UIs can watch.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

use scriptorium_types::AbsPath;

use super::error::StorageResult;
use super::ops::StorageBackend;
use super::types::{DirEntry, MkdirOptions, Stat, WriteOptions};

/// Backend decorator that traces every call.
pub struct TracedBackend {
    inner: Arc<dyn StorageBackend>,
    in_flight: watch::Sender<usize>,
}

impl std::fmt::Debug for TracedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedBackend")
            .field("inner", &self.inner.name())
            .field("in_flight", &*self.in_flight.borrow())
            .finish()
    }
}

/// Decrements the in-flight count when the call finishes (or is dropped).
struct InFlight<'a>(&'a watch::Sender<usize>);

impl<'a> InFlight<'a> {
    fn enter(tx: &'a watch::Sender<usize>) -> Self {
        tx.send_modify(|n| *n += 1);
        Self(tx)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl TracedBackend {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self { inner, in_flight }
    }

    /// Number of calls currently running.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Watch the in-flight count (busy indicator).
    pub fn watch_in_flight(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    async fn traced<T, F>(&self, op: &'static str, path: &AbsPath, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        let _guard = InFlight::enter(&self.in_flight);
        let span = tracing::debug_span!("storage", backend = self.inner.name(), op, path = %path);
        let result = fut.instrument(span).await;
        if let Err(e) = &result {
            tracing::warn!(backend = self.inner.name(), op, path = %path, error = %e, "storage call failed");
        }
        result
    }
}

#[async_trait]
impl StorageBackend for TracedBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn list(&self, path: &AbsPath) -> StorageResult<Vec<DirEntry>> {
        self.traced("list", path, self.inner.list(path)).await
    }

    async fn stat(&self, path: &AbsPath) -> StorageResult<Stat> {
        self.traced("stat", path, self.inner.stat(path)).await
    }

    async fn read(&self, path: &AbsPath) -> StorageResult<Vec<u8>> {
        self.traced("read", path, self.inner.read(path)).await
    }

    async fn write(&self, path: &AbsPath, data: &[u8], opts: WriteOptions) -> StorageResult<()> {
        self.traced("write", path, self.inner.write(path, data, opts))
            .await
    }

    async fn mkdir(&self, path: &AbsPath, opts: MkdirOptions) -> StorageResult<()> {
        self.traced("mkdir", path, self.inner.mkdir(path, opts)).await
    }

    async fn rename(&self, from: &AbsPath, to: &AbsPath) -> StorageResult<()> {
        self.traced("rename", from, self.inner.rename(from, to)).await
    }

    async fn delete(&self, path: &AbsPath) -> StorageResult<()> {
        self.traced("delete", path, self.inner.delete(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backends::MemoryBackend;
    use crate::storage::error::StorageError;

    #[tokio::test]
    async fn test_passes_through_and_settles() {
        let traced = TracedBackend::new(Arc::new(MemoryBackend::new()));
        let path = AbsPath::new("/a.md");

        traced.write(&path, b"x", WriteOptions::default()).await.unwrap();
        assert_eq!(traced.read(&path).await.unwrap(), b"x");
        assert_eq!(traced.name(), "memory");
        assert_eq!(traced.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_counter_settles_after_error() {
        let traced = TracedBackend::new(Arc::new(MemoryBackend::new()));
        let rx = traced.watch_in_flight();
        let result = traced.read(&AbsPath::new("/missing.md")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert_eq!(*rx.borrow(), 0);
    }
}
