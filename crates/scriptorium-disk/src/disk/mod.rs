//! The disk façade.
//!
//! A [`Disk`] combines one storage backend, the in-memory tree mirror, the
//! index cache and the event fabric. Every mutation follows the same
//! sequence: backend call, then reindex (and cache write), then local
//! events, then remote events. A failed backend call stops the sequence,
//! so listeners never hear about a change that did not happen.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──init()──▶ Ready ──tear_down()──▶ TornDown
//! ```
//!
//! Every public operation awaits `init()` first, so calling it explicitly
//! is optional.

mod batch;
mod ops;
mod remote;

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::Display;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scriptorium_types::{now_ms, AbsPath, DiskEvent, DiskId, EventKind, EventOrigin};

use crate::config::DiskConfig;
use crate::error::{DiskError, DiskResult};
use crate::events::{encode_remote, EventBus, EventSubscription, RemoteHub, Unsubscribe};
use crate::gate::Gate;
use crate::index_cache::{IndexOptions, IndexStore, MemoryIndexStore};
use crate::storage::{MkdirOptions, StorageBackend, StorageError};
use crate::tree::{FileTree, Node, NodeInfo, SharedIter, TreeView};

pub use batch::ReferenceReplacer;

/// Lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DiskPhase {
    Uninitialized,
    Ready,
    TornDown,
}

pub(crate) struct DiskInner {
    id: DiskId,
    /// Distinguishes this instance's envelopes from other instances'.
    instance: String,
    backend: Arc<dyn StorageBackend>,
    index_store: Arc<dyn IndexStore>,
    remote: Arc<RemoteHub>,
    events: EventBus,
    tree: RwLock<Arc<FileTree>>,
    gate: Gate,
    /// Sequences single-item mutations.
    queue: tokio::sync::Mutex<()>,
    ready: OnceCell<()>,
    phase: Mutex<DiskPhase>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
    trash_dir: String,
    index_max_age: Option<Duration>,
    listen_remote: bool,
}

impl Drop for DiskInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A virtual disk. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Disk {
    inner: Arc<DiskInner>,
}

impl std::fmt::Debug for Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disk")
            .field("id", &self.inner.id)
            .field("backend", &self.inner.backend.name())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Disk`].
pub struct DiskBuilder {
    id: DiskId,
    backend: Arc<dyn StorageBackend>,
    index_store: Option<Arc<dyn IndexStore>>,
    remote: Option<Arc<RemoteHub>>,
    trash_dir: String,
    index_max_age: Option<Duration>,
    listen_remote: bool,
    event_capacity: usize,
}

impl DiskBuilder {
    pub fn index_store(mut self, store: Arc<dyn IndexStore>) -> Self {
        self.index_store = Some(store);
        self
    }

    /// Share a hub with other instances of the same disk id.
    pub fn remote_hub(mut self, hub: Arc<RemoteHub>) -> Self {
        self.remote = Some(hub);
        self
    }

    pub fn trash_dir(mut self, name: impl Into<String>) -> Self {
        self.trash_dir = name.into();
        self
    }

    pub fn index_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.index_max_age = max_age;
        self
    }

    pub fn listen_remote(mut self, listen: bool) -> Self {
        self.listen_remote = listen;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Disk {
        let remote = self
            .remote
            .unwrap_or_else(|| Arc::new(RemoteHub::new(self.event_capacity)));
        Disk {
            inner: Arc::new(DiskInner {
                events: EventBus::new(self.id.clone(), self.event_capacity),
                id: self.id,
                instance: uuid::Uuid::new_v4().simple().to_string(),
                backend: self.backend,
                index_store: self
                    .index_store
                    .unwrap_or_else(|| Arc::new(MemoryIndexStore::new()) as Arc<dyn IndexStore>),
                remote,
                tree: RwLock::new(Arc::new(FileTree::new())),
                gate: Gate::new(),
                queue: tokio::sync::Mutex::new(()),
                ready: OnceCell::new(),
                phase: Mutex::new(DiskPhase::Uninitialized),
                shutdown: CancellationToken::new(),
                listener: Mutex::new(None),
                trash_dir: self.trash_dir,
                index_max_age: self.index_max_age,
                listen_remote: self.listen_remote,
            }),
        }
    }
}

impl Disk {
    pub fn builder(id: DiskId, backend: Arc<dyn StorageBackend>) -> DiskBuilder {
        DiskBuilder {
            id,
            backend,
            index_store: None,
            remote: None,
            trash_dir: ".trash".to_string(),
            index_max_age: None,
            listen_remote: true,
            event_capacity: 256,
        }
    }

    /// A disk with default settings.
    pub fn new(id: DiskId, backend: Arc<dyn StorageBackend>) -> Self {
        Self::builder(id, backend).build()
    }

    /// Build backend, index store and disk from configuration.
    pub fn from_config(config: &DiskConfig, remote: Option<Arc<RemoteHub>>) -> DiskResult<Self> {
        let backend = config.build_backend()?;
        let index_store = config.index_cache.build()?;
        let mut builder = Self::builder(config.disk_id(), backend)
            .index_store(index_store)
            .trash_dir(config.trash_dir.clone())
            .index_max_age(config.index_max_age())
            .listen_remote(config.listen_remote)
            .event_capacity(config.event_capacity);
        if let Some(hub) = remote {
            builder = builder.remote_hub(hub);
        }
        Ok(builder.build())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> &DiskId {
        &self.inner.id
    }

    /// This instance's sender id on the remote channel.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    pub fn phase(&self) -> DiskPhase {
        *self.inner.phase.lock()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn remote_hub(&self) -> &Arc<RemoteHub> {
        &self.inner.remote
    }

    pub fn trash_dir(&self) -> &str {
        &self.inner.trash_dir
    }

    /// Absolute path of the trash directory.
    pub fn trash_root(&self) -> AbsPath {
        AbsPath::root().join(&self.inner.trash_dir)
    }

    /// Register a synchronous listener.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Unsubscribe
    where
        F: Fn(&DiskEvent, EventOrigin) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Async listener filtered by subject pattern (`disk.*`).
    pub fn subscribe(&self, pattern: &str) -> EventSubscription {
        self.inner.events.subscribe(pattern)
    }

    /// The current tree mirror. Read-only; mutate through disk operations.
    pub fn file_tree(&self) -> Arc<FileTree> {
        self.inner.tree.read().clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Make sure the backend root exists and the tree is hydrated.
    ///
    /// Idempotent; concurrent callers share one initialization.
    pub async fn init(&self) -> DiskResult<()> {
        if self.phase() == DiskPhase::TornDown {
            return Err(DiskError::TornDown);
        }
        self.inner.ready.get_or_try_init(|| self.bootstrap()).await?;
        Ok(())
    }

    async fn ready(&self) -> DiskResult<()> {
        self.init().await?;
        if self.phase() == DiskPhase::TornDown {
            return Err(DiskError::TornDown);
        }
        Ok(())
    }

    async fn bootstrap(&self) -> DiskResult<()> {
        let started = Instant::now();
        let root = AbsPath::root();
        match self.inner.backend.mkdir(&root, MkdirOptions::recursive()).await {
            Ok(()) | Err(StorageError::AlreadyExists(_)) => {}
            Err(e) => return Err(self.fail("init", &root, e)),
        }

        let hydrated = self.hydrate_from_cache().await;
        if !hydrated {
            self.reindex(IndexOptions::default()).await?;
        }

        if self.inner.listen_remote {
            self.spawn_remote_listener();
        }

        {
            let mut phase = self.inner.phase.lock();
            if *phase == DiskPhase::Uninitialized {
                *phase = DiskPhase::Ready;
            }
        }
        tracing::info!(
            disk_id = %self.inner.id,
            backend = self.inner.backend.name(),
            hydrated,
            nodes = self.file_tree().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "disk ready"
        );
        Ok(())
    }

    /// Install the cached index if there is a fresh one.
    async fn hydrate_from_cache(&self) -> bool {
        let snapshot = match self.inner.index_store.load(&self.inner.id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(disk_id = %self.inner.id, error = %e, "index cache unreadable, rescanning");
                return false;
            }
        };
        if let Some(max_age) = self.inner.index_max_age {
            if snapshot.is_stale(max_age, now_ms()) {
                tracing::debug!(disk_id = %self.inner.id, "cached index is stale");
                return false;
            }
        }
        match FileTree::from_snapshot(&snapshot) {
            Ok(tree) => {
                *self.inner.tree.write() = Arc::new(tree);
                true
            }
            Err(e) => {
                tracing::warn!(disk_id = %self.inner.id, error = %e, "cached index rejected");
                false
            }
        }
    }

    /// Release listeners and stop following remote changes.
    ///
    /// Later operations fail with [`DiskError::TornDown`].
    pub async fn tear_down(&self) {
        {
            let mut phase = self.inner.phase.lock();
            if *phase == DiskPhase::TornDown {
                return;
            }
            *phase = DiskPhase::TornDown;
        }
        self.inner.shutdown.cancel();
        let listener = self.inner.listener.lock().take();
        if let Some(handle) = listener {
            if let Err(e) = handle.await {
                tracing::warn!(disk_id = %self.inner.id, error = %e, "remote listener ended abnormally");
            }
        }
        self.inner.events.clear();
        self.inner.remote.prune();
        tracing::info!(disk_id = %self.inner.id, "disk torn down");
    }

    // ========================================================================
    // Indexing
    // ========================================================================

    /// Rescan storage into a fresh tree and (unless suppressed) persist it.
    pub async fn file_tree_index(&self, opts: IndexOptions) -> DiskResult<()> {
        self.ready().await?;
        let _op = self.inner.queue.lock().await;
        self.reindex(opts).await
    }

    /// Install a pre-built tree instead of scanning.
    pub async fn file_tree_index_with(&self, tree: FileTree, opts: IndexOptions) -> DiskResult<()> {
        self.ready().await?;
        let _op = self.inner.queue.lock().await;
        self.install_tree(tree, opts).await
    }

    async fn reindex(&self, opts: IndexOptions) -> DiskResult<()> {
        let started = Instant::now();
        let tree = self.scan().await?;
        let nodes = tree.len();
        self.install_tree(tree, opts).await?;
        tracing::debug!(
            disk_id = %self.inner.id,
            nodes,
            persist = opts.persist,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reindexed"
        );
        Ok(())
    }

    /// Walk the backend, one `list` per directory.
    async fn scan(&self) -> DiskResult<FileTree> {
        let mut tree = FileTree::new();
        let mut pending = vec![(tree.root(), AbsPath::root())];
        while let Some((dir, path)) = pending.pop() {
            let entries = self
                .inner
                .backend
                .list(&path)
                .await
                .map_err(|e| self.fail("list", &path, e))?;
            let ids = tree.replace_children(dir, entries.into_iter().map(|e| (e.name, e.kind)))?;
            for id in ids {
                if let Some(node) = tree.get(id).filter(|n| n.is_dir()) {
                    pending.push((id, node.path().clone()));
                }
            }
        }
        Ok(tree)
    }

    async fn install_tree(&self, mut tree: FileTree, opts: IndexOptions) -> DiskResult<()> {
        let previous = self.file_tree();
        carry_over(&previous, &mut tree);

        let snapshot = opts.persist.then(|| tree.to_snapshot());
        *self.inner.tree.write() = Arc::new(tree);

        if let Some(snapshot) = snapshot {
            self.inner
                .index_store
                .save(&self.inner.id, &snapshot)
                .await
                .map_err(|e| {
                    tracing::warn!(disk_id = %self.inner.id, error = %e, "index cache write failed");
                    DiskError::from(e)
                })?;
        }
        Ok(())
    }

    fn update_tree<R>(&self, f: impl FnOnce(&mut FileTree) -> R) -> R {
        let mut guard = self.inner.tree.write();
        f(Arc::make_mut(&mut guard))
    }

    // ========================================================================
    // Emission
    // ========================================================================

    /// Local listeners first, then other instances.
    fn publish(&self, event: DiskEvent) {
        self.emit_local(&event, EventOrigin::Local);
        match encode_remote(&self.inner.id, &self.inner.instance, &event) {
            Ok(envelope) => {
                let listeners = self.inner.remote.publish(envelope);
                tracing::trace!(disk_id = %self.inner.id, subject = event.subject(), listeners, "published remote");
            }
            Err(e) => {
                tracing::warn!(disk_id = %self.inner.id, error = %e, "failed to encode remote event");
            }
        }
    }

    /// The event itself, then its index companion.
    fn emit_local(&self, event: &DiskEvent, origin: EventOrigin) {
        self.inner.events.emit(event, origin);
        if let Some(change) = event.to_index_change() {
            self.inner.events.emit(&DiskEvent::index(change), origin);
        }
    }

    fn fail(&self, op: &'static str, path: &AbsPath, err: StorageError) -> DiskError {
        tracing::warn!(disk_id = %self.inner.id, op, path = %path, error = %err, "storage operation failed");
        err.into()
    }

    // ========================================================================
    // Read API
    // ========================================================================

    pub async fn node_from_path(&self, path: impl Into<AbsPath>) -> DiskResult<Option<NodeInfo>> {
        self.ready().await?;
        let tree = self.file_tree();
        Ok(tree.node_from_path(&path.into()).and_then(|id| tree.info(id)))
    }

    /// Every node except the root, pre-order.
    pub async fn all(&self) -> DiskResult<Vec<NodeInfo>> {
        self.ready().await?;
        Ok(self.file_tree().all())
    }

    /// Lazy pre-order sequence over the current tree.
    pub async fn iterate(&self) -> DiskResult<SharedIter> {
        self.ready().await?;
        Ok(SharedIter::new(self.file_tree()))
    }

    /// Lazy sequence of nodes passing `filter`.
    pub async fn iterate_where<F>(&self, filter: F) -> DiskResult<SharedIter>
    where
        F: FnMut(&Node) -> bool + Send + 'static,
    {
        Ok(self.iterate().await?.with_filter(filter))
    }

    /// A filtered copy of the tree.
    pub async fn tree_view(&self, view: TreeView) -> DiskResult<FileTree> {
        self.ready().await?;
        Ok(self.file_tree().view(view, &self.inner.trash_dir))
    }

    /// File contents; virtual files return their in-memory content.
    pub async fn read_file(&self, path: impl Into<AbsPath>) -> DiskResult<Vec<u8>> {
        self.ready().await?;
        let path = path.into();
        let tree = self.file_tree();
        if let Some(node) = tree.node(&path).filter(|n| n.is_virtual()) {
            return Ok(node.virtual_content().unwrap_or_default().as_bytes().to_vec());
        }
        self.inner
            .backend
            .read(&path)
            .await
            .map_err(|e| self.fail("read", &path, e))
    }

    /// File contents as UTF-8.
    pub async fn read_text(&self, path: impl Into<AbsPath>) -> DiskResult<String> {
        let path = path.into();
        let bytes = self.read_file(path.clone()).await?;
        String::from_utf8(bytes)
            .map_err(|_| DiskError::invalid_operation(format!("{path} is not valid UTF-8")))
    }
}

/// Keep instance-only state across a rescan: virtual nodes that storage
/// does not have yet, and `source` markers of nodes that still exist.
fn carry_over(previous: &FileTree, next: &mut FileTree) {
    for info in previous.virtual_nodes() {
        if next.contains(&info.path) {
            continue;
        }
        let content = info.virtual_content.unwrap_or_default();
        if let Err(e) = next.insert_virtual(&info.path, content, info.source) {
            tracing::debug!(path = %info.path, error = %e, "dropped virtual node");
        }
    }

    let sources: Vec<(AbsPath, AbsPath)> = previous
        .iter()
        .filter(|(_, n)| !n.is_virtual())
        .filter_map(|(_, n)| n.source().map(|s| (n.path().clone(), s.clone())))
        .collect();
    for (path, source) in sources {
        if next.contains(&path) {
            let _ = next.set_source(&path, Some(source));
        }
    }
}
