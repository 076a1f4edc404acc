//! End-to-end disk behaviour over in-memory and host-directory storage.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use scriptorium_disk::{
    same_shape, AbsPath, BackendConfig, DirEntry, Disk, DiskConfig, DiskError, DiskEvent, DiskId,
    DiskPhase, EventKind, IndexCacheConfig, IndexChange, IndexOptions, IndexStore, MemoryBackend,
    MemoryIndexStore, MkdirOptions, NoIndexStore, NodeType, Stat, StorageBackend, StorageError,
    StorageResult, TreeView, WriteOptions,
};

/// Counts calls that reach storage.
#[derive(Default)]
struct CountingBackend {
    inner: MemoryBackend,
    lists: AtomicUsize,
    stats: AtomicUsize,
    writes: AtomicUsize,
    mkdirs: AtomicUsize,
    renames: AtomicUsize,
    deletes: AtomicUsize,
    refuse_renames: AtomicBool,
}

impl CountingBackend {
    fn mutations(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
            + self.mkdirs.load(Ordering::SeqCst)
            + self.renames.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.mutations() + self.lists.load(Ordering::SeqCst) + self.stats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn list(&self, path: &AbsPath) -> StorageResult<Vec<DirEntry>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(path).await
    }

    async fn stat(&self, path: &AbsPath) -> StorageResult<Stat> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        self.inner.stat(path).await
    }

    async fn read(&self, path: &AbsPath) -> StorageResult<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &AbsPath, data: &[u8], opts: WriteOptions) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(path, data, opts).await
    }

    async fn mkdir(&self, path: &AbsPath, opts: MkdirOptions) -> StorageResult<()> {
        self.mkdirs.fetch_add(1, Ordering::SeqCst);
        self.inner.mkdir(path, opts).await
    }

    async fn rename(&self, from: &AbsPath, to: &AbsPath) -> StorageResult<()> {
        self.renames.fetch_add(1, Ordering::SeqCst);
        if self.refuse_renames.load(Ordering::SeqCst) {
            return Err(StorageError::other("rename refused"));
        }
        self.inner.rename(from, to).await
    }

    async fn delete(&self, path: &AbsPath) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(path).await
    }
}

fn memory_disk(name: &str) -> Disk {
    scriptorium_disk::telemetry::try_init_for_tests();
    Disk::builder(DiskId::from_string(name), Arc::new(MemoryBackend::new()))
        .listen_remote(false)
        .build()
}

fn counting_disk(name: &str) -> (Disk, Arc<CountingBackend>) {
    scriptorium_disk::telemetry::try_init_for_tests();
    let backend = Arc::new(CountingBackend::default());
    let disk = Disk::builder(DiskId::from_string(name), backend.clone())
        .listen_remote(false)
        .build();
    (disk, backend)
}

#[tokio::test]
async fn test_nested_create_makes_parents() {
    let disk = memory_disk("nested");
    let path = disk.new_file("/a/b/c.md", "# c").await.unwrap();
    assert_eq!(path.as_str(), "/a/b/c.md");

    for dir in ["/a", "/a/b"] {
        let node = disk.node_from_path(dir).await.unwrap().unwrap();
        assert_eq!(node.kind, NodeType::Directory, "{dir}");
    }
    let b = disk.node_from_path("/a/b").await.unwrap().unwrap();
    assert_eq!(b.children, vec![AbsPath::new("/a/b/c.md")]);
}

#[tokio::test]
async fn test_duplicate_create_lands_on_incremented_path() {
    let disk = memory_disk("dupes");
    let first = disk.new_file("/note.md", "first").await.unwrap();
    let second = disk.new_file("/note.md", "second").await.unwrap();

    assert_eq!(first.as_str(), "/note.md");
    assert_eq!(second.as_str(), "/note-1.md");
    assert_eq!(disk.read_text("/note.md").await.unwrap(), "first");
    assert_eq!(disk.read_text("/note-1.md").await.unwrap(), "second");
}

#[tokio::test]
async fn test_rename_to_self_touches_nothing() {
    let (disk, backend) = counting_disk("noop");
    disk.new_file("/draft.md", "x").await.unwrap();
    let mut sub = disk.subscribe("disk.>");
    let before = backend.calls();

    let payload = disk.rename_dir_or_file("/draft.md", "/draft.md", None).await.unwrap();

    assert!(payload.is_noop());
    assert_eq!(payload.old_path, payload.new_path);
    assert_eq!(payload.file_type, NodeType::File);
    assert_eq!(backend.calls(), before);
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_second_delete_is_not_found_without_event() {
    let disk = memory_disk("deletes");
    disk.new_file("/x.md", "").await.unwrap();

    let deletes = Arc::new(AtomicUsize::new(0));
    let counter = deletes.clone();
    let _sub = disk.on(EventKind::Delete, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    disk.remove_file("/x.md").await.unwrap();
    let err = disk.remove_file("/x.md").await.unwrap_err();

    assert!(err.is_not_found(), "{err}");
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_move_into_descendant_rejected_before_storage() {
    let (disk, backend) = counting_disk("ancestor");
    disk.new_file("/a/b/c.md", "").await.unwrap();
    let before = backend.calls();

    let err = disk.rename_dir_or_file("/a", "/a/b/a", None).await.unwrap_err();

    assert!(matches!(err, DiskError::InvalidOperation(_)));
    assert_eq!(backend.calls(), before);
    assert!(disk.node_from_path("/a/b/c.md").await.unwrap().is_some());
}

#[tokio::test]
async fn test_failed_mutation_keeps_tree_and_stays_quiet() {
    let disk = memory_disk("failures");
    disk.new_file("/keep.md", "").await.unwrap();
    let shape = disk.file_tree().shape();
    let mut sub = disk.subscribe("disk.>");

    assert!(disk.rename_dir_or_file("/missing.md", "/other.md", None).await.is_err());
    assert!(disk.remove_file("/missing.md").await.is_err());

    assert_eq!(disk.file_tree().shape(), shape);
    assert!(sub.try_recv().is_none());
}

/// A fresh disk scanned from `backend`.
async fn rescan(backend: Arc<dyn StorageBackend>) -> Disk {
    let fresh = Disk::builder(DiskId::from_string("rescan"), backend)
        .index_store(Arc::new(NoIndexStore))
        .listen_remote(false)
        .build();
    fresh.init().await.unwrap();
    fresh
}

#[tokio::test]
async fn test_rename_with_kind_checks_source_first() {
    let (disk, backend) = counting_disk("missing-source");
    disk.new_file("/keep.md", "").await.unwrap();
    let shape = disk.file_tree().shape();
    let mutations = backend.mutations();

    let err = disk
        .rename_dir_or_file("/missing.md", "/new/deep/x.md", Some(NodeType::File))
        .await
        .unwrap_err();

    assert!(err.is_not_found(), "{err}");
    assert_eq!(backend.mutations(), mutations);
    assert!(!backend.exists(&AbsPath::new("/new")).await.unwrap());
    assert_eq!(disk.file_tree().shape(), shape);
    assert_eq!(rescan(backend).await.file_tree().shape(), shape);
}

#[tokio::test]
async fn test_failed_rename_removes_parents_it_created() {
    let (disk, backend) = counting_disk("refused");
    disk.new_file("/src.md", "body").await.unwrap();
    disk.new_dir("/x").await.unwrap();
    let shape = disk.file_tree().shape();
    let mut sub = disk.subscribe("disk.>");

    backend.refuse_renames.store(true, Ordering::SeqCst);
    let err = disk
        .rename_dir_or_file("/src.md", "/x/y/z/src.md", Some(NodeType::File))
        .await
        .unwrap_err();

    assert!(matches!(err, DiskError::Storage(StorageError::Other(_))), "{err}");
    assert!(backend.exists(&AbsPath::new("/x")).await.unwrap());
    assert!(!backend.exists(&AbsPath::new("/x/y")).await.unwrap());
    assert_eq!(disk.file_tree().shape(), shape);
    assert_eq!(rescan(backend).await.file_tree().shape(), shape);
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_tree_and_cache_converge() {
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let store = Arc::new(MemoryIndexStore::new());
    let id = DiskId::from_string("converge");
    let disk = Disk::builder(id.clone(), backend.clone())
        .index_store(store.clone())
        .listen_remote(false)
        .build();

    disk.new_file("/a/one.md", "1").await.unwrap();
    disk.new_dir("/b").await.unwrap();
    disk.rename_dir_or_file("/a/one.md", "/b/one.md", None).await.unwrap();
    disk.new_files([("/c.png", "p"), ("/c.png", "q")]).await.unwrap();
    disk.remove_file("/a").await.unwrap();
    disk.trash("/b/one.md").await.unwrap();

    // A fresh scan of the same storage
    let fresh = Disk::builder(id.clone(), backend)
        .index_store(Arc::new(NoIndexStore))
        .listen_remote(false)
        .build();
    fresh.init().await.unwrap();
    assert!(same_shape(&disk.file_tree(), &fresh.file_tree()));

    let cached = store.load(&id).await.unwrap().unwrap();
    assert_eq!(cached.shape(), disk.file_tree().shape());
}

#[tokio::test]
async fn test_init_hydrates_from_cache_without_listing() {
    let store: Arc<dyn IndexStore> = Arc::new(MemoryIndexStore::new());
    let backend = Arc::new(CountingBackend::default());
    let id = DiskId::from_string("hydrate");

    let writer = Disk::builder(id.clone(), backend.clone())
        .index_store(store.clone())
        .listen_remote(false)
        .build();
    writer.new_file("/docs/readme.md", "hi").await.unwrap();

    let lists = backend.lists.load(Ordering::SeqCst);
    let reader = Disk::builder(id, backend.clone())
        .index_store(store)
        .listen_remote(false)
        .build();
    reader.init().await.unwrap();

    assert_eq!(backend.lists.load(Ordering::SeqCst), lists);
    assert!(reader.node_from_path("/docs/readme.md").await.unwrap().is_some());
}

#[tokio::test]
async fn test_suppressed_index_is_not_persisted() {
    let store = Arc::new(MemoryIndexStore::new());
    let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let id = DiskId::from_string("quiet");
    let disk = Disk::builder(id.clone(), backend.clone())
        .index_store(store.clone())
        .listen_remote(false)
        .build();
    disk.init().await.unwrap();
    store.clear(&id).await.unwrap();

    backend.write_recursive(&AbsPath::new("/side.md"), b"x").await.unwrap();
    disk.file_tree_index(IndexOptions::no_persist()).await.unwrap();

    assert!(disk.node_from_path("/side.md").await.unwrap().is_some());
    assert!(store.load(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_events_arrive_structural_then_index() {
    let disk = memory_disk("order");
    let mut sub = disk.subscribe("disk.>");

    disk.new_file("/a.md", "").await.unwrap();

    let first = sub.recv().await.unwrap();
    let second = sub.recv().await.unwrap();
    assert_eq!(first.subject, "disk.create");
    assert!(first.is_local());
    match second.event {
        DiskEvent::Index { change: IndexChange::Create(payload) } => {
            assert_eq!(payload.file_paths, vec![AbsPath::new("/a.md")]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_trash_round_trip() {
    let disk = memory_disk("trash");
    disk.new_file("/notes/todo.md", "- [ ] x").await.unwrap();

    let trashed = disk.trash("/notes/todo.md").await.unwrap();
    assert_eq!(trashed.new_path.as_str(), "/.trash/notes/todo.md");

    let visible = disk.tree_view(TreeView::HideTrash).await.unwrap();
    assert!(visible.node(&AbsPath::new("/notes/todo.md")).is_none());
    assert!(visible.node(&AbsPath::new("/.trash")).is_none());

    let bin = disk.tree_view(TreeView::TrashOnly).await.unwrap();
    assert!(bin.node(&AbsPath::new("/.trash/notes/todo.md")).is_some());

    let restored = disk.untrash("/.trash/notes/todo.md").await.unwrap();
    assert_eq!(restored.new_path.as_str(), "/notes/todo.md");
    assert_eq!(disk.read_text("/notes/todo.md").await.unwrap(), "- [ ] x");

    let err = disk.untrash("/notes/todo.md").await.unwrap_err();
    assert!(matches!(err, DiskError::InvalidOperation(_)));
}

#[tokio::test]
async fn test_find_replace_rewrites_only_referencing_files() {
    let disk = memory_disk("images");
    disk.new_file("/img/cat.png", "png").await.unwrap();
    disk.new_file("/posts/cat.md", "![cat](/img/cat.png)\n").await.unwrap();
    disk.new_file("/posts/dog.md", "no pictures\n").await.unwrap();
    disk.new_file("/posts/blob.bin", "/img/cat.png").await.unwrap();

    let moved = disk.rename_dir_or_file("/img/cat.png", "/media/cat.png", None).await.unwrap();
    let mut sub = disk.subscribe("disk.index");

    let changed = disk
        .find_replace_img_batch(
            &[(moved.old_path.clone(), moved.new_path.clone())],
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(changed, vec![AbsPath::new("/posts/cat.md")]);
    assert_eq!(disk.read_text("/posts/cat.md").await.unwrap(), "![cat](/media/cat.png)\n");
    assert_eq!(disk.read_text("/posts/blob.bin").await.unwrap(), "/img/cat.png");

    let delivered = sub.recv().await.unwrap();
    match delivered.event {
        DiskEvent::Index { change: IndexChange::Write(payload) } => {
            assert_eq!(payload.file_paths, changed);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_find_replace_honours_cancellation() {
    let disk = memory_disk("cancel");
    disk.new_file("/a.md", "![](/x.png)").await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = disk
        .find_replace_img_batch(&[(AbsPath::new("/x.png"), AbsPath::new("/y.png"))], None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, DiskError::Cancelled));
    assert_eq!(disk.read_text("/a.md").await.unwrap(), "![](/x.png)");
}

#[tokio::test]
async fn test_walk_files_visits_files_only() {
    let disk = memory_disk("walk");
    disk.new_file("/a/1.md", "").await.unwrap();
    disk.new_file("/a/2.md", "").await.unwrap();
    disk.new_dir("/empty").await.unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let visited = disk
        .walk_files_async(&CancellationToken::new(), move |info| {
            let sink = sink.clone();
            async move {
                sink.lock().push(info.path);
                std::ops::ControlFlow::Continue(())
            }
        })
        .await
        .unwrap();

    assert_eq!(visited, 2);
    assert_eq!(*seen.lock(), vec![AbsPath::new("/a/1.md"), AbsPath::new("/a/2.md")]);
}

#[tokio::test]
async fn test_tear_down_rejects_later_calls() {
    let disk = memory_disk("teardown");
    disk.init().await.unwrap();
    assert_eq!(disk.phase(), DiskPhase::Ready);

    disk.tear_down().await;
    assert_eq!(disk.phase(), DiskPhase::TornDown);
    assert!(matches!(disk.new_file("/a.md", "").await, Err(DiskError::TornDown)));
    assert!(matches!(disk.init().await, Err(DiskError::TornDown)));

    // Idempotent
    disk.tear_down().await;
}

#[tokio::test]
async fn test_local_disk_from_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = DiskConfig {
        id: Some("host".into()),
        backend: BackendConfig::Local { root: dir.path().join("files") },
        index_cache: IndexCacheConfig::Sqlite { path: dir.path().join("index.db") },
        ..DiskConfig::default()
    };

    let disk = Disk::from_config(&config, None).unwrap();
    disk.new_file("/journal/today.md", "entry").await.unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("files/journal/today.md")).unwrap(),
        "entry"
    );
    disk.tear_down().await;

    // A second instance starts from the persisted index
    let again = Disk::from_config(&config, None).unwrap();
    let node = again.node_from_path("/journal/today.md").await.unwrap().unwrap();
    assert_eq!(node.kind, NodeType::File);
    again.tear_down().await;
}
