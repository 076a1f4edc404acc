//! Disk configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! id = "notes"
//! trash_dir = ".trash"
//! index_max_age_secs = 3600
//!
//! [backend]
//! type = "namespaced"
//! namespace = "/disks/notes"
//!
//! [backend.inner]
//! type = "sqlite"
//! path = "/var/lib/scriptorium/store.db"
//!
//! [index_cache]
//! type = "sqlite"
//! path = "/var/lib/scriptorium/index.db"
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scriptorium_types::DiskId;

use crate::index_cache::{IndexCacheResult, IndexStore, MemoryIndexStore, NoIndexStore, SqliteIndexStore};
use crate::storage::{
    LocalBackend, MemoryBackend, NamespacedBackend, OriginPrivateBackend, SqliteBackend,
    StorageBackend, StorageResult, TracedBackend,
};

/// Which physical store backs a disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Memory,
    Local {
        root: PathBuf,
    },
    Sqlite {
        path: PathBuf,
    },
    OriginPrivate {
        root: PathBuf,
        namespace: String,
    },
    Namespaced {
        namespace: String,
        inner: Box<BackendConfig>,
    },
}

impl BackendConfig {
    /// Construct the backend.
    pub fn build(&self) -> StorageResult<Arc<dyn StorageBackend>> {
        Ok(match self {
            BackendConfig::Memory => Arc::new(MemoryBackend::new()),
            BackendConfig::Local { root } => {
                std::fs::create_dir_all(root)?;
                Arc::new(LocalBackend::new(root))
            }
            BackendConfig::Sqlite { path } => Arc::new(SqliteBackend::open(path)?),
            BackendConfig::OriginPrivate { root, namespace } => {
                std::fs::create_dir_all(root)?;
                let sandbox: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(root));
                Arc::new(OriginPrivateBackend::new(sandbox, namespace.as_str()))
            }
            BackendConfig::Namespaced { namespace, inner } => {
                Arc::new(NamespacedBackend::new(inner.build()?, namespace.as_str()))
            }
        })
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Memory => "memory",
            BackendConfig::Local { .. } => "local",
            BackendConfig::Sqlite { .. } => "sqlite",
            BackendConfig::OriginPrivate { .. } => "origin_private",
            BackendConfig::Namespaced { .. } => "namespaced",
        }
    }
}

/// Where the index snapshot is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexCacheConfig {
    None,
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
}

impl IndexCacheConfig {
    pub fn build(&self) -> IndexCacheResult<Arc<dyn IndexStore>> {
        Ok(match self {
            IndexCacheConfig::None => Arc::new(NoIndexStore),
            IndexCacheConfig::Memory => Arc::new(MemoryIndexStore::new()),
            IndexCacheConfig::Sqlite { path } => Arc::new(SqliteIndexStore::open(path)?),
        })
    }
}

fn default_trash_dir() -> String {
    ".trash".to_string()
}

fn default_event_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

/// Everything needed to build a [`Disk`](crate::Disk).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Disk id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub backend: BackendConfig,
    #[serde(default)]
    pub index_cache: IndexCacheConfig,
    /// A cached index older than this is ignored at startup.
    #[serde(default)]
    pub index_max_age_secs: Option<u64>,
    #[serde(default = "default_trash_dir")]
    pub trash_dir: String,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Follow other instances' changes over the remote channel.
    #[serde(default = "default_true")]
    pub listen_remote: bool,
    /// Wrap the backend in a [`TracedBackend`].
    #[serde(default)]
    pub traced: bool,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            id: None,
            backend: BackendConfig::Memory,
            index_cache: IndexCacheConfig::default(),
            index_max_age_secs: None,
            trash_dir: default_trash_dir(),
            event_capacity: default_event_capacity(),
            listen_remote: true,
            traced: false,
        }
    }
}

impl DiskConfig {
    /// A memory disk with defaults.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("failed to parse disk config")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read disk config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// The configured id, or a fresh one.
    pub fn disk_id(&self) -> DiskId {
        match &self.id {
            Some(id) => DiskId::from_string(id.clone()),
            None => DiskId::new(),
        }
    }

    pub fn index_max_age(&self) -> Option<Duration> {
        self.index_max_age_secs.map(Duration::from_secs)
    }

    /// The backend, decorated when `traced` is set.
    pub fn build_backend(&self) -> StorageResult<Arc<dyn StorageBackend>> {
        let backend = self.backend.build()?;
        Ok(if self.traced {
            Arc::new(TracedBackend::new(backend))
        } else {
            backend
        })
    }
}
