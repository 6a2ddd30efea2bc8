use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

use super::graph::{DependencyGraph, GraphSnapshot};
use super::resync::GraphSink;
use crate::error::Result;

const DEFAULT_MAX_MEMORY_ENTRIES: usize = 64;

/// Modification time and size of a workbook, taken before it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbookStamp {
    pub modified_nanos: u64,
    pub file_size: u64,
}

impl WorkbookStamp {
    pub fn of(workbook: &Path) -> Result<Self> {
        let metadata = fs::metadata(workbook)?;
        let modified_nanos = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Ok(Self {
            modified_nanos,
            file_size: metadata.len(),
        })
    }
}

/// Persisted graph plus the workbook metadata it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredGraph {
    pub workbook: PathBuf,
    pub graph: GraphSnapshot,
    pub stamp: WorkbookStamp,
}

/// Graph mirror kept in memory and, best-effort, on disk as bincode.
///
/// Entries are keyed by canonical workbook path and considered fresh while
/// the workbook's modification time and size match the stamp taken before
/// the graph was built.
pub struct SnapshotStore {
    memory: DashMap<PathBuf, Arc<StoredGraph>>,
    store_dir: Option<PathBuf>,
    max_memory_entries: usize,
}

impl SnapshotStore {
    pub fn new(store_dir: Option<PathBuf>) -> Result<Self> {
        let resolved = store_dir.unwrap_or_else(default_store_dir);
        let store_dir = match fs::create_dir_all(&resolved) {
            Ok(()) => Some(resolved),
            Err(err) => {
                warn!(
                    "failed to initialize snapshot store at {}: {err}",
                    resolved.display()
                );
                None
            }
        };

        Ok(Self {
            memory: DashMap::with_capacity(DEFAULT_MAX_MEMORY_ENTRIES),
            store_dir,
            max_memory_entries: DEFAULT_MAX_MEMORY_ENTRIES,
        })
    }

    pub fn in_memory_only() -> Self {
        Self {
            memory: DashMap::with_capacity(DEFAULT_MAX_MEMORY_ENTRIES),
            store_dir: None,
            max_memory_entries: DEFAULT_MAX_MEMORY_ENTRIES,
        }
    }

    pub fn store_dir(&self) -> Option<&Path> {
        self.store_dir.as_deref()
    }

    /// `true` when no snapshot exists or the workbook changed since it was taken.
    pub fn needs_update(&self, workbook: &Path) -> Result<bool> {
        let current = WorkbookStamp::of(workbook)?;
        Ok(match self.entry(&store_key(workbook)) {
            Some(entry) => entry.stamp != current,
            None => true,
        })
    }

    /// Last stored graph for `workbook`, fresh or not.
    pub fn load(&self, workbook: &Path) -> Option<DependencyGraph> {
        self.entry(&store_key(workbook))
            .map(|entry| DependencyGraph::from_snapshot(entry.graph.clone()))
    }

    /// Stores `graph` as built from the workbook content described by
    /// `stamp`. Take the stamp before reading so that edits made during the
    /// build leave the entry stale.
    pub fn save(
        &self,
        workbook: &Path,
        graph: &DependencyGraph,
        stamp: WorkbookStamp,
    ) -> Result<()> {
        let key = store_key(workbook);
        let entry = Arc::new(StoredGraph {
            workbook: key.clone(),
            graph: graph.to_snapshot(),
            stamp,
        });

        if let Some(path) = self.snapshot_path(&key) {
            let data = bincode::serialize(entry.as_ref())?;
            fs::write(&path, data)?;
            debug!("wrote snapshot {}", path.display());
        }

        self.remember(&key, entry);
        Ok(())
    }

    pub fn remove(&self, workbook: &Path) -> Result<()> {
        let key = store_key(workbook);
        self.memory.remove(&key);
        if let Some(path) = self.snapshot_path(&key) {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn entry(&self, key: &Path) -> Option<Arc<StoredGraph>> {
        if let Some(entry) = self.memory.get(key) {
            return Some(entry.value().clone());
        }

        let path = self.snapshot_path(key)?;
        if !path.exists() {
            return None;
        }
        match load_from_disk(&path) {
            Ok(stored) => {
                let entry = Arc::new(stored);
                self.remember(key, entry.clone());
                Some(entry)
            }
            Err(err) => {
                warn!("ignoring unreadable snapshot {}: {err}", path.display());
                None
            }
        }
    }

    fn remember(&self, key: &Path, entry: Arc<StoredGraph>) {
        if self.memory.len() >= self.max_memory_entries && !self.memory.contains_key(key) {
            let evict = self.memory.iter().next().map(|e| e.key().clone());
            if let Some(key) = evict {
                self.memory.remove(&key);
            }
        }
        self.memory.insert(key.to_path_buf(), entry);
    }

    fn snapshot_path(&self, key: &Path) -> Option<PathBuf> {
        let dir = self.store_dir.as_ref()?;
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        Some(dir.join(format!("graph_{:x}.bincode", hasher.finish())))
    }
}

/// Mirrors every published graph into a [`SnapshotStore`].
///
/// The stamp is taken at publish time. An edit that lands during a rebuild
/// also signals the watcher, and the follow-up publish restamps the entry.
pub struct SnapshotSink {
    store: Arc<SnapshotStore>,
    workbook: PathBuf,
}

impl SnapshotSink {
    pub fn new(store: Arc<SnapshotStore>, workbook: impl Into<PathBuf>) -> Self {
        Self {
            store,
            workbook: workbook.into(),
        }
    }
}

impl GraphSink for SnapshotSink {
    fn on_published(&self, graph: &DependencyGraph) -> Result<()> {
        let stamp = WorkbookStamp::of(&self.workbook)?;
        self.store.save(&self.workbook, graph, stamp)
    }
}

pub fn default_store_dir() -> PathBuf {
    std::env::temp_dir().join("cellgraph_store")
}

fn load_from_disk(path: &Path) -> Result<StoredGraph> {
    let data = fs::read(path)?;
    Ok(bincode::deserialize(&data)?)
}

/// Different spellings of one workbook path share an entry.
fn store_key(workbook: &Path) -> PathBuf {
    workbook
        .canonicalize()
        .unwrap_or_else(|_| workbook.to_path_buf())
}
