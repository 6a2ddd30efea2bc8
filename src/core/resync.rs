//! Keeps the published graph in step with the workbook on disk.
//!
//! State machine: `Idle -> Rebuilding -> Published -> Idle`, or
//! `Rebuilding -> Failed -> Idle` when the workbook cannot be read, in which
//! case the previous graph stays published and nobody is notified.

use arc_swap::ArcSwapOption;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::{mpsc, watch, Mutex as TokioMutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::analyzer;
use super::graph::DependencyGraph;
use super::impact;
use super::subscribers::{GraphUpdate, SubscriberRegistry, Subscription};
use crate::config::ResyncConfig;
use crate::error::{CellGraphError, Result};
use crate::parsers::workbook::{CalamineReader, WorkbookReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResyncState {
    Idle,
    Rebuilding,
    Published,
    Failed,
}

/// Receives every published graph once subscribers have been notified, e.g.
/// to mirror it into a store. Called on a blocking thread. Errors are logged;
/// they do not undo the publish.
pub trait GraphSink: Send + Sync {
    fn on_published(&self, graph: &DependencyGraph) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum RebuildOutcome {
    Published(Arc<DependencyGraph>),
    /// Another rebuild was running; it will run once more when it finishes.
    Coalesced,
}

/// Owns the published graph for one workbook path.
#[derive(Clone)]
pub struct ResyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    path: PathBuf,
    reader: Arc<dyn WorkbookReader>,
    config: ResyncConfig,
    published: ArcSwapOption<DependencyGraph>,
    generation: AtomicU64,
    gate: RebuildGate,
    subscribers: SubscriberRegistry,
    sinks: RwLock<Vec<Arc<dyn GraphSink>>>,
    state_tx: watch::Sender<ResyncState>,
}

impl ResyncCoordinator {
    pub fn new(path: impl Into<PathBuf>, config: ResyncConfig) -> Self {
        Self::with_reader(path, Arc::new(CalamineReader::new()), config)
    }

    pub fn with_reader(
        path: impl Into<PathBuf>,
        reader: Arc<dyn WorkbookReader>,
        config: ResyncConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ResyncState::Idle);
        Self {
            inner: Arc::new(CoordinatorInner {
                path: path.into(),
                reader,
                subscribers: SubscriberRegistry::new(config.subscriber_capacity),
                config,
                published: ArcSwapOption::empty(),
                generation: AtomicU64::new(0),
                gate: RebuildGate::default(),
                sinks: RwLock::new(Vec::new()),
                state_tx,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn config(&self) -> &ResyncConfig {
        &self.inner.config
    }

    pub fn add_sink(&self, sink: Arc<dyn GraphSink>) {
        self.inner.sinks.write().push(sink);
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.subscribers.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn state(&self) -> ResyncState {
        *self.inner.state_tx.borrow()
    }

    pub fn state_stream(&self) -> watch::Receiver<ResyncState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of graphs published so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// The currently published graph. Later publishes do not affect the
    /// returned snapshot.
    pub fn snapshot(&self) -> Option<Arc<DependencyGraph>> {
        self.inner.published.load_full()
    }

    /// Impact query against the current snapshot. Fails with
    /// [`CellGraphError::NoGraph`] before the first successful publish.
    pub fn impact(&self, cell: &str) -> Result<Vec<String>> {
        let graph = self.snapshot().ok_or(CellGraphError::NoGraph)?;
        impact::impact_of(&graph, cell)
    }

    /// Rebuilds and publishes, single-flight.
    ///
    /// When a rebuild is already running this returns
    /// [`RebuildOutcome::Coalesced`] immediately and the running rebuild goes
    /// around once more after it finishes, so the latest content is ingested.
    pub async fn rebuild(&self) -> Result<RebuildOutcome> {
        let gate = &self.inner.gate;
        gate.request();

        let mut last = Ok(RebuildOutcome::Coalesced);
        loop {
            let Some(guard) = gate.try_enter() else {
                debug!(
                    "{}; coalescing into the running rebuild",
                    CellGraphError::RebuildInProgress
                );
                return last;
            };
            if gate.take_request() {
                last = self.run_cycle().await.map(RebuildOutcome::Published);
            }
            drop(guard);

            if !gate.has_request() {
                return last;
            }
        }
    }

    async fn run_cycle(&self) -> Result<Arc<DependencyGraph>> {
        let inner = &self.inner;
        let started = Instant::now();
        inner.state_tx.send_replace(ResyncState::Rebuilding);

        let reader = inner.reader.clone();
        let path = inner.path.clone();
        let built = tokio::task::spawn_blocking(move || {
            let workbook = reader.read(&path)?;
            Ok::<_, CellGraphError>(analyzer::build(&workbook))
        })
        .await
        .unwrap_or_else(|join_err| {
            Err(CellGraphError::workbook_read(
                &inner.path,
                format!("rebuild task failed: {join_err}"),
            ))
        });

        let graph = match built {
            Ok(graph) => Arc::new(graph),
            Err(err) => {
                error!("rebuild of {} failed: {err}", inner.path.display());
                inner.state_tx.send_replace(ResyncState::Failed);
                inner.state_tx.send_replace(ResyncState::Idle);
                return Err(err);
            }
        };

        inner.published.store(Some(graph.clone()));
        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        inner.state_tx.send_replace(ResyncState::Published);

        let update = GraphUpdate {
            generation,
            path: inner.path.clone(),
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: SystemTime::now(),
        };
        let report = inner.subscribers.broadcast(&update);
        info!(
            "published generation {} of {} ({} nodes, {} edges) in {}ms, notified {} subscribers",
            generation,
            inner.path.display(),
            update.nodes,
            update.edges,
            update.duration_ms,
            report.delivered
        );

        self.run_sinks(&graph, generation).await;
        inner.state_tx.send_replace(ResyncState::Idle);
        Ok(graph)
    }

    /// Sinks may block on I/O, so they run on the blocking pool after
    /// subscribers have been notified.
    async fn run_sinks(&self, graph: &Arc<DependencyGraph>, generation: u64) {
        let sinks: Vec<Arc<dyn GraphSink>> = self.inner.sinks.read().clone();
        if sinks.is_empty() {
            return;
        }

        let graph = graph.clone();
        let finished = tokio::task::spawn_blocking(move || {
            for sink in sinks {
                if let Err(err) = sink.on_published(&graph) {
                    warn!("graph sink failed for generation {generation}: {err}");
                }
            }
        })
        .await;
        if let Err(err) = finished {
            warn!("graph sinks for generation {generation} did not finish: {err}");
        }
    }

    /// Spawns the debouncer. Change signals go through the returned handle.
    pub fn start(&self) -> ResyncHandle {
        let (signal_tx, signal_rx) = mpsc::channel(self.inner.config.signal_capacity.max(1));
        let task = tokio::spawn(debounce_loop(self.clone(), signal_rx));
        ResyncHandle {
            signal_tx,
            task,
            _watcher: None,
        }
    }

    /// [`start`](Self::start) plus a filesystem watcher on the workbook.
    ///
    /// The parent directory is watched so that editors which save by
    /// replacing the file are still seen.
    pub fn watch_file(&self) -> Result<ResyncHandle> {
        let mut handle = self.start();
        let watcher = create_fs_watcher(&self.inner.path, handle.signal_tx.clone())?;
        handle._watcher = Some(watcher);
        info!("watching {} for changes", self.inner.path.display());
        Ok(handle)
    }
}

/// Running debouncer. Dropping it stops the task and any file watcher.
pub struct ResyncHandle {
    signal_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    _watcher: Option<RecommendedWatcher>,
}

impl ResyncHandle {
    /// Records a change. Never blocks; when the signal queue is full a
    /// rebuild is already pending anyway.
    pub fn signal(&self) {
        if self.signal_tx.try_send(()).is_err() {
            debug!("change signal queue full or closed");
        }
    }

    /// Consumes the handle, stopping the debouncer and any file watcher.
    pub fn stop(self) {}
}

impl Drop for ResyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Single-flight gate for rebuilds.
///
/// A caller records its request before trying the lock, and the holder checks
/// for requests after releasing it, so a request made while the lock is held
/// is always picked up by someone.
#[derive(Default)]
struct RebuildGate {
    lock: TokioMutex<()>,
    requested: AtomicBool,
}

impl RebuildGate {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    fn try_enter(&self) -> Option<MutexGuard<'_, ()>> {
        self.lock.try_lock().ok()
    }

    /// Clears the request flag; `false` means a previous holder already
    /// served every outstanding request.
    fn take_request(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    fn has_request(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Waits for a signal, then for a quiet window of `debounce`, then rebuilds.
/// Signals arriving during the rebuild queue up and cause one follow-up.
async fn debounce_loop(coordinator: ResyncCoordinator, mut signals: mpsc::Receiver<()>) {
    let debounce = coordinator.inner.config.debounce();

    while signals.recv().await.is_some() {
        let mut collapsed = 1usize;
        loop {
            match time::timeout(debounce, signals.recv()).await {
                Ok(Some(())) => collapsed += 1,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        debug!("debounced {collapsed} change signals");
        if let Err(err) = coordinator.rebuild().await {
            error!("resync failed, keeping previous graph: {err}");
        }
    }
}

fn create_fs_watcher(path: &Path, signal_tx: mpsc::Sender<()>) -> Result<RecommendedWatcher> {
    let target = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    let file_name = target.file_name().map(|n| n.to_os_string());
    let dir = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any
                ) && event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if relevant {
                    let _ = signal_tx.try_send(());
                }
            }
            Err(err) => warn!("watch error: {err}"),
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
