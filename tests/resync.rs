use cellgraph::config::ResyncConfig;
use cellgraph::core::{
    DependencyGraph, GraphSink, RebuildOutcome, ResyncCoordinator, ResyncState,
};
use cellgraph::parsers::{Cell, Sheet, Workbook, WorkbookReader};
use cellgraph::{CellGraphError, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// In-memory workbook source that counts reads and can be told to fail.
#[derive(Default)]
struct FakeReader {
    workbook: Mutex<Workbook>,
    reads: AtomicUsize,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    /// Next read waits on `entered`, then on `release`.
    park: Mutex<Option<(Arc<Barrier>, Arc<Barrier>)>>,
}

impl FakeReader {
    fn with_formula(formula: &str) -> Arc<Self> {
        let reader = Arc::new(Self::default());
        reader.set_formula(formula);
        reader
    }

    fn set_formula(&self, formula: &str) {
        *self.workbook.lock() = Workbook::new().with_sheet(
            Sheet::new("Sheet1")
                .with_cell(Cell::value("A1".parse().unwrap(), "1"))
                .with_cell(Cell::value("A2".parse().unwrap(), "2"))
                .with_cell(Cell::value("B1".parse().unwrap(), formula)),
        );
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl WorkbookReader for FakeReader {
    fn read(&self, path: &Path) -> Result<Workbook> {
        let park = self.park.lock().take();
        if let Some((entered, release)) = park {
            entered.wait();
            release.wait();
        }
        if let Some(delay) = *self.delay.lock() {
            std::thread::sleep(delay);
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CellGraphError::workbook_read(path, "corrupt"));
        }
        Ok(self.workbook.lock().clone())
    }
}

#[derive(Default)]
struct CountingSink {
    published: AtomicUsize,
}

impl GraphSink for CountingSink {
    fn on_published(&self, _graph: &DependencyGraph) -> Result<()> {
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks until the test releases it, recording whether it was released.
struct GatedSink {
    release: std::sync::Mutex<mpsc::Receiver<()>>,
    released: AtomicBool,
}

impl GraphSink for GatedSink {
    fn on_published(&self, _graph: &DependencyGraph) -> Result<()> {
        let rx = self.release.lock().unwrap();
        if rx.recv_timeout(Duration::from_secs(3)).is_ok() {
            self.released.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn coordinator(reader: Arc<FakeReader>, debounce_ms: u64) -> ResyncCoordinator {
    let config = ResyncConfig::default().with_debounce(Duration::from_millis(debounce_ms));
    ResyncCoordinator::with_reader("book.xlsx", reader, config)
}

#[tokio::test]
async fn queries_before_first_publish_report_no_graph() {
    let coord = coordinator(FakeReader::with_formula("=A1"), 10);
    assert!(coord.snapshot().is_none());
    assert!(matches!(
        coord.impact("Sheet1!A1"),
        Err(CellGraphError::NoGraph)
    ));
}

#[tokio::test]
async fn rebuild_publishes_and_notifies() {
    let reader = FakeReader::with_formula("=A1");
    let coord = coordinator(reader.clone(), 10);
    let sink = Arc::new(CountingSink::default());
    coord.add_sink(sink.clone());
    let mut sub = coord.subscribe();

    let outcome = coord.rebuild().await.unwrap();
    assert!(matches!(outcome, RebuildOutcome::Published(_)));
    assert_eq!(coord.state(), ResyncState::Idle);
    assert_eq!(coord.generation(), 1);
    assert_eq!(sink.published.load(Ordering::SeqCst), 1);

    let update = timeout(Duration::from_secs(1), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.generation, 1);
    assert_eq!(update.edges, 1);

    assert_eq!(coord.impact("Sheet1!A1").unwrap(), vec!["Sheet1!B1"]);
    assert!(coord.impact("Sheet1!B1").unwrap().is_empty());
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_graph_and_stays_silent() {
    let reader = FakeReader::with_formula("=A1");
    let coord = coordinator(reader.clone(), 10);
    coord.rebuild().await.unwrap();
    let before = coord.snapshot().unwrap();

    let mut sub = coord.subscribe();
    reader.fail.store(true, Ordering::SeqCst);
    reader.set_formula("=A2");

    assert!(coord.rebuild().await.is_err());
    assert_eq!(coord.state(), ResyncState::Idle);
    assert_eq!(coord.generation(), 1);
    assert!(Arc::ptr_eq(&before, &coord.snapshot().unwrap()));
    assert!(sub.try_recv().is_none());
    assert_eq!(coord.impact("Sheet1!A1").unwrap(), vec!["Sheet1!B1"]);
}

#[tokio::test]
async fn held_snapshot_survives_republish() {
    let reader = FakeReader::with_formula("=A1");
    let coord = coordinator(reader.clone(), 10);
    coord.rebuild().await.unwrap();
    let old = coord.snapshot().unwrap();

    reader.set_formula("=A2");
    coord.rebuild().await.unwrap();

    assert_eq!(old.edge_count(), 1);
    assert!(old.direct_dependents(&"Sheet1!A1".parse().unwrap()).len() == 1);
    assert_eq!(coord.impact("Sheet1!A1").unwrap(), Vec::<String>::new());
    assert_eq!(coord.impact("Sheet1!A2").unwrap(), vec!["Sheet1!B1"]);
}

#[tokio::test]
async fn republishing_unchanged_content_yields_equal_graphs() {
    let coord = coordinator(FakeReader::with_formula("=SUM(A1:A2)"), 10);
    coord.rebuild().await.unwrap();
    let first = coord.snapshot().unwrap();
    coord.rebuild().await.unwrap();
    let second = coord.snapshot().unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.node_set(), second.node_set());
    assert_eq!(first.edge_set(), second.edge_set());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_rebuild_is_coalesced_into_one_follow_up() {
    let reader = FakeReader::with_formula("=A1");
    *reader.delay.lock() = Some(Duration::from_millis(200));
    let coord = coordinator(reader.clone(), 10);

    let running = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.rebuild().await })
    };
    sleep(Duration::from_millis(50)).await;

    let second = coord.rebuild().await.unwrap();
    assert!(matches!(second, RebuildOutcome::Coalesced));
    let third = coord.rebuild().await.unwrap();
    assert!(matches!(third, RebuildOutcome::Coalesced));

    running.await.unwrap().unwrap();
    assert_eq!(reader.reads(), 2);
    assert_eq!(coord.generation(), 2);
}

#[tokio::test]
async fn debounce_collapses_rapid_signals() {
    let reader = FakeReader::with_formula("=A1");
    let coord = coordinator(reader.clone(), 100);
    let mut sub = coord.subscribe();
    let handle = coord.start();

    handle.signal();
    sleep(Duration::from_millis(20)).await;
    reader.set_formula("=A2");
    handle.signal();
    sleep(Duration::from_millis(20)).await;
    reader.set_formula("=A1+A2");
    handle.signal();

    let update = timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.generation, 1);
    assert_eq!(update.edges, 2);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(reader.reads(), 1);
    assert!(sub.try_recv().is_none());
    assert_eq!(
        coord.impact("Sheet1!A2").unwrap(),
        vec!["Sheet1!B1"]
    );
}

#[tokio::test]
async fn dropped_subscribers_leave_the_fan_out() {
    let coord = coordinator(FakeReader::with_formula("=A1"), 10);
    let first = coord.subscribe();
    let mut second = coord.subscribe();
    assert_eq!(coord.subscriber_count(), 2);

    drop(first);
    assert_eq!(coord.subscriber_count(), 1);

    coord.rebuild().await.unwrap();
    assert_eq!(second.try_recv().map(|u| u.generation), Some(1));
}

#[tokio::test]
async fn slow_subscriber_does_not_block_publishing() {
    let reader = FakeReader::with_formula("=A1");
    let config = ResyncConfig::default().with_subscriber_capacity(1);
    let coord = ResyncCoordinator::with_reader("book.xlsx", reader, config);
    let mut stalled = coord.subscribe();

    for _ in 0..5 {
        timeout(Duration::from_secs(1), coord.rebuild())
            .await
            .unwrap()
            .unwrap();
    }

    assert_eq!(coord.generation(), 5);
    assert_eq!(stalled.try_recv().map(|u| u.generation), Some(1));
    assert!(stalled.try_recv().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_during_read_is_served_by_the_running_rebuild() {
    let reader = FakeReader::with_formula("=A1");
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    *reader.park.lock() = Some((entered.clone(), release.clone()));
    let coord = coordinator(reader.clone(), 10);

    let running = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.rebuild().await })
    };
    tokio::task::spawn_blocking(move || entered.wait())
        .await
        .unwrap();

    reader.set_formula("=A2");
    let coalesced = coord.rebuild().await.unwrap();
    assert!(matches!(coalesced, RebuildOutcome::Coalesced));

    tokio::task::spawn_blocking(move || release.wait())
        .await
        .unwrap();
    let outcome = running.await.unwrap().unwrap();

    let RebuildOutcome::Published(graph) = outcome else {
        panic!("running rebuild should publish");
    };
    assert_eq!(reader.reads(), 2);
    assert_eq!(coord.generation(), 2);
    assert!(Arc::ptr_eq(&graph, &coord.snapshot().unwrap()));
    assert_eq!(coord.impact("Sheet1!A2").unwrap(), vec!["Sheet1!B1"]);
    assert!(coord.impact("Sheet1!A1").unwrap().is_empty());
}

#[tokio::test]
async fn subscribers_hear_about_a_publish_before_sinks_finish() {
    let coord = coordinator(FakeReader::with_formula("=A1"), 10);
    let (release_tx, release_rx) = mpsc::channel();
    let sink = Arc::new(GatedSink {
        release: std::sync::Mutex::new(release_rx),
        released: AtomicBool::new(false),
    });
    coord.add_sink(sink.clone());
    let mut sub = coord.subscribe();

    let running = {
        let coord = coord.clone();
        tokio::spawn(async move { coord.rebuild().await })
    };

    let update = timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("update delivered while the sink is still blocked")
        .unwrap();
    assert_eq!(update.generation, 1);
    assert!(!sink.released.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
    assert!(sink.released.load(Ordering::SeqCst));
    assert_eq!(coord.state(), ResyncState::Idle);
}

#[tokio::test]
async fn stopping_the_handle_cancels_a_pending_rebuild() {
    let reader = FakeReader::with_formula("=A1");
    let coord = coordinator(reader.clone(), 100);
    let handle = coord.start();

    handle.signal();
    handle.stop();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(reader.reads(), 0);
    assert!(coord.snapshot().is_none());
}
