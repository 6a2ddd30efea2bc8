pub mod address;
pub mod analyzer;
pub mod graph;
pub mod impact;
pub mod resync;
pub mod store;
pub mod subscribers;

pub use address::{CellAddress, CellCoordinate};
pub use analyzer::WorkbookAnalyzer;
pub use graph::{DependencyGraph, GraphBuilder, GraphSnapshot};
pub use impact::{impact, impact_of};
pub use resync::{GraphSink, RebuildOutcome, ResyncCoordinator, ResyncHandle, ResyncState};
pub use store::{SnapshotSink, SnapshotStore, WorkbookStamp};
pub use subscribers::{GraphUpdate, SubscriberRegistry, Subscription};
