//! Scan orchestration for posture
//!
//! The background pipeline at the heart of the scanner: the phase runner
//! pages security-relevant state out of a `DirectoryProvider` and upserts it
//! into the snapshot store; the orchestrator sequences phases under a
//! per-organization run lock persisted in the scan log; the rule engine
//! evaluates the compliance check bank against the fresh snapshot and records
//! one verdict per check per run.
//!
//! The service layer exposes the boundary contracts consumed by the API
//! tier: trigger, status, history, check queries, credential configuration,
//! org-unit annotations and CSV export.

mod error;
mod export;
mod orchestrator;
mod phase;
pub mod rules;
mod service;
mod snapshot;
pub mod store;

pub use error::ScanError;
pub use export::{export_csv, ExportTarget};
pub use orchestrator::ScanOrchestrator;
pub use phase::{run_phase, PhaseOutcome, BATCH_SIZE};
pub use service::ScanService;
pub use snapshot::Snapshot;
pub use store::{InMemorySnapshotStore, PgSnapshotStore, SnapshotStore};
