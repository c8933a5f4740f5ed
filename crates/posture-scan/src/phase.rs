//! Phase runner: pages one category out of the provider and upserts it.
//!
//! Provider failures are absorbed into the phase outcome so the scan can move
//! on to the next category; records upserted before the failure stay. Store
//! failures propagate and fail the run.

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use posture_connector::{DirectoryProvider, DirectoryRecord, PageCursor, SyncCategory};
use posture_db::models::UpsertCounts;

use crate::error::{phase_error_label, ScanError};
use crate::store::SnapshotStore;

/// Records are flushed to the store in batches of this size.
pub const BATCH_SIZE: usize = 250;

/// The persisted result of one sync phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub category: SyncCategory,
    /// Records received from the provider, whether inserted or updated.
    pub record_count: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Classified provider failure, if the phase did not complete.
    pub error: Option<String>,
}

impl PhaseOutcome {
    /// True when the provider listing was drained without error.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Drains one category from the provider into the snapshot store.
///
/// Pages until the cursor is exhausted, flushing every `BATCH_SIZE` records.
/// A provider error ends the phase early with the failure recorded in the
/// outcome; whatever was already fetched is still flushed.
#[instrument(skip(provider, store), fields(provider = provider.display_name(), %category))]
pub async fn run_phase(
    provider: &dyn DirectoryProvider,
    store: &dyn SnapshotStore,
    org_id: Uuid,
    category: SyncCategory,
) -> Result<PhaseOutcome, ScanError> {
    let mut outcome = PhaseOutcome {
        category,
        record_count: 0,
        inserted: 0,
        updated: 0,
        error: None,
    };
    let mut counts = UpsertCounts::default();
    let mut buffer: Vec<DirectoryRecord> = Vec::with_capacity(BATCH_SIZE);
    let mut cursor: Option<PageCursor> = None;

    loop {
        let page = match provider.fetch_page(category, cursor.take()).await {
            Ok(page) => page,
            Err(err) => {
                let label = phase_error_label(&err);
                warn!(%category, error = %err, "phase aborted by provider error");
                outcome.error = Some(label);
                break;
            }
        };

        buffer.extend(page.records);
        while buffer.len() >= BATCH_SIZE {
            let batch: Vec<DirectoryRecord> = buffer.drain(..BATCH_SIZE).collect();
            outcome.record_count += batch.len() as u64;
            counts.absorb(store.upsert_records(org_id, category, &batch).await?);
        }

        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    if !buffer.is_empty() {
        outcome.record_count += buffer.len() as u64;
        counts.absorb(store.upsert_records(org_id, category, &buffer).await?);
    }

    outcome.inserted = counts.inserted;
    outcome.updated = counts.updated;
    Ok(outcome)
}
