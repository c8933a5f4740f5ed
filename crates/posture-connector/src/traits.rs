//! Directory provider capability trait.

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::types::{DirectoryRecord, ProviderType, SyncCategory};

/// Opaque pagination cursor.
///
/// Wraps whatever the provider uses to continue a listing (a Workspace
/// `pageToken`, a Graph `@odata.nextLink` URL). Callers only thread it back
/// into the next `fetch_page` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(pub String);

/// One page of normalized records.
#[derive(Debug, Clone)]
pub struct RecordPage {
    pub records: Vec<DirectoryRecord>,
    /// None means the listing is exhausted.
    pub next: Option<PageCursor>,
}

impl RecordPage {
    /// A terminal page with no records.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            next: None,
        }
    }
}

/// Capability interface for a directory/identity provider.
///
/// One implementation per provider. The scan orchestrator and phase runner
/// are written against this trait only; they never see provider-native
/// payloads or pagination mechanics.
#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    /// Which provider this is.
    fn provider_type(&self) -> ProviderType;

    /// Display name for scan logs.
    fn display_name(&self) -> &str;

    /// The categories this provider syncs, in the fixed order phases execute.
    fn categories(&self) -> &'static [SyncCategory];

    /// Performs the cheapest possible authenticated call (one page of size 1)
    /// to confirm the stored credential and delegation settings are valid.
    ///
    /// # Errors
    ///
    /// `ConnectorError::Auth` when the provider rejects the credential,
    /// `ConnectorError::Config` when settings are malformed, transport errors
    /// otherwise.
    async fn verify_credentials(&self) -> ConnectorResult<()>;

    /// Fetches one page of records for a category. Pass `None` to start and
    /// the returned cursor to continue; a `None` cursor in the result means
    /// the listing is complete.
    async fn fetch_page(
        &self,
        category: SyncCategory,
        cursor: Option<PageCursor>,
    ) -> ConnectorResult<RecordPage>;
}
