// src/ingest/types.rs
use crate::error::{FetchError, StoreError};
use crate::model::{RawItem, Source};

/// Fetches and parses one source's feed. One call is one attempt; retries and
/// timeouts are the acquirer's business.
#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawItem>, FetchError>;
}

/// Source catalog plus the place health is written back to between runs.
#[async_trait::async_trait]
pub trait SourceRepository: Send + Sync {
    /// Active sources. Cooldown filtering happens in the acquirer.
    async fn list_fetchable_sources(&self) -> Result<Vec<Source>, StoreError>;
    async fn persist_health(&self, source: &Source) -> Result<(), StoreError>;
}
