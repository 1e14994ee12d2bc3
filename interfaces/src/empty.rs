use async_trait::async_trait;

use crate::defs::{HistoryEntry, HistoryQuerier, HistoryQuery};

/// A profile that has never visited anything.
pub struct EmptyHistory;

#[async_trait]
impl HistoryQuerier for EmptyHistory {
    async fn query(&self, _query: HistoryQuery) -> Vec<HistoryEntry> {
        // Nothing visited, nothing to boost.
        Vec::new()
    }
}
