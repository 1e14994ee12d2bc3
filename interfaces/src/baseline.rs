use async_trait::async_trait;
use url::Url;

use crate::defs::{HistoryEntry, HistoryQuerier, HistoryQuery};

/// History backed by a fixed list of entries. Respects the query's row cap
/// and time window like the real service would.
#[derive(Debug, Clone, Default)]
pub struct StaticHistory {
    entries: Vec<HistoryEntry>,
}

impl StaticHistory {
    pub fn new(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    /// Builds a history with one visit per URL. Unparseable URLs are skipped.
    pub fn from_urls<'a>(urls: impl IntoIterator<Item = &'a str>) -> Self {
        let entries = urls
            .into_iter()
            .filter_map(|u| Url::parse(u).ok())
            .map(HistoryEntry::new)
            .collect();
        Self { entries }
    }
}

#[async_trait]
impl HistoryQuerier for StaticHistory {
    async fn query(&self, query: HistoryQuery) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.last_visit >= query.begin_time)
            .take(query.max_count)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_caps_results() {
        let history = StaticHistory::from_urls([
            "https://a.example.com/1",
            "https://b.example.com/2",
            "not a url",
            "https://c.example.com/3",
        ]);

        let all = history.query(HistoryQuery::recent(10, 14)).await;
        assert_eq!(all.len(), 3);

        let capped = history.query(HistoryQuery::recent(2, 14)).await;
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].host(), Some("a.example.com"));
    }
}
