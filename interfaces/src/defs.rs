use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use url::Url;

/// Bounds for a history lookup. The News core only ever asks for recent,
/// capped result sets.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub max_count: usize,
    pub begin_time: DateTime<Utc>,
}

impl HistoryQuery {
    pub fn recent(max_count: usize, days: i64) -> Self {
        Self {
            max_count,
            begin_time: Utc::now() - Duration::days(days),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub url: Url,
    pub title: String,
    pub last_visit: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            title: String::new(),
            last_visit: Utc::now(),
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}

/// Asynchronous access to the profile's browsing history.
#[async_trait]
pub trait HistoryQuerier: Send + Sync {
    async fn query(&self, query: HistoryQuery) -> Vec<HistoryEntry>;
}

/// Key/value preference storage. Values are JSON so dictionary-shaped
/// preferences round-trip without a schema.
///
/// Implementations must be cheap to call and must not call back into the
/// caller while holding internal locks.
pub trait PrefService: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn clear(&self, key: &str);

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.set(key, Value::Bool(value));
    }
}
