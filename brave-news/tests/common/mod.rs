#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use brave_news::{ApiRequest, ApiResponse, BraveNewsEngine, NewsConfig};
use chrono::{Duration, Utc};
use interfaces::{HistoryQuerier, InMemoryPrefService, StaticHistory};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use url::Url;

pub const API_BASE: &str = "https://news.test";
pub const SOURCES_URL: &str = "https://news.test/sources.global.json";
pub const FEED_URL: &str = "https://news.test/brave-today/feed.en_US.json";

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_test_writer()
            .try_init();
    });
}

pub fn ok(body: impl Into<String>) -> ApiResponse {
    ApiResponse {
        http_status: Some(200),
        content: Some(body.into()),
        ..Default::default()
    }
}

pub fn ok_with_etag(body: impl Into<String>, etag: &str) -> ApiResponse {
    ApiResponse {
        etag: Some(etag.to_string()),
        ..ok(body)
    }
}

pub fn not_found() -> ApiResponse {
    ApiResponse {
        http_status: Some(404),
        error: Some("HTTP 404 Not Found".to_string()),
        ..Default::default()
    }
}

/// Scripted responses per URL. Each request takes the next response; the
/// last one repeats. Unknown URLs fail like a dead host. A held URL answers
/// only once its gate is opened.
#[derive(Default)]
pub struct MockApi {
    routes: Mutex<HashMap<String, VecDeque<ApiResponse>>>,
    requests: Mutex<Vec<(&'static str, String)>>,
    gates: Mutex<HashMap<String, watch::Receiver<bool>>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, responses: impl IntoIterator<Item = ApiResponse>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into_iter().collect());
    }

    /// Holds requests to `url` until `true` is sent on the returned gate.
    pub fn hold(&self, url: &str) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        self.gates.lock().unwrap().insert(url.to_string(), rx);
        tx
    }

    /// Waits until `url` has seen at least `n` requests.
    pub async fn requested(&self, method: &str, url: &str, n: usize) {
        while self.count(method, url) < n {
            tokio::time::sleep(StdDuration::from_millis(1)).await;
        }
    }

    pub fn count(&self, method: &str, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, u)| *m == method && u == url)
            .count()
    }

    fn next(&self, method: &'static str, url: &Url) -> ApiResponse {
        self.requests.lock().unwrap().push((method, url.to_string()));
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url.as_str()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => ApiResponse::failed(format!("no route for {}", url)),
        }
    }

    async fn pass_gate(&self, url: &Url) {
        let gate = self.gates.lock().unwrap().get(url.as_str()).cloned();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
    }
}

#[async_trait]
impl ApiRequest for MockApi {
    async fn get(&self, url: &Url) -> ApiResponse {
        let response = self.next("GET", url);
        self.pass_gate(url).await;
        response
    }

    async fn head(&self, url: &Url) -> ApiResponse {
        let response = self.next("HEAD", url);
        ApiResponse {
            content: None,
            ..response
        }
    }
}

pub fn publisher(id: &str, name: &str, site: &str, category: &str, channels: &[&str]) -> Value {
    json!({
        "publisher_id": id,
        "publisher_name": name,
        "category": category,
        "site_url": site,
        "enabled": true,
        "locales": [{"locale": "en_US", "channels": channels, "rank": 1}],
    })
}

pub fn sources() -> String {
    json!([
        publisher("espn", "ESPN", "https://www.espn.com", "Sports", &["Sports", "Top News"]),
        publisher("cnn", "CNN", "https://www.cnn.com", "Top News", &["Top News"]),
        publisher("verge", "The Verge", "https://www.theverge.com", "Technology", &["Technology", "Top News"]),
        publisher("bbc", "BBC", "https://www.bbc.co.uk", "Top News", &["Top News"]),
    ])
    .to_string()
}

pub fn article(url: &str, publisher_id: &str, category: &str, channels: &[&str], score: f64, hours_ago: i64) -> Value {
    json!({
        "content_type": "article",
        "url": url,
        "img": format!("{}.jpg", url),
        "publisher_id": publisher_id,
        "publisher_name": publisher_id.to_uppercase(),
        "title": format!("Story at {}", url),
        "description": "",
        "category": category,
        "channels": channels,
        "score": score,
        "pop_score": 60.0,
        "publish_time": (Utc::now() - Duration::hours(hours_ago)).to_rfc3339(),
    })
}

/// Thirty articles spread over every publisher, all in Top News.
pub fn large_feed() -> String {
    let publishers = [("espn", "Sports"), ("cnn", "Top News"), ("verge", "Technology"), ("bbc", "Top News")];
    let items: Vec<Value> = (0..30)
        .map(|i| {
            let (publisher_id, category) = publishers[i % publishers.len()];
            article(
                &format!("https://{}.test/story/{}", publisher_id, i),
                publisher_id,
                category,
                &[category, "Top News"],
                i as f64,
                (i % 12) as i64,
            )
        })
        .collect();
    Value::Array(items).to_string()
}

pub fn test_config() -> NewsConfig {
    NewsConfig {
        api_host: "news.test".to_string(),
        api_scheme: "https".to_string(),
        ..NewsConfig::default()
    }
}

pub fn engine_with(api: Arc<MockApi>, history: impl HistoryQuerier + 'static) -> BraveNewsEngine {
    init_tracing();
    let engine = BraveNewsEngine::with_api(
        test_config(),
        api,
        Arc::new(InMemoryPrefService::new()),
        Arc::new(history),
    )
    .unwrap();
    engine.prefs().set_config(true, true);
    engine
}

pub fn engine(api: Arc<MockApi>) -> BraveNewsEngine {
    engine_with(api, StaticHistory::default())
}
