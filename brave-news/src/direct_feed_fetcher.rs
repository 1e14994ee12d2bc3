use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use feed_rs::parser;
use tracing::{debug, info, warn};
use url::Url;

use crate::feed_parsing::{parse_http_url, relative_time_description};
use crate::traits::ApiRequest;
use crate::types::{FeedItem, FeedItemMetadata, FeedItems, Image, NewsError, Result};

/// Outcome of downloading one user-added feed.
#[derive(Debug, Clone, Default)]
pub struct DirectFeedResult {
    pub title: Option<String>,
    pub items: FeedItems,
}

/// Downloads RSS/Atom documents and turns their entries into articles.
pub struct DirectFeedFetcher {
    api: Arc<dyn ApiRequest>,
}

impl DirectFeedFetcher {
    pub fn new(api: Arc<dyn ApiRequest>) -> Self {
        Self { api }
    }

    /// Any failure yields an empty result.
    pub async fn download_feed(&self, url: &Url, publisher_id: &str, publisher_name: &str) -> DirectFeedResult {
        let response = self.api.get(url).await;
        let Some(body) = response.body() else {
            warn!("Direct feed {} unavailable: {:?}", url, response.error);
            return DirectFeedResult::default();
        };

        let body = body.to_string();
        let publisher_id = publisher_id.to_string();
        let publisher_name = publisher_name.to_string();
        let parsed =
            tokio::task::spawn_blocking(move || parse_direct_feed(&body, &publisher_id, &publisher_name)).await;

        match parsed {
            Ok(Ok(result)) => {
                info!("Direct feed {} produced {} articles", url, result.items.len());
                result
            }
            Ok(Err(e)) => {
                warn!("Direct feed {} could not be parsed: {}", url, e);
                DirectFeedResult::default()
            }
            Err(e) => {
                warn!("Direct feed {} parse task failed: {}", url, e);
                DirectFeedResult::default()
            }
        }
    }

    /// Title of the feed at `url`, or `None` when it is not a usable feed.
    pub async fn verify_feed_url(&self, url: &Url) -> Option<String> {
        let result = self.download_feed(url, "", "").await;
        if result.items.is_empty() && result.title.is_none() {
            return None;
        }
        Some(result.title.unwrap_or_else(|| url.to_string()))
    }
}

/// Parses a feed document. Entries without an http(s) link or a title are
/// skipped, as are repeated links.
pub fn parse_direct_feed(content: &str, publisher_id: &str, publisher_name: &str) -> Result<DirectFeedResult> {
    debug!("Parsing direct feed ({} bytes)", content.len());
    let feed = parser::parse(content.as_bytes()).map_err(|e| NewsError::Parse(format!("Failed to parse feed: {}", e)))?;

    let title = feed.title.map(|t| t.content).filter(|t| !t.trim().is_empty());
    let publisher_name = if publisher_name.is_empty() {
        title.clone().unwrap_or_default()
    } else {
        publisher_name.to_string()
    };

    let now = Utc::now();
    let mut seen_urls = HashSet::new();
    let mut items = FeedItems::new();

    for entry in feed.entries {
        let Some(url) = entry.links.iter().find_map(|link| parse_http_url(&link.href).ok()) else {
            continue;
        };
        if !seen_urls.insert(url.clone()) {
            debug!("Skipping duplicate entry with URL: {}", url);
            continue;
        }
        let Some(entry_title) = entry.title.map(|t| t.content).filter(|t| !t.trim().is_empty()) else {
            continue;
        };

        let image = entry
            .media
            .iter()
            .flat_map(|media| {
                media
                    .thumbnails
                    .iter()
                    .map(|thumb| thumb.image.uri.clone())
                    .chain(media.content.iter().filter_map(|c| c.url.as_ref().map(|u| u.to_string())))
            })
            .find_map(|uri| parse_http_url(&uri).ok())
            .map(Image::ImageUrl);

        let publish_time = entry.published.or(entry.updated).unwrap_or(now);
        let description = entry.summary.map(|s| s.content).unwrap_or_default();

        items.push(FeedItem::Article(FeedItemMetadata {
            category_name: String::new(),
            channels: Vec::new(),
            publisher_id: publisher_id.to_string(),
            publisher_name: publisher_name.clone(),
            title: entry_title.trim().to_string(),
            description: description.trim().to_string(),
            url,
            image,
            score: 0.0,
            pop_score: 0.0,
            publish_time,
            relative_time_description: relative_time_description(publish_time, now),
        }));
    }

    Ok(DirectFeedResult { title, items })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Blog</title>
    <link>https://blog.example</link>
    <item>
      <title>First post</title>
      <link>https://blog.example/first</link>
      <description>Hello</description>
      <pubDate>Mon, 02 Jan 2023 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>First post again</title>
      <link>https://blog.example/first</link>
    </item>
    <item>
      <title>Not http</title>
      <link>chrome://settings</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn converts_entries_to_articles() {
        let result = parse_direct_feed(RSS, "feed-id", "").unwrap();
        assert_eq!(result.title.as_deref(), Some("Example Blog"));
        assert_eq!(result.items.len(), 1);

        let data = result.items[0].metadata();
        assert_eq!(data.publisher_id, "feed-id");
        assert_eq!(data.publisher_name, "Example Blog");
        assert_eq!(data.url.as_str(), "https://blog.example/first");
        assert_eq!(data.description, "Hello");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_direct_feed("definitely not xml", "id", "name").is_err());
    }
}
