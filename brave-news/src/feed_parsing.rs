use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::types::{FeedItem, FeedItemMetadata, FeedItems, Image, NewsError, Result};

#[derive(Debug, Deserialize)]
struct RawFeedItem {
    content_type: String,
    url: String,
    #[serde(default)]
    padded_img: Option<String>,
    #[serde(default)]
    img: Option<String>,
    publisher_id: String,
    #[serde(default)]
    publisher_name: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    pop_score: Option<f64>,
    publish_time: String,
    #[serde(default)]
    creative_instance_id: Option<String>,
    #[serde(default)]
    offers_category: Option<String>,
}

/// Parses a combined feed document. Items that fail validation are dropped
/// one by one; only a document that is not a JSON array is an error.
pub fn parse_feed_items(json: &str) -> Result<FeedItems> {
    let values: Vec<Value> = serde_json::from_str(json)?;
    let now = Utc::now();
    let total = values.len();

    let items: FeedItems = values
        .into_iter()
        .filter_map(|value| match parse_feed_item(value, now) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!("Dropping feed item: {}", e);
                None
            }
        })
        .collect();

    if items.len() < total {
        warn!("Dropped {} of {} feed items during parse", total - items.len(), total);
    }

    Ok(items)
}

fn parse_feed_item(value: Value, now: DateTime<Utc>) -> Result<FeedItem> {
    let raw: RawFeedItem = serde_json::from_value(value)?;

    let url = parse_http_url(&raw.url)?;
    if raw.publisher_id.is_empty() {
        return Err(NewsError::Parse(format!("{} has no publisher id", url)));
    }
    if raw.title.is_empty() {
        return Err(NewsError::Parse(format!("{} has no title", url)));
    }

    let image = match (&raw.padded_img, &raw.img) {
        (Some(padded), _) if !padded.is_empty() => parse_http_url(padded).ok().map(Image::PaddedImageUrl),
        (_, Some(img)) if !img.is_empty() => parse_http_url(img).ok().map(Image::ImageUrl),
        _ => None,
    };

    let publish_time = parse_publish_time(&raw.publish_time)?;

    let data = FeedItemMetadata {
        category_name: raw.category,
        channels: raw.channels,
        publisher_id: raw.publisher_id,
        publisher_name: raw.publisher_name,
        title: raw.title,
        description: raw.description,
        url,
        image,
        score: raw.score,
        pop_score: raw.pop_score.unwrap_or(0.0),
        publish_time,
        relative_time_description: relative_time_description(publish_time, now),
    };

    match raw.content_type.as_str() {
        "article" => Ok(FeedItem::Article(data)),
        "product" => Ok(FeedItem::Deal {
            offers_category: raw.offers_category.unwrap_or_default(),
            data,
        }),
        "brave_partner" => match raw.creative_instance_id {
            Some(creative_instance_id) if !creative_instance_id.is_empty() => Ok(FeedItem::PromotedArticle {
                creative_instance_id,
                data,
            }),
            _ => Err(NewsError::Parse(format!(
                "promoted item {} has no creative instance id",
                data.url
            ))),
        },
        other => Err(NewsError::Parse(format!("unknown content type {:?}", other))),
    }
}

pub(crate) fn parse_http_url(value: &str) -> Result<Url> {
    let url = Url::parse(value)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(NewsError::Parse(format!("unsupported url scheme {}: {}", scheme, value))),
    }
}

/// Accepts the backend's `YYYY-MM-DD HH:MM:SS` (UTC) and RFC 3339.
pub fn parse_publish_time(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| NewsError::Parse(format!("bad publish time {:?}: {}", value, e)))
}

pub fn relative_time_description(publish_time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(publish_time);
    let (count, unit) = if elapsed.num_minutes() < 1 {
        return "just now".to_string();
    } else if elapsed.num_hours() < 1 {
        (elapsed.num_minutes(), "minute")
    } else if elapsed.num_days() < 1 {
        (elapsed.num_hours(), "hour")
    } else {
        (elapsed.num_days(), "day")
    };
    if count == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", count, unit)
    }
}
