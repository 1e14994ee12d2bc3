use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;
use uuid::Uuid;

use crate::config::ConfigError;

/// The reserved channel every locale carries.
pub const TOP_NEWS_CHANNEL: &str = "Top News";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UserEnabled {
    #[default]
    NotModified,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublisherType {
    CombinedSource,
    DirectSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocaleInfo {
    pub locale: String,
    pub channels: Vec<String>,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    pub publisher_id: String,
    pub publisher_type: PublisherType,
    pub publisher_name: String,
    pub category_name: String,
    pub is_enabled: bool,
    pub locales: Vec<LocaleInfo>,
    pub site_url: Option<Url>,
    pub feed_source: Option<Url>,
    pub favicon_url: Option<Url>,
    pub cover_url: Option<Url>,
    pub background_color: Option<String>,
    pub user_enabled_status: UserEnabled,
}

impl Publisher {
    /// Channels the publisher is registered under for `locale`.
    pub fn channels_for_locale(&self, locale: &str) -> &[String] {
        self.locales
            .iter()
            .find(|info| info.locale == locale)
            .map(|info| info.channels.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_direct(&self) -> bool {
        self.publisher_type == PublisherType::DirectSource
    }

    /// Explicitly followed, either as a curated source or as a direct feed.
    pub fn is_user_subscribed(&self) -> bool {
        self.is_direct() || self.user_enabled_status == UserEnabled::Enabled
    }

    pub fn is_user_disabled(&self) -> bool {
        self.user_enabled_status == UserEnabled::Disabled
    }

    pub fn site_host(&self) -> Option<&str> {
        self.site_url.as_ref().and_then(|u| u.host_str())
    }

    pub fn feed_host(&self) -> Option<&str> {
        self.feed_source.as_ref().and_then(|u| u.host_str())
    }
}

/// Keyed by publisher id. Ordered so every pass over it is reproducible.
pub type Publishers = BTreeMap<String, Publisher>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_name: String,
    pub subscribed_locales: Vec<String>,
}

pub type Channels = BTreeMap<String, Channel>;

/// A user-added RSS/Atom source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectFeed {
    pub id: Uuid,
    pub url: Url,
    pub title: String,
}

impl DirectFeed {
    pub fn new(id: Uuid, url: Url, title: impl Into<String>) -> Self {
        let title = title.into();
        let title = if title.is_empty() { url.to_string() } else { title };
        Self { id, url, title }
    }

    pub fn publisher_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Image {
    PaddedImageUrl(Url),
    ImageUrl(Url),
}

impl Image {
    pub fn url(&self) -> &Url {
        match self {
            Image::PaddedImageUrl(url) | Image::ImageUrl(url) => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItemMetadata {
    pub category_name: String,
    pub channels: Vec<String>,
    pub publisher_id: String,
    pub publisher_name: String,
    pub title: String,
    pub description: String,
    pub url: Url,
    pub image: Option<Image>,
    pub score: f64,
    pub pop_score: f64,
    pub publish_time: DateTime<Utc>,
    pub relative_time_description: String,
}

impl FeedItemMetadata {
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedItem {
    Article(FeedItemMetadata),
    Deal {
        offers_category: String,
        data: FeedItemMetadata,
    },
    PromotedArticle {
        creative_instance_id: String,
        data: FeedItemMetadata,
    },
}

impl FeedItem {
    pub fn metadata(&self) -> &FeedItemMetadata {
        match self {
            FeedItem::Article(data)
            | FeedItem::Deal { data, .. }
            | FeedItem::PromotedArticle { data, .. } => data,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut FeedItemMetadata {
        match self {
            FeedItem::Article(data)
            | FeedItem::Deal { data, .. }
            | FeedItem::PromotedArticle { data, .. } => data,
        }
    }

    pub fn is_article(&self) -> bool {
        matches!(self, FeedItem::Article(_))
    }

    pub fn url(&self) -> &Url {
        &self.metadata().url
    }
}

pub type FeedItems = Vec<FeedItem>;

/// Engagement inputs for one publisher or one channel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Signal {
    pub disabled: bool,
    pub subscribed_weight: f64,
    pub visit_weight: f64,
    pub article_count: u32,
}

/// Keyed by publisher id or channel name.
pub type Signals = BTreeMap<String, Signal>;

/// Locale → last ETag seen for that locale's feed.
pub type ETags = BTreeMap<String, String>;

// V1 feed layout.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardType {
    Headline,
    HeadlinePaired,
    CategoryGroup,
    PublisherGroup,
    Deals,
    PromotedArticle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageItem {
    pub card_type: CardType,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<PageItem>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Feed {
    pub hash: String,
    pub featured_item: Option<FeedItem>,
    pub pages: Vec<Page>,
}

impl Feed {
    /// Every feed item laid out on any page, in page order.
    pub fn page_items(&self) -> impl Iterator<Item = &FeedItem> {
        self.pages
            .iter()
            .flat_map(|page| page.items.iter())
            .flat_map(|page_item| page_item.items.iter())
    }
}

// V2 feed layout.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeroArticle {
    pub data: FeedItemMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub data: FeedItemMetadata,
    pub is_discover: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArticleElements {
    Hero(HeroArticle),
    Article(Article),
}

impl ArticleElements {
    pub fn data(&self) -> &FeedItemMetadata {
        match self {
            ArticleElements::Hero(hero) => &hero.data,
            ArticleElements::Article(article) => &article.data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterType {
    Channel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_type: ClusterType,
    pub id: String,
    pub articles: Vec<ArticleElements>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedItemV2 {
    Hero(HeroArticle),
    Article(Article),
    Cluster(Cluster),
    Advert,
    Discover { publisher_ids: Vec<String> },
}

impl FeedItemV2 {
    /// Articles carried by this card, including those inside a cluster.
    pub fn articles(&self) -> Vec<&FeedItemMetadata> {
        match self {
            FeedItemV2::Hero(hero) => vec![&hero.data],
            FeedItemV2::Article(article) => vec![&article.data],
            FeedItemV2::Cluster(cluster) => cluster.articles.iter().map(|a| a.data()).collect(),
            FeedItemV2::Advert | FeedItemV2::Discover { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeedV2Type {
    #[default]
    All,
    Following,
    Channel(String),
    Publisher(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedV2Error {
    NoFeeds,
    ConnectionError,
    NoArticles,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeedV2 {
    pub feed_type: FeedV2Type,
    pub items: Vec<FeedItemV2>,
    pub source_hash: String,
    pub construct_time: Option<DateTime<Utc>>,
    pub error: Option<FeedV2Error>,
}

impl FeedV2 {
    pub fn article_urls(&self) -> Vec<&Url> {
        self.items
            .iter()
            .flat_map(|item| item.articles())
            .map(|data| &data.url)
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NewsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Publisher not found: {id}")]
    PublisherNotFound { id: String },

    #[error("No publishers available")]
    NoPublishers,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, NewsError>;
