use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel_migrator::migrate_channel;
use crate::feed_parsing::parse_http_url;
use crate::subscriptions::SubscriptionsSnapshot;
use crate::traits::ApiRequest;
use crate::types::{LocaleInfo, NewsError, Publisher, PublisherType, Publishers, Result, UserEnabled};

const FALLBACK_LOCALE: &str = "en_US";

#[derive(Debug, Deserialize)]
struct RawLocale {
    locale: String,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    rank: u32,
}

#[derive(Debug, Deserialize)]
struct RawPublisher {
    publisher_id: String,
    publisher_name: String,
    #[serde(default)]
    category: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    locales: Vec<RawLocale>,
    #[serde(default)]
    site_url: Option<String>,
    #[serde(default)]
    feed_url: Option<String>,
    #[serde(default)]
    favicon_url: Option<String>,
    #[serde(default)]
    cover_url: Option<String>,
    #[serde(default)]
    background_color: Option<String>,
}

fn default_enabled() -> bool {
    true
}

// Site urls in the directory are frequently bare hostnames.
fn parse_site_url(value: &str) -> Option<Url> {
    parse_http_url(value)
        .or_else(|_| parse_http_url(&format!("https://{}", value)))
        .ok()
}

/// Parses the publisher directory. Malformed entries are skipped.
pub fn parse_publishers(json: &str) -> Result<Publishers> {
    let values: Vec<Value> = serde_json::from_str(json)?;
    let mut publishers = Publishers::new();

    for value in values {
        let raw: RawPublisher = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Skipping malformed publisher: {}", e);
                continue;
            }
        };
        if raw.publisher_id.is_empty() {
            continue;
        }

        let locales = raw
            .locales
            .into_iter()
            .map(|locale| LocaleInfo {
                locale: locale.locale,
                channels: locale
                    .channels
                    .iter()
                    .map(|c| migrate_channel(c).to_string())
                    .collect(),
                rank: locale.rank,
            })
            .collect();

        publishers.insert(
            raw.publisher_id.clone(),
            Publisher {
                publisher_id: raw.publisher_id,
                publisher_type: PublisherType::CombinedSource,
                publisher_name: raw.publisher_name,
                category_name: migrate_channel(&raw.category).to_string(),
                is_enabled: raw.enabled,
                locales,
                site_url: raw.site_url.as_deref().and_then(parse_site_url),
                feed_source: raw.feed_url.as_deref().and_then(|u| parse_http_url(u).ok()),
                favicon_url: raw.favicon_url.as_deref().and_then(|u| parse_http_url(u).ok()),
                cover_url: raw.cover_url.as_deref().and_then(|u| parse_http_url(u).ok()),
                background_color: raw.background_color,
                user_enabled_status: UserEnabled::NotModified,
            },
        );
    }

    Ok(publishers)
}

/// Overlays the user's choices onto the directory and adds direct feeds as
/// publishers of their own.
pub fn apply_subscriptions(directory: &Publishers, subscriptions: &SubscriptionsSnapshot) -> Publishers {
    let mut publishers = directory.clone();
    for (id, publisher) in publishers.iter_mut() {
        publisher.user_enabled_status = subscriptions.get_publisher_status(id);
    }

    for feed in subscriptions.direct_feeds() {
        publishers.insert(
            feed.publisher_id(),
            Publisher {
                publisher_id: feed.publisher_id(),
                publisher_type: PublisherType::DirectSource,
                publisher_name: feed.title.clone(),
                category_name: String::new(),
                is_enabled: true,
                locales: Vec::new(),
                site_url: Some(feed.url.clone()),
                feed_source: Some(feed.url.clone()),
                favicon_url: None,
                cover_url: None,
                background_color: None,
                user_enabled_status: UserEnabled::Enabled,
            },
        );
    }

    publishers
}

/// The preferred locale when any publisher carries it, otherwise `en_US`.
pub fn choose_locale(publishers: &Publishers, preferred: &str) -> String {
    let supported = |locale: &str| {
        publishers
            .values()
            .any(|p| p.locales.iter().any(|info| info.locale == locale))
    };
    if supported(preferred) {
        preferred.to_string()
    } else {
        FALLBACK_LOCALE.to_string()
    }
}

#[derive(Default)]
struct DirectoryState {
    directory: Arc<Publishers>,
    last_publishers: Publishers,
    locale: Option<String>,
}

type SharedUpdate = Shared<BoxFuture<'static, Arc<Publishers>>>;

/// Owns the publisher directory. Concurrent refreshes share one request.
pub struct PublishersController {
    api: Arc<dyn ApiRequest>,
    sources_url: Url,
    preferred_locale: String,
    state: Arc<RwLock<DirectoryState>>,
    in_flight: Mutex<Option<SharedUpdate>>,
}

impl PublishersController {
    pub fn new(api: Arc<dyn ApiRequest>, api_base: &str, preferred_locale: impl Into<String>) -> Result<Self> {
        let sources_url = Url::parse(&format!("{}/sources.global.json", api_base.trim_end_matches('/')))?;
        Ok(Self {
            api,
            sources_url,
            preferred_locale: preferred_locale.into(),
            state: Arc::new(RwLock::new(DirectoryState::default())),
            in_flight: Mutex::new(None),
        })
    }

    /// Publishers with `subscriptions` applied. Uses the cached directory
    /// unless it is empty or `wait_for_current_update` asks to join (or
    /// start) a refresh.
    pub async fn get_or_fetch_publishers(
        &self,
        subscriptions: &SubscriptionsSnapshot,
        wait_for_current_update: bool,
    ) -> Publishers {
        let cached = self.state.read().await.directory.clone();
        let directory = if cached.is_empty() || wait_for_current_update {
            self.ensure_publishers_is_updating().await
        } else {
            cached
        };

        let publishers = apply_subscriptions(&directory, subscriptions);
        let mut state = self.state.write().await;
        state.last_publishers = publishers.clone();
        if state.locale.is_none() && !directory.is_empty() {
            state.locale = Some(choose_locale(&directory, &self.preferred_locale));
        }
        publishers
    }

    pub async fn get_publisher(&self, subscriptions: &SubscriptionsSnapshot, publisher_id: &str) -> Result<Publisher> {
        self.get_or_fetch_publishers(subscriptions, false)
            .await
            .remove(publisher_id)
            .ok_or_else(|| NewsError::PublisherNotFound {
                id: publisher_id.to_string(),
            })
    }

    /// Publisher whose site or feed lives on the same host as `url`.
    pub async fn get_publisher_for_site(&self, subscriptions: &SubscriptionsSnapshot, url: &Url) -> Option<Publisher> {
        let host = url.host_str()?;
        self.get_or_fetch_publishers(subscriptions, false)
            .await
            .into_values()
            .find(|p| p.site_host() == Some(host) || p.feed_host() == Some(host))
    }

    /// The publishers returned by the last call to
    /// [`Self::get_or_fetch_publishers`].
    pub async fn last_publishers(&self) -> Publishers {
        self.state.read().await.last_publishers.clone()
    }

    pub async fn get_last_locale(&self) -> String {
        self.state
            .read()
            .await
            .locale
            .clone()
            .unwrap_or_else(|| FALLBACK_LOCALE.to_string())
    }

    /// Joins the in-flight refresh or starts a new one.
    pub fn ensure_publishers_is_updating(&self) -> SharedUpdate {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(update) = slot.as_ref() {
            if update.peek().is_none() {
                debug!("Joining in-flight publishers update");
                return update.clone();
            }
        }

        let api = self.api.clone();
        let url = self.sources_url.clone();
        let state = self.state.clone();
        let preferred_locale = self.preferred_locale.clone();
        let update = async move {
            let response = api.get(&url).await;
            let parsed = match response.body() {
                Some(body) => {
                    let body = body.to_string();
                    tokio::task::spawn_blocking(move || parse_publishers(&body))
                        .await
                        .map_err(|e| NewsError::General(e.to_string()))
                        .and_then(|parsed| parsed)
                }
                None => Err(NewsError::General(
                    response.error.unwrap_or_else(|| "empty publishers response".to_string()),
                )),
            };

            let mut state = state.write().await;
            match parsed {
                Ok(publishers) if !publishers.is_empty() => {
                    info!("Loaded {} publishers", publishers.len());
                    state.locale = Some(choose_locale(&publishers, &preferred_locale));
                    state.directory = Arc::new(publishers);
                }
                Ok(_) => warn!("Publisher directory was empty, keeping previous"),
                Err(e) => warn!("Failed to update publishers: {}", e),
            }
            state.directory.clone()
        }
        .boxed()
        .shared();

        *slot = Some(update.clone());
        update
    }

    pub async fn clear_cache(&self) {
        let mut state = self.state.write().await;
        *state = DirectoryState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use uuid::Uuid;

    use crate::types::DirectFeed;

    const SOURCES: &str = r#"[
        {"publisher_id": "espn", "publisher_name": "ESPN", "category": "Sport",
         "site_url": "www.espn.com", "locales": [{"locale": "en_US", "channels": ["Sport", "Top News"]}]},
        {"publisher_id": "lemonde", "publisher_name": "Le Monde", "enabled": false,
         "site_url": "https://www.lemonde.fr", "locales": [{"locale": "fr_FR", "channels": ["Top News"]}]},
        {"publisher_name": "missing id"}
    ]"#;

    #[test]
    fn parses_directory_and_migrates_channels() {
        let publishers = parse_publishers(SOURCES).unwrap();
        assert_eq!(publishers.len(), 2);

        let espn = &publishers["espn"];
        assert_eq!(espn.category_name, "Sports");
        assert_eq!(espn.channels_for_locale("en_US"), ["Sports".to_string(), "Top News".to_string()]);
        assert_eq!(espn.site_host(), Some("www.espn.com"));
        assert!(!publishers["lemonde"].is_enabled);
    }

    #[test]
    fn overlays_user_choices() {
        let directory = parse_publishers(SOURCES).unwrap();
        let feed = DirectFeed::new(
            Uuid::new_v4(),
            Url::parse("https://blog.example/rss").unwrap(),
            "Blog",
        );
        let subs = SubscriptionsSnapshot::new(
            BTreeSet::from(["espn".to_string()]),
            BTreeSet::from(["lemonde".to_string()]),
            vec![feed.clone()],
            BTreeMap::new(),
        );

        let publishers = apply_subscriptions(&directory, &subs);
        assert_eq!(publishers["espn"].user_enabled_status, UserEnabled::Enabled);
        assert!(publishers["lemonde"].is_user_disabled());
        assert!(publishers[&feed.publisher_id()].is_direct());
    }

    #[test]
    fn falls_back_to_en_us() {
        let directory = parse_publishers(SOURCES).unwrap();
        assert_eq!(choose_locale(&directory, "fr_FR"), "fr_FR");
        assert_eq!(choose_locale(&directory, "de_DE"), "en_US");
    }
}
