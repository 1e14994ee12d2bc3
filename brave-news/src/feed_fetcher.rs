use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::direct_feed_fetcher::DirectFeedFetcher;
use crate::feed_parsing::parse_feed_items;
use crate::publishers_controller::PublishersController;
use crate::subscriptions::SubscriptionsSnapshot;
use crate::traits::ApiRequest;
use crate::types::{ETags, FeedItems, NewsError, Publishers, Result, UserEnabled};

/// Smallest set of locales that covers every subscribed channel and every
/// explicitly followed publisher. Publishers not covered by a channel locale
/// are covered greedily, most-shared locale first.
pub fn get_minimal_locales_set(channel_locales: &BTreeSet<String>, publishers: &Publishers) -> BTreeSet<String> {
    let mut result = channel_locales.clone();

    let mut uncovered: Vec<BTreeSet<&str>> = publishers
        .values()
        .filter(|p| !p.is_direct() && p.user_enabled_status == UserEnabled::Enabled)
        .map(|p| p.locales.iter().map(|l| l.locale.as_str()).collect::<BTreeSet<_>>())
        .filter(|locales| !locales.is_empty() && locales.iter().all(|l| !result.contains(*l)))
        .collect();

    while !uncovered.is_empty() {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for locales in &uncovered {
            for locale in locales {
                *counts.entry(*locale).or_default() += 1;
            }
        }
        // BTreeMap iteration keeps ties resolved by locale name.
        let Some((best, _)) = counts
            .iter()
            .fold(None::<(&str, usize)>, |best, (locale, count)| match best {
                Some((_, best_count)) if best_count >= *count => best,
                _ => Some((*locale, *count)),
            })
        else {
            break;
        };
        result.insert(best.to_string());
        uncovered.retain(|locales| !locales.contains(best));
    }

    result
}

/// Downloads combined locale feeds and direct feeds.
pub struct FeedFetcher {
    api: Arc<dyn ApiRequest>,
    api_base: String,
    publishers_controller: Arc<PublishersController>,
    direct_feed_fetcher: DirectFeedFetcher,
}

impl FeedFetcher {
    pub fn new(api: Arc<dyn ApiRequest>, api_base: &str, publishers_controller: Arc<PublishersController>) -> Self {
        Self {
            direct_feed_fetcher: DirectFeedFetcher::new(api.clone()),
            api,
            api_base: api_base.trim_end_matches('/').to_string(),
            publishers_controller,
        }
    }

    pub fn feed_url(&self, locale: &str) -> Result<Url> {
        Url::parse(&format!("{}/brave-today/feed.{}.json", self.api_base, locale)).map_err(NewsError::from)
    }

    async fn locales_for(&self, subscriptions: &SubscriptionsSnapshot) -> (Publishers, BTreeSet<String>) {
        let publishers = self
            .publishers_controller
            .get_or_fetch_publishers(subscriptions, false)
            .await;
        let locales = get_minimal_locales_set(&subscriptions.subscribed_channel_locales(), &publishers);
        (publishers, locales)
    }

    /// Fetches every needed locale feed and every direct feed, then merges
    /// them with the first occurrence of each URL winning. Failed sources
    /// contribute nothing.
    pub async fn fetch_feed(&self, subscriptions: &SubscriptionsSnapshot) -> (FeedItems, ETags) {
        let (_publishers, locales) = self.locales_for(subscriptions).await;
        info!(
            "Fetching {} locale feeds and {} direct feeds",
            locales.len(),
            subscriptions.direct_feeds().len()
        );

        let locale_fetches = locales.iter().map(|locale| self.fetch_locale(locale));
        let direct_fetches = subscriptions.direct_feeds().iter().map(|feed| async move {
            self.direct_feed_fetcher
                .download_feed(&feed.url, &feed.publisher_id(), &feed.title)
                .await
                .items
        });

        // Both barriers complete before merging, in a stable order.
        let (locale_results, direct_results) = futures::join!(join_all(locale_fetches), join_all(direct_fetches));

        let mut etags = ETags::new();
        let mut seen = HashSet::new();
        let mut items = FeedItems::new();
        let mut duplicates = 0usize;

        let locale_items = locale_results.into_iter().flat_map(|(locale, etag, items)| {
            if let Some(etag) = etag {
                etags.insert(locale, etag);
            }
            items
        });
        for item in locale_items.chain(direct_results.into_iter().flatten()) {
            if seen.insert(item.url().clone()) {
                items.push(item);
            } else {
                duplicates += 1;
            }
        }

        debug!("Merged {} feed items ({} duplicates dropped)", items.len(), duplicates);
        (items, etags)
    }

    async fn fetch_locale(&self, locale: &str) -> (String, Option<String>, FeedItems) {
        let url = match self.feed_url(locale) {
            Ok(url) => url,
            Err(e) => {
                warn!("Bad feed url for {}: {}", locale, e);
                return (locale.to_string(), None, FeedItems::new());
            }
        };

        let response = self.api.get(&url).await;
        let Some(body) = response.body() else {
            warn!(
                "Feed for {} unavailable (status {:?}): {:?}",
                locale, response.http_status, response.error
            );
            return (locale.to_string(), None, FeedItems::new());
        };

        let body = body.to_string();
        let items = match tokio::task::spawn_blocking(move || parse_feed_items(&body)).await {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                warn!("Feed for {} could not be parsed: {}", locale, e);
                FeedItems::new()
            }
            Err(e) => {
                warn!("Parse task for {} failed: {}", locale, e);
                FeedItems::new()
            }
        };

        debug!("Locale {} produced {} items", locale, items.len());
        (locale.to_string(), response.etag, items)
    }

    /// HEAD-probes each needed locale. A locale with no previous ETag, or a
    /// response without one, counts as changed.
    pub async fn is_update_available(&self, subscriptions: &SubscriptionsSnapshot, etags: &ETags) -> bool {
        let (_publishers, locales) = self.locales_for(subscriptions).await;

        let probes = locales.iter().map(|locale| async move {
            let Some(previous) = etags.get(locale).filter(|etag| !etag.is_empty()) else {
                debug!("No previous etag for {}", locale);
                return true;
            };
            let url = match self.feed_url(locale) {
                Ok(url) => url,
                Err(_) => return true,
            };
            let response = self.api.head(&url).await;
            match response.etag.as_deref() {
                Some(current) if !current.is_empty() => current != previous,
                _ => {
                    debug!("Empty etag for {}, assuming changed", locale);
                    true
                }
            }
        });

        join_all(probes).await.into_iter().any(|changed| changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LocaleInfo, Publisher, PublisherType};

    fn publisher(id: &str, locales: &[&str], status: UserEnabled) -> Publisher {
        Publisher {
            publisher_id: id.to_string(),
            publisher_type: PublisherType::CombinedSource,
            publisher_name: id.to_string(),
            category_name: String::new(),
            is_enabled: true,
            locales: locales
                .iter()
                .map(|l| LocaleInfo {
                    locale: l.to_string(),
                    channels: vec![],
                    rank: 0,
                })
                .collect(),
            site_url: None,
            feed_source: None,
            favicon_url: None,
            cover_url: None,
            background_color: None,
            user_enabled_status: status,
        }
    }

    #[test]
    fn minimal_locales_prefers_shared_locale() {
        let mut publishers = Publishers::new();
        publishers.insert("a".into(), publisher("a", &["en_US", "en_GB"], UserEnabled::Enabled));
        publishers.insert("b".into(), publisher("b", &["en_GB", "ja_JP"], UserEnabled::Enabled));
        publishers.insert("c".into(), publisher("c", &["es_ES"], UserEnabled::NotModified));

        let locales = get_minimal_locales_set(&BTreeSet::new(), &publishers);
        assert_eq!(locales, BTreeSet::from(["en_GB".to_string()]));
    }

    #[test]
    fn channel_locales_cover_publishers() {
        let mut publishers = Publishers::new();
        publishers.insert("a".into(), publisher("a", &["en_US", "en_GB"], UserEnabled::Enabled));
        publishers.insert("b".into(), publisher("b", &["ja_JP"], UserEnabled::Enabled));

        let channel_locales = BTreeSet::from(["en_US".to_string()]);
        let locales = get_minimal_locales_set(&channel_locales, &publishers);
        assert_eq!(locales, BTreeSet::from(["en_US".to_string(), "ja_JP".to_string()]));
    }
}
