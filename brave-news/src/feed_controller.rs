use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::{BoxFuture, FutureExt, Shared};
use interfaces::{HistoryQuerier, HistoryQuery};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channels_controller::get_channels_from_publishers;
use crate::config::RankingConfig;
use crate::feed_building::build_feed;
use crate::feed_fetcher::FeedFetcher;
use crate::publishers_controller::PublishersController;
use crate::subscriptions::SubscriptionsSnapshot;
use crate::types::{ETags, Feed};
use crate::utils::normalize_host;

type SharedFeedUpdate = Shared<BoxFuture<'static, Arc<Feed>>>;

#[derive(Default)]
struct FeedState {
    feed: Option<Arc<Feed>>,
    etags: ETags,
}

/// Owns the cached V1 feed. Concurrent refreshes share one fetch, and every
/// waiter gets the same result. A rebuild that started before the last
/// `clear_cache` hands its feed to its waiters but never caches it.
pub struct FeedController {
    publishers_controller: Arc<PublishersController>,
    fetcher: Arc<FeedFetcher>,
    history: Arc<dyn HistoryQuerier>,
    config: RankingConfig,
    state: Arc<RwLock<FeedState>>,
    // Only read or bumped under the `state` write lock.
    generation: Arc<AtomicU64>,
    in_flight: Mutex<Option<SharedFeedUpdate>>,
    cancel: CancellationToken,
}

impl FeedController {
    pub fn new(
        publishers_controller: Arc<PublishersController>,
        fetcher: Arc<FeedFetcher>,
        history: Arc<dyn HistoryQuerier>,
        config: RankingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            publishers_controller,
            fetcher,
            history,
            config,
            state: Arc::new(RwLock::new(FeedState::default())),
            generation: Arc::new(AtomicU64::new(0)),
            in_flight: Mutex::new(None),
            cancel,
        }
    }

    fn cached_feed(&self) -> Option<Arc<Feed>> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).feed.clone()
    }

    fn cached_etags(&self) -> ETags {
        self.state.read().unwrap_or_else(|e| e.into_inner()).etags.clone()
    }

    fn in_flight_update(&self) -> Option<SharedFeedUpdate> {
        let slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().filter(|update| update.peek().is_none()).cloned()
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.in_flight_update().is_some()
    }

    /// The cached feed, or the result of a fresh fetch when there is none.
    pub async fn get_or_fetch_feed(&self, subscriptions: &SubscriptionsSnapshot) -> Arc<Feed> {
        match self.cached_feed() {
            Some(feed) => feed,
            None => self.ensure_feed_is_updating(subscriptions).await,
        }
    }

    /// Joins the in-flight rebuild or starts one. A failed or empty rebuild
    /// resolves to an empty feed and drops the cache.
    pub fn ensure_feed_is_updating(&self, subscriptions: &SubscriptionsSnapshot) -> SharedFeedUpdate {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(update) = slot.as_ref() {
            if update.peek().is_none() {
                debug!("Joining in-flight feed update");
                return update.clone();
            }
        }

        let publishers_controller = self.publishers_controller.clone();
        let fetcher = self.fetcher.clone();
        let history = self.history.clone();
        let config = self.config.clone();
        let state = self.state.clone();
        let generation = self.generation.clone();
        let started_at = generation.load(Ordering::SeqCst);
        let cancel = self.cancel.clone();
        let subscriptions = subscriptions.clone();

        let rebuild = async move {
            let publishers = publishers_controller.get_or_fetch_publishers(&subscriptions, true).await;
            if publishers.is_empty() {
                warn!("No publishers, resetting feed cache");
                *state.write().unwrap_or_else(|e| e.into_inner()) = FeedState::default();
                return Arc::new(Feed::default());
            }

            let (items, etags) = fetcher.fetch_feed(&subscriptions).await;
            let history = history
                .query(HistoryQuery::recent(config.history_max_results, config.history_days))
                .await;
            let history_hosts: HashSet<String> = history
                .iter()
                .filter_map(|entry| entry.host())
                .map(|host| normalize_host(host).to_string())
                .collect();
            let channels = get_channels_from_publishers(&publishers, &subscriptions);

            let built = tokio::task::spawn_blocking(move || {
                build_feed(&items, &history_hosts, &publishers, &channels, &config)
            })
            .await;

            let mut state = state.write().unwrap_or_else(|e| e.into_inner());
            if generation.load(Ordering::SeqCst) != started_at {
                debug!("Cache cleared during feed update, not caching the result");
                return built.map(Arc::new).unwrap_or_default();
            }
            match built {
                Ok(feed) if feed.featured_item.is_some() || !feed.pages.is_empty() => {
                    info!("Feed updated: {} pages", feed.pages.len());
                    let feed = Arc::new(feed);
                    state.feed = Some(feed.clone());
                    state.etags = etags;
                    feed
                }
                Ok(_) => {
                    warn!("Feed came back empty, resetting cache");
                    *state = FeedState::default();
                    Arc::new(Feed::default())
                }
                Err(e) => {
                    warn!("Feed build task failed: {}", e);
                    *state = FeedState::default();
                    Arc::new(Feed::default())
                }
            }
        };

        let update = async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Feed update cancelled");
                    Arc::new(Feed::default())
                }
                feed = rebuild => feed,
            }
        }
        .boxed()
        .shared();

        *slot = Some(update.clone());
        update
    }

    /// Rebuilds only if the remote feed changed. Returns whether an update
    /// ran; a no-op while one is already in progress.
    pub async fn update_if_remote_changed(&self, subscriptions: &SubscriptionsSnapshot) -> bool {
        if self.is_update_in_progress() {
            debug!("Update already in progress");
            return false;
        }

        let etags = self.cached_etags();
        if !self.fetcher.is_update_available(subscriptions, &etags).await {
            debug!("Remote feed unchanged");
            return false;
        }

        self.ensure_feed_is_updating(subscriptions).await;
        true
    }

    /// Whether `hash` is out of date with respect to the cached feed.
    pub fn does_feed_version_differ(&self, hash: &str) -> bool {
        match self.cached_feed() {
            Some(feed) => feed.hash != hash,
            None => true,
        }
    }

    /// Drops the cached feed. A rebuild already running is left to finish
    /// but will not repopulate the cache; the next caller starts a new one.
    pub fn clear_cache(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = FeedState::default();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
