use std::sync::{Arc, Weak};

use interfaces::{HistoryQuerier, PrefService};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::channels_controller::ChannelsController;
use crate::config::NewsConfig;
use crate::direct_feed_fetcher::DirectFeedFetcher;
use crate::feed_controller::FeedController;
use crate::feed_fetcher::FeedFetcher;
use crate::feed_v2_builder::FeedV2Builder;
use crate::fetcher::Fetcher;
use crate::initialization_promise::{InitializationPromise, InitializationState};
use crate::pref_manager::{NewsPrefManager, ObserverId, PrefObserver};
use crate::publishers_controller::PublishersController;
use crate::subscriptions::{SubscriptionsDiff, SubscriptionsSnapshot};
use crate::suggestions::SuggestionsController;
use crate::traits::ApiRequest;
use crate::types::{Channels, Feed, FeedV2, Publishers, Result, Signals, UserEnabled};

/// Drops cached feeds whenever what the user follows changes.
struct CacheInvalidator {
    feed_controller: Weak<FeedController>,
    feed_v2_builder: Weak<FeedV2Builder>,
}

impl CacheInvalidator {
    fn invalidate(&self) {
        if let Some(controller) = self.feed_controller.upgrade() {
            controller.clear_cache();
        }
        if let Some(builder) = self.feed_v2_builder.upgrade() {
            builder.clear_cache();
        }
    }
}

impl PrefObserver for CacheInvalidator {
    fn on_publishers_changed(&self, diff: &SubscriptionsDiff) {
        debug!("{} publishers changed, invalidating feeds", diff.changed.len() + diff.removed.len());
        self.invalidate();
    }

    fn on_channels_changed(&self, diff: &SubscriptionsDiff) {
        debug!("{} channels changed, invalidating feeds", diff.changed.len() + diff.removed.len());
        self.invalidate();
    }
}

/// The News core behind one profile: preferences, the publisher directory
/// and both feed generations. Dropping it cancels any outstanding work.
pub struct BraveNewsEngine {
    prefs: Arc<NewsPrefManager>,
    publishers_controller: Arc<PublishersController>,
    channels_controller: ChannelsController,
    direct_feed_fetcher: DirectFeedFetcher,
    feed_controller: Arc<FeedController>,
    feed_v2_builder: Arc<FeedV2Builder>,
    suggestions_controller: SuggestionsController,
    initialization: Arc<InitializationPromise>,
    // Registered weakly with the pref manager; kept alive here.
    _cache_invalidator: Arc<dyn PrefObserver>,
    observer_id: ObserverId,
    cancel: CancellationToken,
}

impl BraveNewsEngine {
    /// An engine talking to the real News API over HTTP.
    pub fn new(config: NewsConfig, prefs: Arc<dyn PrefService>, history: Arc<dyn HistoryQuerier>) -> Result<Self> {
        config.validate()?;
        let api: Arc<dyn ApiRequest> = Arc::new(Fetcher::new(config.fetch.clone())?);
        Self::with_api(config, api, prefs, history)
    }

    /// An engine using `api` for every request.
    pub fn with_api(
        config: NewsConfig,
        api: Arc<dyn ApiRequest>,
        prefs: Arc<dyn PrefService>,
        history: Arc<dyn HistoryQuerier>,
    ) -> Result<Self> {
        let api_base = config.api_base();
        let cancel = CancellationToken::new();
        let prefs = Arc::new(NewsPrefManager::new(prefs));
        prefs.migrate_channels();

        let publishers_controller = Arc::new(PublishersController::new(
            api.clone(),
            &api_base,
            config.preferred_locale.clone(),
        )?);
        let feed_fetcher = Arc::new(FeedFetcher::new(api.clone(), &api_base, publishers_controller.clone()));

        let feed_controller = Arc::new(FeedController::new(
            publishers_controller.clone(),
            feed_fetcher.clone(),
            history.clone(),
            config.ranking.clone(),
            cancel.child_token(),
        ));
        let feed_v2_builder = Arc::new(FeedV2Builder::new(
            feed_fetcher,
            publishers_controller.clone(),
            history,
            &config,
            cancel.child_token(),
        ));
        let initialization = Arc::new(InitializationPromise::new(
            prefs.clone(),
            publishers_controller.clone(),
            config.init_retry_delays.clone(),
            cancel.child_token(),
        ));

        let cache_invalidator: Arc<dyn PrefObserver> = Arc::new(CacheInvalidator {
            feed_controller: Arc::downgrade(&feed_controller),
            feed_v2_builder: Arc::downgrade(&feed_v2_builder),
        });
        let observer_id = prefs.add_observer(Arc::downgrade(&cache_invalidator));

        info!("News engine ready ({})", api_base);
        Ok(Self {
            channels_controller: ChannelsController::new(publishers_controller.clone()),
            suggestions_controller: SuggestionsController::new(publishers_controller.clone()),
            direct_feed_fetcher: DirectFeedFetcher::new(api),
            prefs,
            publishers_controller,
            feed_controller,
            feed_v2_builder,
            initialization,
            _cache_invalidator: cache_invalidator,
            observer_id,
            cancel,
        })
    }

    /// Makes feed generation reproducible from here on.
    pub fn set_seed(&self, seed: u64) {
        self.feed_v2_builder.reseed(seed);
    }

    pub fn prefs(&self) -> &NewsPrefManager {
        &self.prefs
    }

    pub fn subscriptions(&self) -> SubscriptionsSnapshot {
        self.prefs.get_subscriptions()
    }

    /// Waits until the publisher directory has loaded or given up.
    pub async fn initialize(&self) -> InitializationState {
        self.initialization.on_once_initialized().await
    }

    pub async fn get_locale(&self) -> String {
        self.initialize().await;
        self.publishers_controller.get_last_locale().await
    }

    pub async fn get_publishers(&self) -> Publishers {
        self.initialize().await;
        self.publishers_controller
            .get_or_fetch_publishers(&self.subscriptions(), false)
            .await
    }

    pub async fn get_channels(&self) -> Channels {
        self.initialize().await;
        self.channels_controller.get_all_channels(&self.subscriptions()).await
    }

    pub fn set_publisher_pref(&self, publisher_id: &str, status: UserEnabled) {
        self.prefs.set_publisher_subscribed(publisher_id, status);
    }

    pub fn set_channel_subscribed(&self, locale: &str, channel: &str, subscribed: bool) {
        self.prefs.set_channel_subscribed(locale, channel, subscribed);
    }

    /// Follows `url` if it serves a readable feed. Returns the new (or
    /// existing) direct feed id, or `None` when nothing usable is there.
    pub async fn subscribe_to_new_direct_feed(&self, url: &Url) -> Option<Uuid> {
        let title = self.direct_feed_fetcher.verify_feed_url(url).await?;
        Some(self.prefs.add_direct_feed(url, &title))
    }

    pub async fn get_feed(&self) -> Arc<Feed> {
        self.initialize().await;
        self.feed_controller.get_or_fetch_feed(&self.subscriptions()).await
    }

    pub fn is_feed_update_available(&self, displayed_feed_hash: &str) -> bool {
        self.feed_controller.does_feed_version_differ(displayed_feed_hash)
    }

    /// Rebuilds the V1 feed if the remote feeds changed.
    pub async fn check_for_feed_update(&self) -> bool {
        self.feed_controller.update_if_remote_changed(&self.subscriptions()).await
    }

    pub async fn get_feed_v2(&self) -> Result<FeedV2> {
        self.initialize().await;
        self.feed_v2_builder.build_all_feed(&self.subscriptions()).await
    }

    pub async fn get_following_feed(&self) -> Result<FeedV2> {
        self.initialize().await;
        self.feed_v2_builder.build_following_feed(&self.subscriptions()).await
    }

    pub async fn get_channel_feed(&self, channel: &str) -> Result<FeedV2> {
        self.initialize().await;
        self.feed_v2_builder
            .build_channel_feed(&self.subscriptions(), channel)
            .await
    }

    pub async fn get_publisher_feed(&self, publisher_id: &str) -> Result<FeedV2> {
        self.initialize().await;
        self.feed_v2_builder
            .build_publisher_feed(&self.subscriptions(), publisher_id)
            .await
    }

    pub async fn get_signals(&self) -> Result<Signals> {
        self.initialize().await;
        self.feed_v2_builder.get_signals(&self.subscriptions()).await
    }

    pub async fn get_suggested_publisher_ids(&self) -> Result<Vec<String>> {
        let signals = self.get_signals().await?;
        Ok(self
            .suggestions_controller
            .get_suggested_publisher_ids(&self.subscriptions(), &signals)
            .await)
    }

    pub async fn get_latest_hash(&self, refetch_data: bool) -> Result<String> {
        self.initialize().await;
        self.feed_v2_builder
            .get_latest_hash(&self.subscriptions(), refetch_data)
            .await
    }

    /// Hash notifications for V2 feeds.
    pub fn add_feed_listener(&self) -> watch::Receiver<String> {
        self.feed_v2_builder.add_listener()
    }
}

impl Drop for BraveNewsEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.prefs.remove_observer(self.observer_id);
    }
}
