use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use interfaces::HistoryQuerier;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channels_controller::{get_channels_from_publishers, subscribed_channels_in_locale};
use crate::config::{NewsConfig, PeekingCardConfig, RankingConfig};
use crate::feed_fetcher::FeedFetcher;
use crate::feed_generation_info::FeedGenerationInfo;
use crate::feed_v2_generation::{
    generate_all_feed, generate_channel_feed, generate_following_feed, generate_publisher_feed,
};
use crate::publishers_controller::PublishersController;
use crate::signal_calculator::SignalCalculator;
use crate::subscriptions::SubscriptionsSnapshot;
use crate::suggestions::SuggestionsController;
use crate::types::{
    Channels, ETags, FeedItems, FeedV2, FeedV2Error, FeedV2Type, NewsError, Publishers, PublisherType, Result,
    Signals, UserEnabled,
};
use crate::utils::rolling_hash;

/// Which cached inputs an update must refresh. Anything not refreshed is
/// still filled in when missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSettings {
    pub feed: bool,
    pub signals: bool,
    pub suggested_publishers: bool,
}

impl UpdateSettings {
    /// Whether an update running with these settings also satisfies `other`.
    pub fn is_sufficient(&self, other: &UpdateSettings) -> bool {
        !((other.feed && !self.feed)
            || (other.signals && !self.signals)
            || (other.suggested_publishers && !self.suggested_publishers))
    }

    pub fn also_update(&mut self, other: &UpdateSettings) {
        self.feed |= other.feed;
        self.signals |= other.signals;
        self.suggested_publishers |= other.suggested_publishers;
    }
}

struct UpdateRequest {
    subscriptions: SubscriptionsSnapshot,
    settings: UpdateSettings,
    waiters: Vec<oneshot::Sender<()>>,
}

impl UpdateRequest {
    fn new(subscriptions: SubscriptionsSnapshot, settings: UpdateSettings, waiter: oneshot::Sender<()>) -> Self {
        Self {
            subscriptions,
            settings,
            waiters: vec![waiter],
        }
    }
}

#[derive(Default)]
struct UpdateQueue {
    current: Option<UpdateRequest>,
    next: Option<UpdateRequest>,
}

#[derive(Default)]
struct BuilderData {
    raw_feed_items: FeedItems,
    feed_etags: ETags,
    signals: Signals,
    suggested_publisher_ids: Vec<String>,
    hash: String,
    subscribed_count: usize,
    // Bumped by every cache clear; updates started before it are stale.
    generation: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Hash identifying the inputs a feed was built from, and how many channels
/// and publishers the user follows.
pub fn get_feed_hash_and_subscribed_count(channels: &Channels, publishers: &Publishers, etags: &ETags) -> (String, usize) {
    let mut hash_items = Vec::new();
    let mut subscribed_count = 0;

    for (channel_id, channel) in channels {
        if !channel.subscribed_locales.is_empty() {
            hash_items.push(channel_id.clone());
            subscribed_count += 1;
        }
    }

    for (id, publisher) in publishers {
        if publisher.user_enabled_status == UserEnabled::Enabled || publisher.publisher_type == PublisherType::DirectSource {
            hash_items.push(id.clone());
            subscribed_count += 1;
        }
        // Hiding a publisher changes what can be shown.
        if publisher.user_enabled_status == UserEnabled::Disabled {
            hash_items.push(format!("{}_disabled", id));
        }
    }

    for (locale, etag) in etags {
        hash_items.push(format!("{}{}", locale, etag));
    }

    (rolling_hash(hash_items), subscribed_count)
}

/// Why a generated feed came back empty.
pub fn classify_empty_feed(subscribed_count: usize, has_publishers: bool, raw_item_count: usize) -> FeedV2Error {
    if subscribed_count == 0 && has_publishers {
        FeedV2Error::NoFeeds
    } else if raw_item_count == 0 {
        FeedV2Error::ConnectionError
    } else {
        FeedV2Error::NoArticles
    }
}

/// Builds V2 feeds.
///
/// Raw items, signals and suggestions are cached between builds and only
/// refreshed when a build asks for it, so repeated builds reshuffle the same
/// articles. At most one update runs at a time: callers whose needs the
/// running update covers wait on it, everyone else is folded into a single
/// queued update that starts when the running one finishes.
pub struct FeedV2Builder {
    publishers_controller: Arc<PublishersController>,
    fetcher: Arc<FeedFetcher>,
    signal_calculator: SignalCalculator,
    suggestions_controller: SuggestionsController,
    ranking: RankingConfig,
    peeking: PeekingCardConfig,
    data: Mutex<BuilderData>,
    queue: Mutex<UpdateQueue>,
    rng: Mutex<StdRng>,
    hash_tx: watch::Sender<String>,
    cancel: CancellationToken,
}

impl FeedV2Builder {
    pub fn new(
        fetcher: Arc<FeedFetcher>,
        publishers_controller: Arc<PublishersController>,
        history: Arc<dyn HistoryQuerier>,
        config: &NewsConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (hash_tx, _) = watch::channel(String::new());
        Self {
            fetcher,
            signal_calculator: SignalCalculator::new(publishers_controller.clone(), history, config.ranking.clone()),
            suggestions_controller: SuggestionsController::new(publishers_controller.clone()),
            publishers_controller,
            ranking: config.ranking.clone(),
            peeking: config.peeking.clone(),
            data: Mutex::new(BuilderData::default()),
            queue: Mutex::new(UpdateQueue::default()),
            rng: Mutex::new(StdRng::from_entropy()),
            hash_tx,
            cancel,
        }
    }

    /// Seeds the randomness behind the feeds generated from now on.
    pub fn reseed(&self, seed: u64) {
        *lock(&self.rng) = StdRng::seed_from_u64(seed);
    }

    /// Drops the cached items, signals and suggestions; the next build
    /// refetches everything.
    pub fn clear_cache(&self) {
        let mut data = lock(&self.data);
        data.raw_feed_items.clear();
        data.feed_etags.clear();
        data.signals.clear();
        data.suggested_publisher_ids.clear();
        data.generation += 1;
    }

    /// Receives the source hash after every completed update. The current
    /// hash is readable immediately.
    pub fn add_listener(&self) -> watch::Receiver<String> {
        self.hash_tx.subscribe()
    }

    pub async fn build_all_feed(self: &Arc<Self>, subscriptions: &SubscriptionsSnapshot) -> Result<FeedV2> {
        let peeking = self.peeking.clone();
        self.generate_feed(
            subscriptions,
            UpdateSettings {
                signals: true,
                suggested_publishers: true,
                ..Default::default()
            },
            FeedV2Type::All,
            move |info| generate_all_feed(info, &peeking),
        )
        .await
    }

    pub async fn build_following_feed(self: &Arc<Self>, subscriptions: &SubscriptionsSnapshot) -> Result<FeedV2> {
        let peeking = self.peeking.clone();
        self.generate_feed(
            subscriptions,
            UpdateSettings {
                signals: true,
                ..Default::default()
            },
            FeedV2Type::Following,
            move |info| generate_following_feed(info, &peeking),
        )
        .await
    }

    pub async fn build_channel_feed(self: &Arc<Self>, subscriptions: &SubscriptionsSnapshot, channel: &str) -> Result<FeedV2> {
        let peeking = self.peeking.clone();
        let channel = channel.to_string();
        self.generate_feed(
            subscriptions,
            UpdateSettings {
                signals: true,
                ..Default::default()
            },
            FeedV2Type::Channel(channel.clone()),
            move |info| generate_channel_feed(info, &channel, &peeking),
        )
        .await
    }

    pub async fn build_publisher_feed(
        self: &Arc<Self>,
        subscriptions: &SubscriptionsSnapshot,
        publisher_id: &str,
    ) -> Result<FeedV2> {
        let publisher_id = publisher_id.to_string();
        self.generate_feed(
            subscriptions,
            UpdateSettings {
                signals: true,
                ..Default::default()
            },
            FeedV2Type::Publisher(publisher_id.clone()),
            move |info| generate_publisher_feed(info, &publisher_id),
        )
        .await
    }

    pub async fn get_signals(self: &Arc<Self>, subscriptions: &SubscriptionsSnapshot) -> Result<Signals> {
        self.update_data(
            subscriptions,
            UpdateSettings {
                signals: true,
                ..Default::default()
            },
        )
        .await?;
        Ok(lock(&self.data).signals.clone())
    }

    /// The source hash for `subscriptions`, refetching the feed first when
    /// `refetch_data` is set.
    pub async fn get_latest_hash(self: &Arc<Self>, subscriptions: &SubscriptionsSnapshot, refetch_data: bool) -> Result<String> {
        self.update_data(
            subscriptions,
            UpdateSettings {
                feed: refetch_data,
                signals: true,
                suggested_publishers: true,
            },
        )
        .await?;
        Ok(self.refresh_hash(subscriptions).await)
    }

    /// Waits for an update covering `settings`, joining or queueing behind
    /// the running one.
    pub async fn update_data(self: &Arc<Self>, subscriptions: &SubscriptionsSnapshot, settings: UpdateSettings) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut guard = lock(&self.queue);
            let queue = &mut *guard;
            match queue.current.as_mut() {
                Some(current) if current.settings.is_sufficient(&settings) => {
                    current.waiters.push(tx);
                    false
                }
                Some(_) => {
                    match queue.next.as_mut() {
                        Some(next) => {
                            // The queued update uses the newest subscriptions.
                            next.subscriptions = subscriptions.clone();
                            next.settings.also_update(&settings);
                            next.waiters.push(tx);
                        }
                        None => queue.next = Some(UpdateRequest::new(subscriptions.clone(), settings, tx)),
                    }
                    false
                }
                None => {
                    queue.current = Some(UpdateRequest::new(subscriptions.clone(), settings, tx));
                    true
                }
            }
        };

        if start {
            let builder = self.clone();
            tokio::spawn(async move { builder.run_updates().await });
        }

        rx.await.map_err(|_| NewsError::Cancelled)
    }

    fn current_request(&self) -> Option<(SubscriptionsSnapshot, UpdateSettings)> {
        lock(&self.queue)
            .current
            .as_ref()
            .map(|request| (request.subscriptions.clone(), request.settings))
    }

    async fn run_updates(self: Arc<Self>) {
        while let Some((subscriptions, settings)) = self.current_request() {
            debug!("Starting feed update {:?}", settings);
            let completed = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Feed update cancelled");
                    let mut queue = lock(&self.queue);
                    queue.current = None;
                    queue.next = None;
                    return;
                }
                completed = self.run_update(&subscriptions, settings) => completed,
            };
            if !completed {
                debug!("Cache cleared during feed update, running it again");
                continue;
            }

            let waiters = {
                let mut queue = lock(&self.queue);
                let finished = queue.current.take();
                queue.current = queue.next.take();
                finished.map(|request| request.waiters).unwrap_or_default()
            };
            for waiter in waiters {
                let _ = waiter.send(());
            }

            let hash = lock(&self.data).hash.clone();
            self.hash_tx.send_replace(hash);
        }
    }

    /// Refreshes the cached inputs. Returns false, having stored nothing
    /// further, once the cache is cleared underneath it.
    async fn run_update(&self, subscriptions: &SubscriptionsSnapshot, settings: UpdateSettings) -> bool {
        let (generation, needs_fetch) = {
            let mut data = lock(&self.data);
            if settings.signals {
                data.signals.clear();
            }
            if settings.feed {
                data.raw_feed_items.clear();
            }
            if settings.suggested_publishers {
                data.suggested_publisher_ids.clear();
            }
            (data.generation, data.raw_feed_items.is_empty())
        };

        if needs_fetch {
            let (items, etags) = self.fetcher.fetch_feed(subscriptions).await;
            info!("Fetched {} feed items", items.len());
            let mut data = lock(&self.data);
            if data.generation != generation {
                return false;
            }
            data.raw_feed_items = items;
            data.feed_etags = etags;
        }

        let pending_items = {
            let data = lock(&self.data);
            data.signals.is_empty().then(|| data.raw_feed_items.clone())
        };
        if let Some(items) = pending_items {
            let signals = self.signal_calculator.get_signals(subscriptions, &items).await;
            let mut data = lock(&self.data);
            if data.generation != generation {
                return false;
            }
            data.signals = signals;
        }

        let pending_signals = {
            let data = lock(&self.data);
            data.suggested_publisher_ids.is_empty().then(|| data.signals.clone())
        };
        if let Some(signals) = pending_signals {
            let suggestions = self
                .suggestions_controller
                .get_suggested_publisher_ids(subscriptions, &signals)
                .await;
            let mut data = lock(&self.data);
            if data.generation != generation {
                return false;
            }
            data.suggested_publisher_ids = suggestions;
        }

        self.refresh_hash(subscriptions).await;
        true
    }

    async fn refresh_hash(&self, subscriptions: &SubscriptionsSnapshot) -> String {
        let publishers = self.publishers_controller.last_publishers().await;
        let channels = get_channels_from_publishers(&publishers, subscriptions);

        let mut data = lock(&self.data);
        let (hash, subscribed_count) = get_feed_hash_and_subscribed_count(&channels, &publishers, &data.feed_etags);
        data.hash = hash.clone();
        data.subscribed_count = subscribed_count;
        hash
    }

    async fn generate_feed<F>(
        self: &Arc<Self>,
        subscriptions: &SubscriptionsSnapshot,
        settings: UpdateSettings,
        feed_type: FeedV2Type,
        generator: F,
    ) -> Result<FeedV2>
    where
        F: FnOnce(FeedGenerationInfo) -> FeedV2 + Send + 'static,
    {
        self.update_data(subscriptions, settings).await?;

        let publishers = self.publishers_controller.last_publishers().await;
        let locale = self.publishers_controller.get_last_locale().await;
        let channels = subscribed_channels_in_locale(&get_channels_from_publishers(&publishers, subscriptions), &locale);
        let has_publishers = !publishers.is_empty();

        let (info, hash, subscribed_count, raw_item_count) = {
            let data = lock(&self.data);
            let rng = StdRng::seed_from_u64(lock(&self.rng).gen());
            let info = FeedGenerationInfo::new(
                subscriptions.clone(),
                locale,
                data.raw_feed_items.clone(),
                publishers,
                channels,
                data.signals.clone(),
                data.suggested_publisher_ids.clone(),
                self.ranking.clone(),
                rng,
            );
            (info, data.hash.clone(), data.subscribed_count, data.raw_feed_items.len())
        };

        let mut feed = tokio::task::spawn_blocking(move || generator(info))
            .await
            .map_err(|e| NewsError::General(format!("feed generation failed: {}", e)))?;

        feed.feed_type = feed_type;
        feed.construct_time = Some(Utc::now());
        feed.source_hash = hash;
        if feed.items.is_empty() {
            feed.error = Some(classify_empty_feed(subscribed_count, has_publishers, raw_item_count));
        }

        debug!(
            "Built {:?} feed with {} cards (error: {:?})",
            feed.feed_type,
            feed.items.len(),
            feed.error
        );
        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, LocaleInfo, Publisher};

    fn publisher(id: &str, publisher_type: PublisherType, status: UserEnabled) -> Publisher {
        Publisher {
            publisher_id: id.to_string(),
            publisher_type,
            publisher_name: id.to_string(),
            category_name: String::new(),
            is_enabled: true,
            locales: vec![LocaleInfo {
                locale: "en_US".to_string(),
                channels: vec![],
                rank: 0,
            }],
            site_url: None,
            feed_source: None,
            favicon_url: None,
            cover_url: None,
            background_color: None,
            user_enabled_status: status,
        }
    }

    #[test]
    fn sufficiency_and_merging() {
        let running = UpdateSettings {
            signals: true,
            suggested_publishers: true,
            ..Default::default()
        };
        assert!(running.is_sufficient(&UpdateSettings {
            signals: true,
            ..Default::default()
        }));
        assert!(running.is_sufficient(&UpdateSettings::default()));

        let refetch = UpdateSettings {
            feed: true,
            ..Default::default()
        };
        assert!(!running.is_sufficient(&refetch));

        let mut next = running;
        next.also_update(&refetch);
        assert_eq!(
            next,
            UpdateSettings {
                feed: true,
                signals: true,
                suggested_publishers: true
            }
        );
        assert!(next.is_sufficient(&refetch));
    }

    #[test]
    fn hash_tracks_follows_hides_and_etags() {
        let mut publishers = Publishers::new();
        publishers.insert("a".into(), publisher("a", PublisherType::CombinedSource, UserEnabled::Enabled));
        publishers.insert("b".into(), publisher("b", PublisherType::CombinedSource, UserEnabled::NotModified));
        publishers.insert("d".into(), publisher("d", PublisherType::DirectSource, UserEnabled::NotModified));

        let mut channels = Channels::new();
        channels.insert(
            "Top News".into(),
            Channel {
                channel_name: "Top News".into(),
                subscribed_locales: vec!["en_US".into()],
            },
        );
        channels.insert(
            "Cars".into(),
            Channel {
                channel_name: "Cars".into(),
                subscribed_locales: vec![],
            },
        );

        let mut etags = ETags::new();
        etags.insert("en_US".into(), "v1".into());

        let (hash, count) = get_feed_hash_and_subscribed_count(&channels, &publishers, &etags);
        assert_eq!(count, 3);
        assert_eq!(hash, rolling_hash(["Top News", "a", "d", "en_USv1"]));

        let mut hidden = publishers.clone();
        if let Some(b) = hidden.get_mut("b") {
            b.user_enabled_status = UserEnabled::Disabled;
        }
        let (hidden_hash, hidden_count) = get_feed_hash_and_subscribed_count(&channels, &hidden, &etags);
        assert_eq!(hidden_count, 3);
        assert_ne!(hidden_hash, hash);

        etags.insert("en_US".into(), "v2".into());
        assert_ne!(get_feed_hash_and_subscribed_count(&channels, &publishers, &etags).0, hash);
    }

    #[test]
    fn empty_feed_reasons() {
        assert_eq!(classify_empty_feed(0, true, 10), FeedV2Error::NoFeeds);
        assert_eq!(classify_empty_feed(0, false, 0), FeedV2Error::ConnectionError);
        assert_eq!(classify_empty_feed(2, true, 0), FeedV2Error::ConnectionError);
        assert_eq!(classify_empty_feed(2, true, 10), FeedV2Error::NoArticles);
    }
}
