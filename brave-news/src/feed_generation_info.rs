use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;

use crate::config::RankingConfig;
use crate::feed_sampling::{get_article_infos, ArticleInfos, PickArticles};
use crate::subscriptions::SubscriptionsSnapshot;
use crate::types::{FeedItemMetadata, FeedItems, Publishers, Signals};

/// Everything one feed generation pass works on. Owns its copy of the data,
/// so a pass can run off the async runtime and consume articles freely.
pub struct FeedGenerationInfo {
    pub subscriptions: SubscriptionsSnapshot,
    pub locale: String,
    pub raw_feed_items: FeedItems,
    pub publishers: Publishers,
    /// Channels subscribed in `locale`.
    pub channels: Vec<String>,
    pub signals: Signals,
    pub suggested_publisher_ids: VecDeque<String>,
    pub config: RankingConfig,
    pub now: DateTime<Utc>,
    pub rng: StdRng,
    article_infos: Option<ArticleInfos>,
}

impl FeedGenerationInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscriptions: SubscriptionsSnapshot,
        locale: String,
        raw_feed_items: FeedItems,
        publishers: Publishers,
        channels: Vec<String>,
        signals: Signals,
        suggested_publisher_ids: Vec<String>,
        config: RankingConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            subscriptions,
            locale,
            raw_feed_items,
            publishers,
            channels,
            signals,
            suggested_publisher_ids: suggested_publisher_ids.into(),
            config,
            now: Utc::now(),
            rng,
            article_infos: None,
        }
    }

    /// The remaining pool, computed from the raw items on first use.
    pub fn article_infos(&mut self) -> &ArticleInfos {
        self.ensure_article_infos();
        self.article_infos.get_or_insert_with(Vec::new)
    }

    fn ensure_article_infos(&mut self) {
        if self.article_infos.is_none() {
            self.article_infos = Some(get_article_infos(
                &self.locale,
                &self.raw_feed_items,
                &self.publishers,
                &self.signals,
                &self.config,
                self.now,
            ));
        }
    }

    pub fn has_articles(&mut self) -> bool {
        !self.article_infos().is_empty()
    }

    /// Removes and returns the article `picker` selects.
    pub fn pick_and_consume(&mut self, picker: PickArticles<'_>) -> Option<FeedItemMetadata> {
        self.ensure_article_infos();
        let articles = self.article_infos.as_mut()?;
        let index = picker(articles, &mut self.rng)?;
        if index >= articles.len() {
            return None;
        }
        Some(articles.remove(index).0)
    }

    /// Takes up to `count` suggestions off the front of the queue.
    pub fn take_suggested_publisher_ids(&mut self, count: usize) -> Vec<String> {
        let count = count.min(self.suggested_publisher_ids.len());
        self.suggested_publisher_ids.drain(..count).collect()
    }

    /// Replaces the raw items; the pool is rebuilt on next use.
    pub fn set_raw_feed_items(&mut self, items: FeedItems) {
        self.raw_feed_items = items;
        self.article_infos = None;
    }
}
