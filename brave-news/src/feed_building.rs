//! The paged (V1) feed: a featured article plus pages of typed cards laid
//! out from a fixed content order.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::config::RankingConfig;
use crate::types::{
    CardType, Channels, Feed, FeedItem, FeedItemMetadata, Page, PageItem, PublisherType, Publishers, UserEnabled,
    TOP_NEWS_CHANNEL,
};
use crate::utils::{normalize_host, rolling_hash};

const GROUP_SIZE: usize = 3;

/// Whether `item` may be shown given the publisher directory and the
/// derived channel subscriptions.
pub fn should_display_feed_item(item: &FeedItem, publishers: &Publishers, channels: &Channels) -> bool {
    let data = item.metadata();
    let Some(publisher) = publishers.get(&data.publisher_id) else {
        debug!("Hiding item from unknown publisher {}", data.publisher_id);
        return false;
    };

    if publisher.publisher_type == PublisherType::DirectSource {
        return true;
    }

    match publisher.user_enabled_status {
        UserEnabled::Disabled => false,
        UserEnabled::Enabled => true,
        UserEnabled::NotModified => {
            publisher.is_enabled
                || publisher.locales.iter().any(|locale_info| {
                    locale_info.channels.iter().any(|channel| {
                        channels
                            .get(channel)
                            .is_some_and(|c| c.subscribed_locales.contains(&locale_info.locale))
                    })
                })
        }
    }
}

fn is_top_news(data: &FeedItemMetadata) -> bool {
    data.category_name == TOP_NEWS_CHANNEL || data.channels.iter().any(|c| c == TOP_NEWS_CHANNEL)
}

/// Removes up to `max` entries matching `pred`, keeping order.
fn take_matching<T>(queue: &mut VecDeque<T>, max: usize, pred: impl Fn(&T) -> bool) -> Vec<T> {
    let mut taken = Vec::new();
    let mut index = 0;
    while index < queue.len() && taken.len() < max {
        if pred(&queue[index]) {
            if let Some(item) = queue.remove(index) {
                taken.push(item);
            }
        } else {
            index += 1;
        }
    }
    taken
}

struct PagePools {
    articles: VecDeque<FeedItem>,
    deals: VecDeque<FeedItem>,
    promoted: VecDeque<FeedItem>,
}

impl PagePools {
    fn take(&mut self, card_type: CardType) -> Vec<FeedItem> {
        match card_type {
            CardType::Headline => self.articles.pop_front().into_iter().collect(),
            CardType::HeadlinePaired => {
                if self.articles.len() < 2 {
                    return Vec::new();
                }
                self.articles.drain(..2).collect()
            }
            CardType::CategoryGroup => {
                let Some(category) = self
                    .articles
                    .iter()
                    .map(|item| item.metadata().category_name.clone())
                    .find(|c| !c.is_empty())
                else {
                    return Vec::new();
                };
                take_matching(&mut self.articles, GROUP_SIZE, |item| item.metadata().category_name == category)
            }
            CardType::PublisherGroup => {
                let Some(publisher_id) = self.articles.front().map(|item| item.metadata().publisher_id.clone()) else {
                    return Vec::new();
                };
                take_matching(&mut self.articles, GROUP_SIZE, |item| item.metadata().publisher_id == publisher_id)
            }
            CardType::Deals => {
                let count = self.deals.len().min(GROUP_SIZE);
                self.deals.drain(..count).collect()
            }
            CardType::PromotedArticle => self.promoted.pop_front().into_iter().collect(),
        }
    }
}

/// Lays out a V1 feed. Scores are lower-is-better; visited hosts and
/// followed sources get a bonus subtracted.
pub fn build_feed(
    items: &[FeedItem],
    history_hosts: &HashSet<String>,
    publishers: &Publishers,
    channels: &Channels,
    config: &RankingConfig,
) -> Feed {
    let mut seen = HashSet::new();
    let mut articles = Vec::new();
    let mut deals = VecDeque::new();
    let mut promoted = VecDeque::new();

    for item in items {
        if !seen.insert(item.url().clone()) || !should_display_feed_item(item, publishers, channels) {
            continue;
        }
        match item {
            FeedItem::Article(_) => {
                let mut item = item.clone();
                let data = item.metadata_mut();
                if data.host().is_some_and(|host| history_hosts.contains(normalize_host(host))) {
                    data.score -= config.history_score_boost;
                }
                if publishers
                    .get(&data.publisher_id)
                    .is_some_and(|p| p.is_user_subscribed())
                {
                    data.score -= config.subscribed_score_boost;
                }
                articles.push(item);
            }
            FeedItem::Deal { .. } => deals.push_back(item.clone()),
            FeedItem::PromotedArticle { .. } => promoted.push_back(item.clone()),
        }
    }

    articles.sort_by(|a, b| a.metadata().score.total_cmp(&b.metadata().score));

    let featured_index = articles.iter().position(|item| is_top_news(item.metadata()));
    let featured_item = featured_index.map(|index| articles.remove(index));

    let mut pools = PagePools {
        articles: articles.into(),
        deals,
        promoted,
    };

    let mut pages = Vec::new();
    loop {
        let page = Page {
            items: config
                .page_content_order
                .iter()
                .filter_map(|card_type| {
                    let items = pools.take(*card_type);
                    (!items.is_empty()).then_some(PageItem {
                        card_type: *card_type,
                        items,
                    })
                })
                .collect(),
        };
        if page.items.is_empty() {
            break;
        }
        pages.push(page);
    }

    let mut feed = Feed {
        hash: String::new(),
        featured_item,
        pages,
    };
    feed.hash = rolling_hash(
        feed.featured_item
            .iter()
            .chain(feed.page_items())
            .map(|item| item.url().as_str()),
    );

    debug!(
        "Built feed: {} pages, featured: {}",
        feed.pages.len(),
        feed.featured_item.is_some()
    );
    feed
}
