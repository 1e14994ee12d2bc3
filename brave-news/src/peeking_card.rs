//! Picks the article previewed under the new tab page, before the user
//! scrolls into the feed.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Local, Timelike, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;
use url::Url;

use crate::config::PeekingCardConfig;
use crate::feed_sampling::ArticleInfos;
use crate::subscriptions::SubscriptionsSnapshot;
use crate::types::{FeedItemMetadata, TOP_NEWS_CHANNEL};

const ENTERTAINMENT_CHANNEL: &str = "Entertainment";

/// Multiplier for how recently an article was published.
pub fn recency_multiplier(publish_time: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let hours = now.signed_duration_since(publish_time).num_seconds().max(0) as f64 / 3600.0;
    match hours {
        h if h <= 1.0 => 1.5,
        h if h <= 3.0 => 1.3,
        h if h <= 6.0 => 1.2,
        h if h <= 24.0 => 1.1,
        h => (1.1 * 0.5f64.powf((h / 24.0 - 1.0) / 1.1)).max(0.1),
    }
}

/// Extra score for channels that suit the current time of day.
pub fn contextual_boost(article: &FeedItemMetadata, local_now: DateTime<Local>, config: &PeekingCardConfig) -> f64 {
    let hour = local_now.hour();
    let in_channel = |name: &str| article.channels.iter().any(|c| c == name) || article.category_name == name;

    if (6..10).contains(&hour) && in_channel(TOP_NEWS_CHANNEL) {
        config.contextual_boost
    } else if (17..22).contains(&hour) && in_channel(ENTERTAINMENT_CHANNEL) {
        config.contextual_boost
    } else {
        0.0
    }
}

fn subscribed_channels(subscriptions: &SubscriptionsSnapshot) -> BTreeSet<&str> {
    subscriptions
        .channels()
        .values()
        .flatten()
        .map(String::as_str)
        .collect()
}

/// Score for one article, or `None` when nothing the user follows relates
/// to it.
pub fn score_article(
    article: &FeedItemMetadata,
    subscriptions: &SubscriptionsSnapshot,
    channels: &BTreeSet<&str>,
    top_story_urls: &BTreeSet<Url>,
    config: &PeekingCardConfig,
    now: DateTime<Utc>,
    local_now: DateTime<Local>,
) -> Option<f64> {
    if subscriptions.disabled_publishers().contains(&article.publisher_id) {
        return None;
    }

    let base = if subscriptions.is_direct_feed(&article.publisher_id) {
        config.direct_feed_boost
    } else if subscriptions.enabled_publishers().contains(&article.publisher_id) {
        config.publisher_boost
    } else if article.channels.iter().any(|c| channels.contains(c.as_str())) {
        config.channel_boost
    } else {
        return None;
    };

    let top_story = if top_story_urls.contains(&article.url) {
        config.top_story_multiplier
    } else {
        1.0
    };

    Some(base * top_story * recency_multiplier(article.publish_time, now) + contextual_boost(article, local_now, config))
}

/// Chooses the peeking card from `articles`.
///
/// Candidates are the best scoring articles (at most `max_candidates`)
/// within the threshold ratio of the top score. No publisher may fill more
/// than its share of that set. The pick among survivors is uniform.
pub fn pick_peeking_card(
    subscriptions: &SubscriptionsSnapshot,
    top_story_urls: &BTreeSet<Url>,
    articles: &ArticleInfos,
    config: &PeekingCardConfig,
    local_now: DateTime<Local>,
    rng: &mut StdRng,
) -> Option<usize> {
    if subscriptions.is_empty() {
        return None;
    }

    let now = local_now.with_timezone(&Utc);
    let channels = subscribed_channels(subscriptions);

    let mut scored: Vec<(usize, f64)> = articles
        .iter()
        .enumerate()
        .filter_map(|(index, (article, _))| {
            score_article(article, subscriptions, &channels, top_story_urls, config, now, local_now)
                .map(|score| (index, score))
        })
        .collect();
    if scored.is_empty() {
        return None;
    }

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(config.max_candidates.max(1));

    let threshold = scored[0].1 * config.candidate_threshold_ratio;
    scored.retain(|(_, score)| *score >= threshold);

    let per_publisher = ((scored.len() as f64 * config.max_publisher_share).ceil() as usize).max(1);
    let mut taken: HashMap<&str, usize> = HashMap::new();
    let candidates: Vec<usize> = scored
        .iter()
        .filter(|(index, _)| {
            let count = taken.entry(articles[*index].0.publisher_id.as_str()).or_default();
            *count += 1;
            *count <= per_publisher
        })
        .map(|(index, _)| *index)
        .collect();

    debug!("Peeking card chosen from {} candidates", candidates.len());
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.gen_range(0..candidates.len())])
}
