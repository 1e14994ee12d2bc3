//! Weighted random selection over the ranking-time article pool.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;

use crate::config::RankingConfig;
use crate::types::{FeedItem, FeedItemMetadata, Publishers, Signals};

/// Ranking inputs derived for one article.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleMetadata {
    pub pop_recency: f64,
    pub weighting: f64,
    pub subscribed: bool,
    pub visited: bool,
    /// Neither followed nor visited; eligible for discovery picks.
    pub discoverable: bool,
}

pub type ArticleInfo = (FeedItemMetadata, ArticleMetadata);
pub type ArticleInfos = Vec<ArticleInfo>;

/// Picks an index into the pool, or nothing.
pub type PickArticles<'a> = &'a dyn Fn(&ArticleInfos, &mut StdRng) -> Option<usize>;

/// Popularity decayed by age: halves every half-life, doubled while fresh.
pub fn get_pop_recency(article: &FeedItemMetadata, config: &RankingConfig, now: DateTime<Utc>) -> f64 {
    let pop_score = if article.pop_score == 0.0 {
        config.default_pop_score
    } else {
        article.pop_score
    };

    let age = now.signed_duration_since(article.publish_time);
    let hours = (age.num_seconds() as f64 / 3600.0).max(0.0);
    let multiplier = if age.num_hours() < config.pop_recency_fresh_hours {
        2.0
    } else {
        1.0
    };

    multiplier * pop_score * 0.5f64.powf(hours / config.pop_recency_half_life_hours)
}

/// Builds the ranking pool: articles only, first occurrence of a URL wins,
/// unknown or disabled publishers dropped.
pub fn get_article_infos(
    locale: &str,
    feed_items: &[FeedItem],
    publishers: &Publishers,
    signals: &Signals,
    config: &RankingConfig,
    now: DateTime<Utc>,
) -> ArticleInfos {
    let mut seen_urls = HashSet::new();
    let mut infos = ArticleInfos::new();

    for item in feed_items {
        let FeedItem::Article(article) = item else {
            continue;
        };
        if !seen_urls.insert(article.url.clone()) {
            continue;
        }
        let Some(publisher) = publishers.get(&article.publisher_id) else {
            continue;
        };
        let Some(publisher_signal) = signals.get(&article.publisher_id) else {
            continue;
        };
        if publisher_signal.disabled {
            continue;
        }

        let article_signals = std::iter::once(publisher_signal).chain(
            publisher
                .channels_for_locale(locale)
                .iter()
                .filter_map(|channel| signals.get(channel)),
        );

        let mut subscribed = false;
        let mut visit_weight: f64 = 0.0;
        for signal in article_signals {
            subscribed |= signal.subscribed_weight != 0.0;
            visit_weight = visit_weight.max(signal.visit_weight);
        }

        let pop_recency = get_pop_recency(article, config, now);
        let subscription_projection = if subscribed {
            1.0
        } else {
            config.unsubscribed_weight
        };
        let weighting = (config.source_visits_min + publisher_signal.visit_weight) * subscription_projection * pop_recency;
        let visited = visit_weight != 0.0;

        infos.push((
            article.clone(),
            ArticleMetadata {
                pop_recency,
                weighting,
                subscribed,
                visited,
                discoverable: !subscribed && !visited,
            },
        ));
    }

    infos
}

/// Roulette selection: the chance of an article is its weight over the total.
/// Articles weighted zero are never picked; an all-zero pool yields `None`.
pub fn pick_roulette_with_weighting(
    articles: &ArticleInfos,
    rng: &mut StdRng,
    weighting: impl Fn(&FeedItemMetadata, &ArticleMetadata) -> f64,
) -> Option<usize> {
    let weights: Vec<f64> = articles
        .iter()
        .map(|(article, meta)| weighting(article, meta).max(0.0))
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let target = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (index, weight) in weights.iter().enumerate() {
        if *weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last_positive = Some(index);
        if cumulative > target {
            return Some(index);
        }
    }
    // Float rounding can leave the target a hair past the final sum.
    last_positive
}

pub fn pick_roulette(articles: &ArticleInfos, rng: &mut StdRng) -> Option<usize> {
    pick_roulette_with_weighting(articles, rng, |_, meta| meta.weighting)
}

/// Roulette restricted to articles that can lead a block (they need an image).
pub fn pick_hero_roulette(articles: &ArticleInfos, rng: &mut StdRng) -> Option<usize> {
    pick_roulette_with_weighting(articles, rng, |article, meta| {
        if article.has_image() {
            meta.weighting
        } else {
            0.0
        }
    })
}

/// Roulette over unfamiliar sources only, weighted by popularity.
pub fn pick_discovery_roulette(articles: &ArticleInfos, rng: &mut StdRng) -> Option<usize> {
    pick_roulette_with_weighting(articles, rng, |_, meta| {
        if meta.discoverable {
            meta.pop_recency
        } else {
            0.0
        }
    })
}

/// Roulette over articles from `publisher_ids` (the members of a channel).
pub fn pick_channel_roulette(publisher_ids: &HashSet<String>, articles: &ArticleInfos, rng: &mut StdRng) -> Option<usize> {
    pick_roulette_with_weighting(articles, rng, |article, meta| {
        if publisher_ids.contains(&article.publisher_id) {
            meta.weighting
        } else {
            0.0
        }
    })
}

/// Ids of publishers registered under `channel` in `locale`.
pub fn channel_members(publishers: &Publishers, channel: &str, locale: &str) -> HashSet<String> {
    publishers
        .values()
        .filter(|p| p.channels_for_locale(locale).iter().any(|c| c == channel))
        .map(|p| p.publisher_id.clone())
        .collect()
}

pub fn pick_first_index(articles: &ArticleInfos, _rng: &mut StdRng) -> Option<usize> {
    if articles.is_empty() {
        None
    } else {
        Some(0)
    }
}

/// A normally distributed integer in `[min, max)`, centred on the middle of
/// the range (Box–Muller).
pub fn get_normal(rng: &mut StdRng, min: usize, max: usize) -> usize {
    if max <= min + 1 {
        return min;
    }
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

    let mean = (min + max - 1) as f64 / 2.0;
    let std_dev = (max - min) as f64 / 4.0;
    let value = (mean + z * std_dev).round();
    value.clamp(min as f64, (max - 1) as f64) as usize
}

pub fn toss_coin(rng: &mut StdRng) -> bool {
    rng.gen_bool(0.5)
}

pub fn pick_random<'a, T>(rng: &mut StdRng, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    items.get(rng.gen_range(0..items.len()))
}
