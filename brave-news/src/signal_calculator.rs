use std::collections::HashMap;
use std::sync::Arc;

use interfaces::{HistoryEntry, HistoryQuerier, HistoryQuery};
use tracing::debug;

use crate::channels_controller::get_channels_from_publishers;
use crate::config::RankingConfig;
use crate::publishers_controller::PublishersController;
use crate::subscriptions::SubscriptionsSnapshot;
use crate::types::{FeedItem, Publisher, Publishers, Signal, Signals};
use crate::utils::normalize_host;

/// Visit counts per (normalized) host.
pub fn group_visits_by_host(history: &[HistoryEntry]) -> HashMap<String, u32> {
    let mut visits = HashMap::new();
    for entry in history {
        if let Some(host) = entry.host() {
            *visits.entry(normalize_host(host).to_string()).or_default() += 1;
        }
    }
    visits
}

fn publisher_visits(publisher: &Publisher, origin_visits: &HashMap<String, u32>) -> u32 {
    let site = publisher.site_host().map(normalize_host);
    let feed = publisher.feed_host().map(normalize_host);
    let count = |host: Option<&str>| host.and_then(|h| origin_visits.get(h)).copied().unwrap_or(0);

    if site == feed {
        count(site)
    } else {
        count(site) + count(feed)
    }
}

/// Pure signal computation over already-gathered inputs. Running it twice on
/// the same inputs gives the same map.
pub fn calculate_signals(
    locale: &str,
    publishers: &Publishers,
    subscriptions: &SubscriptionsSnapshot,
    feed_items: &[FeedItem],
    history: &[HistoryEntry],
    config: &RankingConfig,
) -> Signals {
    let origin_visits = group_visits_by_host(history);

    let mut article_counts: HashMap<&str, u32> = HashMap::new();
    for item in feed_items {
        *article_counts.entry(item.metadata().publisher_id.as_str()).or_default() += 1;
    }

    let visits: HashMap<&str, u32> = publishers
        .iter()
        .map(|(id, publisher)| (id.as_str(), publisher_visits(publisher, &origin_visits)))
        .collect();
    // Starts at one so a single visit never dominates and zero never divides.
    let total_visits = 1 + visits.values().sum::<u32>();

    let mut signals = Signals::new();
    for (id, publisher) in publishers {
        let disabled = publisher.is_user_disabled();
        let subscribed_weight = if !disabled && publisher.is_user_subscribed() {
            config.source_subscribed_boost
        } else {
            0.0
        };
        let visit_weight = if disabled {
            0.0
        } else {
            f64::from(visits[id.as_str()]) / f64::from(total_visits)
        };

        signals.insert(
            id.clone(),
            Signal {
                disabled,
                subscribed_weight,
                visit_weight,
                article_count: article_counts.get(id.as_str()).copied().unwrap_or(0),
            },
        );
    }

    let channels = get_channels_from_publishers(publishers, subscriptions);
    for (channel_id, channel) in &channels {
        let mut channel_visits = 0u32;
        let mut article_count = 0u32;
        for (id, publisher) in publishers {
            if publisher.is_user_disabled() || !publisher.channels_for_locale(locale).contains(channel_id) {
                continue;
            }
            channel_visits += visits[id.as_str()];
            article_count += article_counts.get(id.as_str()).copied().unwrap_or(0);
        }

        let subscribed = channel.subscribed_locales.iter().any(|l| l == locale);
        signals.insert(
            channel_id.clone(),
            Signal {
                disabled: false,
                subscribed_weight: if subscribed {
                    config.channel_subscribed_boost
                } else {
                    0.0
                },
                visit_weight: f64::from(channel_visits) / f64::from(total_visits),
                article_count,
            },
        );
    }

    debug!(
        "Calculated {} publisher and {} channel signals ({} visits)",
        publishers.len(),
        channels.len(),
        total_visits - 1
    );
    signals
}

/// Joins history and subscription state against the publisher directory.
pub struct SignalCalculator {
    publishers_controller: Arc<PublishersController>,
    history: Arc<dyn HistoryQuerier>,
    config: RankingConfig,
}

impl SignalCalculator {
    pub fn new(
        publishers_controller: Arc<PublishersController>,
        history: Arc<dyn HistoryQuerier>,
        config: RankingConfig,
    ) -> Self {
        Self {
            publishers_controller,
            history,
            config,
        }
    }

    pub async fn get_signals(&self, subscriptions: &SubscriptionsSnapshot, feed_items: &[FeedItem]) -> Signals {
        let publishers = self
            .publishers_controller
            .get_or_fetch_publishers(subscriptions, false)
            .await;
        let locale = self.publishers_controller.get_last_locale().await;
        let history = self
            .history
            .query(HistoryQuery::recent(self.config.history_max_results, self.config.history_days))
            .await;

        calculate_signals(&locale, &publishers, subscriptions, feed_items, &history, &self.config)
    }
}
