use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::publishers_controller::PublishersController;
use crate::subscriptions::SubscriptionsSnapshot;
use crate::types::{Publishers, Signals};

/// Publishers worth suggesting in `locale`: not followed, not hidden, with
/// some evidence of interest, most visited first and then most active.
pub fn rank_suggested_publishers(publishers: &Publishers, signals: &Signals, locale: &str) -> Vec<String> {
    let mut candidates: Vec<(&str, f64, u32)> = publishers
        .values()
        .filter(|p| !p.is_direct() && !p.is_user_subscribed() && !p.is_user_disabled())
        .filter(|p| p.locales.iter().any(|l| l.locale == locale))
        .filter_map(|p| {
            let signal = signals.get(&p.publisher_id)?;
            if signal.disabled || (signal.visit_weight == 0.0 && signal.article_count == 0) {
                return None;
            }
            Some((p.publisher_id.as_str(), signal.visit_weight, signal.article_count))
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(b.2.cmp(&a.2))
            .then(a.0.cmp(b.0))
    });

    candidates.into_iter().map(|(id, _, _)| id.to_string()).collect()
}

pub struct SuggestionsController {
    publishers_controller: Arc<PublishersController>,
}

impl SuggestionsController {
    pub fn new(publishers_controller: Arc<PublishersController>) -> Self {
        Self { publishers_controller }
    }

    pub async fn get_suggested_publisher_ids(&self, subscriptions: &SubscriptionsSnapshot, signals: &Signals) -> Vec<String> {
        let publishers = self
            .publishers_controller
            .get_or_fetch_publishers(subscriptions, false)
            .await;
        let locale = self.publishers_controller.get_last_locale().await;
        let suggestions = rank_suggested_publishers(&publishers, signals, &locale);
        debug!("{} publisher suggestions for {}", suggestions.len(), locale);
        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LocaleInfo, Publisher, PublisherType, Signal, UserEnabled};

    fn publisher(id: &str, status: UserEnabled) -> Publisher {
        Publisher {
            publisher_id: id.to_string(),
            publisher_type: PublisherType::CombinedSource,
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

    fn signal(visit_weight: f64, article_count: u32) -> Signal {
        Signal {
            disabled: false,
            subscribed_weight: 0.0,
            visit_weight,
            article_count,
        }
    }

    #[test]
    fn ranks_unfollowed_by_visits_then_articles() {
        let mut publishers = Publishers::new();
        for (id, status) in [
            ("busy", UserEnabled::NotModified),
            ("visited", UserEnabled::NotModified),
            ("quiet", UserEnabled::NotModified),
            ("followed", UserEnabled::Enabled),
            ("hidden", UserEnabled::Disabled),
            ("idle", UserEnabled::NotModified),
        ] {
            publishers.insert(id.to_string(), publisher(id, status));
        }

        let mut signals = Signals::new();
        signals.insert("busy".into(), signal(0.0, 9));
        signals.insert("visited".into(), signal(0.4, 1));
        signals.insert("quiet".into(), signal(0.0, 2));
        signals.insert("followed".into(), signal(0.9, 9));
        signals.insert("hidden".into(), signal(0.9, 9));
        signals.insert("idle".into(), signal(0.0, 0));

        let ranked = rank_suggested_publishers(&publishers, &signals, "en_US");
        assert_eq!(ranked, vec!["visited", "busy", "quiet"]);
        assert!(rank_suggested_publishers(&publishers, &signals, "ja_JP").is_empty());
    }
}
