use std::sync::Arc;

use crate::publishers_controller::PublishersController;
use crate::subscriptions::SubscriptionsSnapshot;
use crate::types::{Channel, Channels, Publishers};

/// Every channel any publisher is registered under, with the locales the user
/// follows it in.
pub fn get_channels_from_publishers(publishers: &Publishers, subscriptions: &SubscriptionsSnapshot) -> Channels {
    let mut channels = Channels::new();
    for publisher in publishers.values() {
        for locale_info in &publisher.locales {
            for channel_name in &locale_info.channels {
                let channel = channels.entry(channel_name.clone()).or_insert_with(|| Channel {
                    channel_name: channel_name.clone(),
                    subscribed_locales: Vec::new(),
                });
                if subscriptions.get_channel_subscribed(&locale_info.locale, channel_name)
                    && !channel.subscribed_locales.contains(&locale_info.locale)
                {
                    channel.subscribed_locales.push(locale_info.locale.clone());
                }
            }
        }
    }
    channels
}

/// Channel names subscribed in `locale`.
pub fn subscribed_channels_in_locale(channels: &Channels, locale: &str) -> Vec<String> {
    channels
        .values()
        .filter(|channel| channel.subscribed_locales.iter().any(|l| l == locale))
        .map(|channel| channel.channel_name.clone())
        .collect()
}

pub struct ChannelsController {
    publishers_controller: Arc<PublishersController>,
}

impl ChannelsController {
    pub fn new(publishers_controller: Arc<PublishersController>) -> Self {
        Self { publishers_controller }
    }

    pub async fn get_all_channels(&self, subscriptions: &SubscriptionsSnapshot) -> Channels {
        let publishers = self
            .publishers_controller
            .get_or_fetch_publishers(subscriptions, false)
            .await;
        get_channels_from_publishers(&publishers, subscriptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    use crate::types::{LocaleInfo, Publisher, PublisherType, UserEnabled};

    fn publisher(id: &str, locales: &[(&str, &[&str])]) -> Publisher {
        Publisher {
            publisher_id: id.to_string(),
            publisher_type: PublisherType::CombinedSource,
            publisher_name: id.to_string(),
            category_name: String::new(),
            is_enabled: true,
            locales: locales
                .iter()
                .map(|(locale, channels)| LocaleInfo {
                    locale: locale.to_string(),
                    channels: channels.iter().map(|c| c.to_string()).collect(),
                    rank: 0,
                })
                .collect(),
            site_url: None,
            feed_source: None,
            favicon_url: None,
            cover_url: None,
            background_color: None,
            user_enabled_status: UserEnabled::NotModified,
        }
    }

    #[test]
    fn derives_subscribed_locales() {
        let mut publishers = Publishers::new();
        publishers.insert("a".into(), publisher("a", &[("en_US", &["Top News", "Sports"]), ("en_GB", &["Top News"])]));
        publishers.insert("b".into(), publisher("b", &[("ja_JP", &["Technology"])]));

        let mut subscribed = BTreeMap::new();
        subscribed.insert("en_US".to_string(), vec!["Top News".to_string()]);
        subscribed.insert("en_GB".to_string(), vec!["Top News".to_string()]);
        let subs = SubscriptionsSnapshot::new(BTreeSet::new(), BTreeSet::new(), vec![], subscribed);

        let channels = get_channels_from_publishers(&publishers, &subs);
        assert_eq!(channels.len(), 3);
        let mut top_news = channels["Top News"].subscribed_locales.clone();
        top_news.sort();
        assert_eq!(top_news, vec!["en_GB".to_string(), "en_US".to_string()]);
        assert!(channels["Sports"].subscribed_locales.is_empty());
        assert_eq!(subscribed_channels_in_locale(&channels, "en_US"), vec!["Top News".to_string()]);
    }
}
