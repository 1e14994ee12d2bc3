use std::collections::{BTreeMap, BTreeSet};

use crate::types::{DirectFeed, UserEnabled};

/// Point-in-time view of what the user follows and hides.
///
/// Built fresh from preferences on every read; never mutated after
/// construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionsSnapshot {
    enabled_publishers: BTreeSet<String>,
    disabled_publishers: BTreeSet<String>,
    direct_feeds: Vec<DirectFeed>,
    channels: BTreeMap<String, Vec<String>>,
}

/// Ids whose subscription state changed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionsDiff {
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl SubscriptionsDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

impl SubscriptionsSnapshot {
    /// A publisher listed as both enabled and disabled is kept as disabled.
    pub fn new(
        enabled_publishers: BTreeSet<String>,
        disabled_publishers: BTreeSet<String>,
        direct_feeds: Vec<DirectFeed>,
        channels: BTreeMap<String, Vec<String>>,
    ) -> Self {
        let enabled_publishers = enabled_publishers
            .into_iter()
            .filter(|id| !disabled_publishers.contains(id))
            .collect();
        Self {
            enabled_publishers,
            disabled_publishers,
            direct_feeds,
            channels,
        }
    }

    pub fn enabled_publishers(&self) -> &BTreeSet<String> {
        &self.enabled_publishers
    }

    pub fn disabled_publishers(&self) -> &BTreeSet<String> {
        &self.disabled_publishers
    }

    pub fn direct_feeds(&self) -> &[DirectFeed] {
        &self.direct_feeds
    }

    /// Locale → subscribed channel names.
    pub fn channels(&self) -> &BTreeMap<String, Vec<String>> {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.enabled_publishers.is_empty()
            && self.direct_feeds.is_empty()
            && self.channels.values().all(|c| c.is_empty())
    }

    pub fn get_publisher_status(&self, publisher_id: &str) -> UserEnabled {
        if self.disabled_publishers.contains(publisher_id) {
            UserEnabled::Disabled
        } else if self.enabled_publishers.contains(publisher_id) {
            UserEnabled::Enabled
        } else {
            UserEnabled::NotModified
        }
    }

    pub fn is_direct_feed(&self, publisher_id: &str) -> bool {
        self.direct_feeds
            .iter()
            .any(|feed| feed.publisher_id() == publisher_id)
    }

    pub fn get_channel_subscribed(&self, locale: &str, channel: &str) -> bool {
        self.channels
            .get(locale)
            .is_some_and(|channels| channels.iter().any(|c| c == channel))
    }

    /// Every locale `channel` is subscribed in.
    pub fn get_channel_locales(&self, channel: &str) -> Vec<String> {
        self.channels
            .iter()
            .filter(|(_, channels)| channels.iter().any(|c| c == channel))
            .map(|(locale, _)| locale.clone())
            .collect()
    }

    /// Locales with at least one subscribed channel.
    pub fn subscribed_channel_locales(&self) -> BTreeSet<String> {
        self.channels
            .iter()
            .filter(|(_, channels)| !channels.is_empty())
            .map(|(locale, _)| locale.clone())
            .collect()
    }

    /// Publishers whose status differs between `old` and `self`, plus direct
    /// feeds that were added (`changed`) or dropped (`removed`).
    pub fn diff_publishers(&self, old: &SubscriptionsSnapshot) -> SubscriptionsDiff {
        let mut changed = BTreeSet::new();
        changed.extend(self.enabled_publishers.difference(&old.enabled_publishers).cloned());
        changed.extend(self.disabled_publishers.difference(&old.disabled_publishers).cloned());
        changed.extend(old.enabled_publishers.difference(&self.enabled_publishers).cloned());
        changed.extend(old.disabled_publishers.difference(&self.disabled_publishers).cloned());

        let new_feeds: BTreeSet<String> =
            self.direct_feeds.iter().map(DirectFeed::publisher_id).collect();
        let old_feeds: BTreeSet<String> =
            old.direct_feeds.iter().map(DirectFeed::publisher_id).collect();
        changed.extend(new_feeds.difference(&old_feeds).cloned());
        let removed = old_feeds.difference(&new_feeds).cloned().collect();

        SubscriptionsDiff {
            changed: changed.into_iter().collect(),
            removed,
        }
    }

    /// Channels subscribed or unsubscribed in any locale between `old` and
    /// `self`.
    pub fn diff_channels(&self, old: &SubscriptionsSnapshot) -> SubscriptionsDiff {
        let mut changed = BTreeSet::new();
        let locales: BTreeSet<&String> = self.channels.keys().chain(old.channels.keys()).collect();
        for locale in locales {
            let new: BTreeSet<&String> = self.channels.get(locale).into_iter().flatten().collect();
            let prior: BTreeSet<&String> = old.channels.get(locale).into_iter().flatten().collect();
            changed.extend(new.symmetric_difference(&prior).map(|c| c.to_string()));
        }

        SubscriptionsDiff {
            changed: changed.into_iter().collect(),
            removed: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use uuid::Uuid;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn publisher_diff_is_symmetric_difference() {
        let a = SubscriptionsSnapshot::new(ids(&["One", "Two"]), ids(&["Three", "Four"]), vec![], BTreeMap::new());
        let b = SubscriptionsSnapshot::new(ids(&["One", "Five"]), ids(&["Three", "Six"]), vec![], BTreeMap::new());

        let diff = b.diff_publishers(&a);
        let changed: BTreeSet<_> = diff.changed.iter().cloned().collect();
        assert_eq!(changed, ids(&["Five", "Six", "Two", "Four"]));
        assert_eq!(diff.changed.len(), 4);
        assert!(diff.removed.is_empty());

        let reverse: BTreeSet<_> = a.diff_publishers(&b).changed.into_iter().collect();
        assert_eq!(reverse, changed);
    }

    #[test]
    fn direct_feed_diff_tracks_added_and_removed() {
        let kept = DirectFeed::new(Uuid::new_v4(), Url::parse("https://a.example/rss").unwrap(), "A");
        let dropped = DirectFeed::new(Uuid::new_v4(), Url::parse("https://b.example/rss").unwrap(), "B");
        let added = DirectFeed::new(Uuid::new_v4(), Url::parse("https://c.example/rss").unwrap(), "C");

        let old = SubscriptionsSnapshot::new(
            BTreeSet::new(),
            BTreeSet::new(),
            vec![kept.clone(), dropped.clone()],
            BTreeMap::new(),
        );
        let new = SubscriptionsSnapshot::new(BTreeSet::new(), BTreeSet::new(), vec![kept, added.clone()], BTreeMap::new());

        let diff = new.diff_publishers(&old);
        assert_eq!(diff.changed, vec![added.publisher_id()]);
        assert_eq!(diff.removed, vec![dropped.publisher_id()]);
    }

    #[test]
    fn channel_diff_covers_each_locale() {
        let mut old_channels = BTreeMap::new();
        old_channels.insert("en_US".to_string(), vec!["Top News".to_string(), "Sports".to_string()]);
        let mut new_channels = BTreeMap::new();
        new_channels.insert("en_US".to_string(), vec!["Top News".to_string()]);
        new_channels.insert("ja_JP".to_string(), vec!["Technology".to_string()]);

        let old = SubscriptionsSnapshot::new(BTreeSet::new(), BTreeSet::new(), vec![], old_channels);
        let new = SubscriptionsSnapshot::new(BTreeSet::new(), BTreeSet::new(), vec![], new_channels);

        let diff = new.diff_channels(&old);
        assert_eq!(diff.changed, vec!["Sports".to_string(), "Technology".to_string()]);
        assert_eq!(new.get_channel_locales("Technology"), vec!["ja_JP".to_string()]);
        assert!(new.get_channel_subscribed("en_US", "Top News"));
        assert!(!new.get_channel_subscribed("en_US", "Sports"));
    }

    #[test]
    fn disabled_wins_over_enabled() {
        let snapshot = SubscriptionsSnapshot::new(ids(&["One"]), ids(&["One"]), vec![], BTreeMap::new());
        assert_eq!(snapshot.get_publisher_status("One"), UserEnabled::Disabled);
        assert!(snapshot.enabled_publishers().is_empty());
        assert_eq!(snapshot.get_publisher_status("Other"), UserEnabled::NotModified);
    }
}
