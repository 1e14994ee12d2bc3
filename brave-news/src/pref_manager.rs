use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use interfaces::PrefService;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::channel_migrator::{legacy_names, migrate_channel};
use crate::subscriptions::{SubscriptionsDiff, SubscriptionsSnapshot};
use crate::types::{DirectFeed, UserEnabled};

pub const PREF_OPTED_IN: &str = "brave.today.opted_in";
pub const PREF_SHOW_ON_NTP: &str = "brave.new_tab_page.show_brave_news";
pub const PREF_SOURCES: &str = "brave.today.sources";
pub const PREF_CHANNELS: &str = "brave.today.channels";
pub const PREF_DIRECT_FEEDS: &str = "brave.today.userfeeds";

const DIRECT_FEED_SOURCE_KEY: &str = "source_url";
const DIRECT_FEED_TITLE_KEY: &str = "title";

/// Receives preference changes. Called synchronously after the store has been
/// updated, with no internal locks held.
pub trait PrefObserver: Send + Sync {
    fn on_config_changed(&self) {}
    fn on_publishers_changed(&self, _diff: &SubscriptionsDiff) {}
    fn on_channels_changed(&self, _diff: &SubscriptionsDiff) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Observers {
    next_id: u64,
    entries: Vec<(ObserverId, Weak<dyn PrefObserver>)>,
}

/// Typed access to the News preferences and the owner of the change
/// notification registry.
pub struct NewsPrefManager {
    prefs: Arc<dyn PrefService>,
    // Serialises read-modify-write cycles on dictionary prefs.
    write_lock: Mutex<()>,
    observers: Mutex<Observers>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl NewsPrefManager {
    pub fn new(prefs: Arc<dyn PrefService>) -> Self {
        Self {
            prefs,
            write_lock: Mutex::new(()),
            observers: Mutex::new(Observers::default()),
        }
    }

    pub fn add_observer(&self, observer: Weak<dyn PrefObserver>) -> ObserverId {
        let mut observers = lock(&self.observers);
        let id = ObserverId(observers.next_id);
        observers.next_id += 1;
        observers.entries.push((id, observer));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) {
        lock(&self.observers).entries.retain(|(entry, _)| *entry != id);
    }

    fn live_observers(&self) -> Vec<Arc<dyn PrefObserver>> {
        let mut observers = lock(&self.observers);
        observers.entries.retain(|(_, weak)| weak.strong_count() > 0);
        observers
            .entries
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    pub fn is_opted_in(&self) -> bool {
        self.prefs.get_bool(PREF_OPTED_IN).unwrap_or(false)
    }

    pub fn is_showing_on_ntp(&self) -> bool {
        self.prefs.get_bool(PREF_SHOW_ON_NTP).unwrap_or(true)
    }

    /// News is active only when the user opted in and it is shown on the NTP.
    pub fn is_enabled(&self) -> bool {
        self.is_opted_in() && self.is_showing_on_ntp()
    }

    pub fn set_config(&self, opted_in: bool, show_on_ntp: bool) {
        self.prefs.set_bool(PREF_OPTED_IN, opted_in);
        self.prefs.set_bool(PREF_SHOW_ON_NTP, show_on_ntp);
        for observer in self.live_observers() {
            observer.on_config_changed();
        }
    }

    pub fn get_subscriptions(&self) -> SubscriptionsSnapshot {
        let mut enabled = BTreeSet::new();
        let mut disabled = BTreeSet::new();
        for (id, value) in self.get_dict(PREF_SOURCES) {
            match value.as_bool() {
                Some(true) => {
                    enabled.insert(id);
                }
                Some(false) => {
                    disabled.insert(id);
                }
                None => warn!("Ignoring non-boolean source pref for {}", id),
            }
        }

        SubscriptionsSnapshot::new(enabled, disabled, self.read_direct_feeds(), self.read_channels())
    }

    fn read_channels(&self) -> BTreeMap<String, Vec<String>> {
        let mut result = BTreeMap::new();
        for (locale, channels) in self.get_dict(PREF_CHANNELS) {
            let Some(channels) = channels.as_object() else {
                continue;
            };
            let mut subscribed: Vec<String> = Vec::new();
            for (name, value) in channels {
                if value.as_bool() != Some(true) {
                    continue;
                }
                let canonical = migrate_channel(name);
                if !subscribed.iter().any(|c| c == canonical) {
                    subscribed.push(canonical.to_string());
                }
            }
            result.insert(locale, subscribed);
        }
        result
    }

    fn read_direct_feeds(&self) -> Vec<DirectFeed> {
        self.get_dict(PREF_DIRECT_FEEDS)
            .into_iter()
            .filter_map(|(id, value)| {
                let id = Uuid::parse_str(&id).ok()?;
                let url = value
                    .get(DIRECT_FEED_SOURCE_KEY)
                    .and_then(Value::as_str)
                    .and_then(|s| Url::parse(s).ok())?;
                let title = value
                    .get(DIRECT_FEED_TITLE_KEY)
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Some(DirectFeed::new(id, url, title))
            })
            .collect()
    }

    /// Set a publisher's subscription status. Disabling a direct feed removes
    /// it entirely.
    pub fn set_publisher_subscribed(&self, publisher_id: &str, status: UserEnabled) {
        let before = {
            let _guard = lock(&self.write_lock);
            let before = self.get_subscriptions();
            if status == UserEnabled::Disabled && before.is_direct_feed(publisher_id) {
                let mut feeds = self.get_dict(PREF_DIRECT_FEEDS);
                feeds.remove(publisher_id);
                self.prefs.set(PREF_DIRECT_FEEDS, Value::Object(feeds));
            } else {
                let mut sources = self.get_dict(PREF_SOURCES);
                match status {
                    UserEnabled::Enabled => {
                        sources.insert(publisher_id.to_string(), Value::Bool(true));
                    }
                    UserEnabled::Disabled => {
                        sources.insert(publisher_id.to_string(), Value::Bool(false));
                    }
                    UserEnabled::NotModified => {
                        sources.remove(publisher_id);
                    }
                }
                self.prefs.set(PREF_SOURCES, Value::Object(sources));
            }
            before
        };
        self.notify_publishers_changed(&before);
    }

    /// Adds a direct feed, returning the existing id when `url` is already
    /// followed.
    pub fn add_direct_feed(&self, url: &Url, title: &str) -> Uuid {
        let (id, before) = {
            let _guard = lock(&self.write_lock);
            let before = self.get_subscriptions();
            if let Some(existing) = before.direct_feeds().iter().find(|feed| &feed.url == url) {
                debug!("Direct feed {} already present as {}", url, existing.id);
                return existing.id;
            }

            let id = Uuid::new_v4();
            let mut feeds = self.get_dict(PREF_DIRECT_FEEDS);
            feeds.insert(
                id.to_string(),
                json!({
                    DIRECT_FEED_SOURCE_KEY: url.as_str(),
                    DIRECT_FEED_TITLE_KEY: title,
                }),
            );
            self.prefs.set(PREF_DIRECT_FEEDS, Value::Object(feeds));
            (id, before)
        };
        self.notify_publishers_changed(&before);
        id
    }

    /// Subscribes or unsubscribes `channel` in `locale`. Legacy spellings of
    /// the channel are replaced by the canonical name.
    pub fn set_channel_subscribed(&self, locale: &str, channel: &str, subscribed: bool) {
        let canonical = migrate_channel(channel);
        let before = {
            let _guard = lock(&self.write_lock);
            let before = self.get_subscriptions();
            let mut channels = self.get_dict(PREF_CHANNELS);
            let mut locale_channels = channels
                .remove(locale)
                .and_then(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_default();
            for legacy in legacy_names(canonical) {
                locale_channels.remove(legacy);
            }
            locale_channels.insert(canonical.to_string(), Value::Bool(subscribed));
            channels.insert(locale.to_string(), Value::Object(locale_channels));
            self.prefs.set(PREF_CHANNELS, Value::Object(channels));
            before
        };

        let after = self.get_subscriptions();
        let diff = after.diff_channels(&before);
        if !diff.is_empty() {
            for observer in self.live_observers() {
                observer.on_channels_changed(&diff);
            }
        }
    }

    /// Rewrites stored channel subscriptions under their canonical names.
    /// A subscribed legacy entry always leaves the canonical one subscribed.
    pub fn migrate_channels(&self) {
        let _guard = lock(&self.write_lock);
        let mut channels = self.get_dict(PREF_CHANNELS);
        let mut migrated = 0usize;
        for locale_channels in channels.values_mut() {
            let Some(map) = locale_channels.as_object_mut() else {
                continue;
            };
            let legacy: Vec<(String, bool)> = map
                .iter()
                .filter(|(name, _)| migrate_channel(name) != name.as_str())
                .map(|(name, value)| (name.clone(), value.as_bool() == Some(true)))
                .collect();
            for (name, subscribed) in legacy {
                map.remove(&name);
                if subscribed {
                    map.insert(migrate_channel(&name).to_string(), Value::Bool(true));
                }
                migrated += 1;
            }
        }
        if migrated > 0 {
            debug!("Migrated {} legacy channel entries", migrated);
            self.prefs.set(PREF_CHANNELS, Value::Object(channels));
        }
    }

    fn notify_publishers_changed(&self, before: &SubscriptionsSnapshot) {
        let diff = self.get_subscriptions().diff_publishers(before);
        if diff.is_empty() {
            return;
        }
        for observer in self.live_observers() {
            observer.on_publishers_changed(&diff);
        }
    }

    fn get_dict(&self, key: &str) -> Map<String, Value> {
        match self.prefs.get(key) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::InMemoryPrefService;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn manager() -> NewsPrefManager {
        NewsPrefManager::new(Arc::new(InMemoryPrefService::new()))
    }

    #[derive(Default)]
    struct CountingObserver {
        publishers: AtomicUsize,
        channels: AtomicUsize,
    }

    impl PrefObserver for CountingObserver {
        fn on_publishers_changed(&self, _diff: &SubscriptionsDiff) {
            self.publishers.fetch_add(1, Ordering::SeqCst);
        }

        fn on_channels_changed(&self, _diff: &SubscriptionsDiff) {
            self.channels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn legacy_channel_reads_back_canonical() {
        let manager = manager();
        manager.set_channel_subscribed("en_US", "Tech News", true);
        manager.set_channel_subscribed("en_US", "Tech News", true);

        let subs = manager.get_subscriptions();
        assert_eq!(subs.channels()["en_US"], vec!["Technology".to_string()]);
        assert!(subs.get_channel_subscribed("en_US", "Technology"));
        assert!(!subs.get_channel_subscribed("en_US", "Tech News"));
    }

    #[test]
    fn stored_legacy_entries_are_migrated() {
        let prefs = Arc::new(InMemoryPrefService::new());
        prefs.set(PREF_CHANNELS, json!({"en_US": {"Sport": true, "Tech Reviews": false}}));
        let manager = NewsPrefManager::new(prefs.clone());

        assert!(manager.get_subscriptions().get_channel_subscribed("en_US", "Sports"));
        manager.migrate_channels();
        manager.migrate_channels();
        assert_eq!(prefs.get(PREF_CHANNELS), Some(json!({"en_US": {"Sports": true}})));
    }

    #[test]
    fn unsubscribing_canonical_clears_legacy() {
        let prefs = Arc::new(InMemoryPrefService::new());
        prefs.set(PREF_CHANNELS, json!({"en_US": {"Sport": true}}));
        let manager = NewsPrefManager::new(prefs);

        manager.set_channel_subscribed("en_US", "Sports", false);
        assert!(!manager.get_subscriptions().get_channel_subscribed("en_US", "Sports"));
    }

    #[test]
    fn direct_feed_is_deduplicated_by_url() {
        let manager = manager();
        let url = Url::parse("https://example.com/feed.xml").unwrap();
        let first = manager.add_direct_feed(&url, "");
        let second = manager.add_direct_feed(&url, "Other title");
        assert_eq!(first, second);

        let subs = manager.get_subscriptions();
        assert_eq!(subs.direct_feeds().len(), 1);
        assert_eq!(subs.direct_feeds()[0].title, url.to_string());
    }

    #[test]
    fn concurrent_adds_of_one_url_store_one_feed() {
        let manager = Arc::new(manager());
        let url = Url::parse("https://example.com/feed.xml").unwrap();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let url = url.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    manager.add_direct_feed(&url, "Example")
                })
            })
            .collect();
        let ids: BTreeSet<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(ids.len(), 1);
        assert_eq!(manager.get_subscriptions().direct_feeds().len(), 1);
    }

    #[test]
    fn disabling_direct_feed_removes_it() {
        let manager = manager();
        let url = Url::parse("https://example.com/feed.xml").unwrap();
        let id = manager.add_direct_feed(&url, "Example");

        manager.set_publisher_subscribed(&id.to_string(), UserEnabled::Disabled);
        let subs = manager.get_subscriptions();
        assert!(subs.direct_feeds().is_empty());
        assert!(subs.disabled_publishers().is_empty());
    }

    #[test]
    fn publisher_status_round_trips() {
        let manager = manager();
        manager.set_publisher_subscribed("one", UserEnabled::Enabled);
        manager.set_publisher_subscribed("two", UserEnabled::Disabled);
        manager.set_publisher_subscribed("one", UserEnabled::NotModified);

        let subs = manager.get_subscriptions();
        assert_eq!(subs.get_publisher_status("one"), UserEnabled::NotModified);
        assert_eq!(subs.get_publisher_status("two"), UserEnabled::Disabled);
    }

    #[test]
    fn observers_hear_real_changes_only() {
        let manager = manager();
        let observer = Arc::new(CountingObserver::default());
        let weak: Weak<dyn PrefObserver> = Arc::downgrade(&observer) as Weak<dyn PrefObserver>;
        let id = manager.add_observer(weak);

        manager.set_publisher_subscribed("one", UserEnabled::Enabled);
        manager.set_publisher_subscribed("one", UserEnabled::Enabled);
        manager.set_channel_subscribed("en_US", "Top News", true);
        assert_eq!(observer.publishers.load(Ordering::SeqCst), 1);
        assert_eq!(observer.channels.load(Ordering::SeqCst), 1);

        manager.remove_observer(id);
        manager.set_publisher_subscribed("two", UserEnabled::Enabled);
        assert_eq!(observer.publishers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enabled_requires_opt_in() {
        let manager = manager();
        assert!(!manager.is_enabled());
        manager.set_config(true, true);
        assert!(manager.is_enabled());
        manager.set_config(true, false);
        assert!(!manager.is_enabled());
    }
}
