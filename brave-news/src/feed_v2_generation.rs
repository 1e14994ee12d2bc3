//! Assembly of V2 feeds out of a [`FeedGenerationInfo`]. Everything here is
//! synchronous and driven by the info's seeded rng, so a pass can run on a
//! blocking thread and tests can replay it.

use std::collections::{BTreeSet, HashSet};

use chrono::Local;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, trace};
use url::Url;

use crate::config::PeekingCardConfig;
use crate::feed_generation_info::FeedGenerationInfo;
use crate::feed_sampling::{
    channel_members, get_normal, pick_channel_roulette, pick_discovery_roulette, pick_hero_roulette, pick_random,
    pick_roulette, toss_coin, ArticleInfos, PickArticles,
};
use crate::peeking_card::pick_peeking_card;
use crate::types::{
    Article, ArticleElements, Cluster, ClusterType, FeedItem, FeedItemV2, FeedV2, HeroArticle, TOP_NEWS_CHANNEL,
};

/// Blocks generated between discover cards in the basic feeds.
const BLOCKS_PER_SPECIAL: usize = 2;

/// A hero and then a normally distributed run of inline articles, some of
/// which are discovery picks. The hero is skipped when `hero_picker` finds
/// nothing (e.g. no article has an image).
pub fn generate_block(
    info: &mut FeedGenerationInfo,
    hero_picker: PickArticles<'_>,
    article_picker: PickArticles<'_>,
    inline_discovery_ratio: f64,
) -> Vec<FeedItemV2> {
    let mut result = Vec::new();
    if !info.has_articles() {
        return result;
    }

    if let Some(hero) = info.pick_and_consume(hero_picker) {
        result.push(FeedItemV2::Hero(HeroArticle { data: hero }));
    }

    let (min, max) = (info.config.min_block_cards, info.config.max_block_cards);
    let follow_count = get_normal(&mut info.rng, min, max + 1);
    for _ in 0..follow_count {
        let is_discover = info.rng.gen::<f64>() < inline_discovery_ratio;
        let picked = if is_discover {
            info.pick_and_consume(&pick_discovery_roulette)
        } else {
            info.pick_and_consume(article_picker)
        };

        match picked {
            Some(data) => result.push(FeedItemV2::Article(Article { data, is_discover })),
            None => trace!("No article for inline slot (discover={})", is_discover),
        }
    }

    result
}

/// A standard block using plain roulette for the inline articles.
pub fn generate_standard_block(info: &mut FeedGenerationInfo, hero_picker: PickArticles<'_>) -> Vec<FeedItemV2> {
    let ratio = info.config.inline_discovery_ratio;
    generate_block(info, hero_picker, &pick_roulette, ratio)
}

/// A block drawn only from `channel`'s publishers, wrapped in a cluster.
/// Articles from the channel that are not picked stay in the pool.
pub fn generate_channel_block(info: &mut FeedGenerationInfo, channel: &str) -> Vec<FeedItemV2> {
    let members = channel_members(&info.publishers, channel, &info.locale);
    let picker = move |articles: &ArticleInfos, rng: &mut StdRng| pick_channel_roulette(&members, articles, rng);

    let block = generate_block(info, &picker, &picker, 0.0);
    if block.is_empty() {
        return Vec::new();
    }

    let articles = block
        .into_iter()
        .filter_map(|item| match item {
            FeedItemV2::Hero(hero) => Some(ArticleElements::Hero(hero)),
            FeedItemV2::Article(article) => Some(ArticleElements::Article(article)),
            _ => None,
        })
        .collect();

    vec![FeedItemV2::Cluster(Cluster {
        cluster_type: ClusterType::Channel,
        id: channel.to_string(),
        articles,
    })]
}

/// A channel cluster for one of the subscribed channels, or nothing when
/// the user follows no channel in this locale.
pub fn generate_cluster_block(info: &mut FeedGenerationInfo) -> Vec<FeedItemV2> {
    let channels = info.channels.clone();
    let Some(channel) = pick_random(&mut info.rng, &channels) else {
        debug!("No subscribed channels for a cluster");
        return Vec::new();
    };
    generate_channel_block(info, channel)
}

/// Suggests a few publishers to follow, consuming them from the queue.
pub fn generate_special_block(info: &mut FeedGenerationInfo) -> Vec<FeedItemV2> {
    let count = info.config.suggested_publishers_per_card;
    let publisher_ids = info.take_suggested_publisher_ids(count);
    if publisher_ids.is_empty() {
        return Vec::new();
    }
    vec![FeedItemV2::Discover { publisher_ids }]
}

pub fn generate_ad() -> Vec<FeedItemV2> {
    vec![FeedItemV2::Advert]
}

/// Urls of the articles the Top News cluster draws from.
fn top_story_urls(info: &FeedGenerationInfo) -> BTreeSet<Url> {
    let members = channel_members(&info.publishers, TOP_NEWS_CHANNEL, &info.locale);
    info.raw_feed_items
        .iter()
        .filter(|item| item.is_article())
        .map(|item| item.metadata())
        .filter(|article| members.contains(&article.publisher_id))
        .map(|article| article.url.clone())
        .collect()
}

/// Picks the peeking card, falling back to `fallback`.
fn peeking_or(
    info: &FeedGenerationInfo,
    peeking: &PeekingCardConfig,
    fallback: fn(&ArticleInfos, &mut StdRng) -> Option<usize>,
) -> impl Fn(&ArticleInfos, &mut StdRng) -> Option<usize> {
    let subscriptions = info.subscriptions.clone();
    let top_stories = top_story_urls(info);
    let peeking = peeking.clone();
    let local_now = info.now.with_timezone(&Local);
    move |articles: &ArticleInfos, rng: &mut StdRng| {
        pick_peeking_card(&subscriptions, &top_stories, articles, &peeking, local_now, rng)
            .or_else(|| fallback(articles, rng))
    }
}

/// Blocks until the pool runs dry, with discover cards after every second
/// block and an advert as the second card.
pub fn generate_basic_feed(
    mut info: FeedGenerationInfo,
    pick_hero: PickArticles<'_>,
    pick_article: PickArticles<'_>,
    pick_peeking: PickArticles<'_>,
) -> FeedV2 {
    let mut feed = FeedV2::default();
    let mut blocks = 0usize;

    while info.has_articles() {
        let hero_picker = if feed.items.is_empty() { pick_peeking } else { pick_hero };
        let mut items = generate_block(&mut info, hero_picker, pick_article, 0.0);
        if items.is_empty() {
            break;
        }

        if blocks != 0 && blocks % BLOCKS_PER_SPECIAL == 0 {
            items.extend(generate_special_block(&mut info));
        }

        feed.items.extend(items);
        blocks += 1;
    }

    if feed.items.len() > 1 {
        feed.items.insert(1, FeedItemV2::Advert);
    }

    debug!("Generated basic feed: {} blocks, {} cards", blocks, feed.items.len());
    feed
}

/// The For You feed.
///
/// 1. A standard block led by the peeking card.
/// 2. A Top News cluster.
/// 3. Then, cycling: a standard block; a standard block or a channel
///    cluster; and optionally a special card (advert or suggestions).
///
/// Stops the first time a standard block in the cycle comes back empty.
/// The pool strictly shrinks with every block, so this terminates.
pub fn generate_all_feed(mut info: FeedGenerationInfo, peeking: &PeekingCardConfig) -> FeedV2 {
    let mut feed = FeedV2::default();

    if info.subscriptions.is_empty() || info.raw_feed_items.is_empty() {
        debug!("Nothing followed or nothing fetched, all feed is empty");
        return feed;
    }

    let first_hero = peeking_or(&info, peeking, pick_hero_roulette);
    let initial = generate_standard_block(&mut info, &first_hero);
    debug!("Initial block: {} cards", initial.len());
    feed.items.extend(initial);

    let top_news = generate_channel_block(&mut info, TOP_NEWS_CHANNEL);
    feed.items.extend(top_news);

    const ITERATION_TYPES: usize = 3;
    let mut iteration = 0usize;
    loop {
        let iteration_type = iteration % ITERATION_TYPES;
        let items = match iteration_type {
            0 => generate_standard_block(&mut info, &pick_hero_roulette),
            1 => {
                if info.rng.gen::<f64>() < info.config.category_channel_ratio {
                    generate_cluster_block(&mut info)
                } else {
                    generate_standard_block(&mut info, &pick_hero_roulette)
                }
            }
            _ => {
                if toss_coin(&mut info.rng) {
                    if toss_coin(&mut info.rng) {
                        generate_ad()
                    } else {
                        generate_special_block(&mut info)
                    }
                } else {
                    Vec::new()
                }
            }
        };

        if iteration_type == 0 && items.is_empty() {
            break;
        }

        trace!("Iteration {} (type {}) added {} cards", iteration, iteration_type, items.len());
        feed.items.extend(items);
        iteration += 1;
    }

    debug!("Generated all feed: {} cards over {} iterations", feed.items.len(), iteration);
    feed
}

/// Articles from followed publishers, or from publishers in a channel the
/// user follows in this locale.
pub fn generate_following_feed(mut info: FeedGenerationInfo, peeking: &PeekingCardConfig) -> FeedV2 {
    let channels: HashSet<&str> = info.channels.iter().map(String::as_str).collect();
    let items = info
        .raw_feed_items
        .iter()
        .filter(|item| item.is_article())
        .filter(|item| {
            let Some(publisher) = info.publishers.get(&item.metadata().publisher_id) else {
                return false;
            };
            publisher.is_user_subscribed()
                || publisher
                    .channels_for_locale(&info.locale)
                    .iter()
                    .any(|c| channels.contains(c.as_str()))
        })
        .cloned()
        .collect();
    info.set_raw_feed_items(items);

    let peeking = peeking_or(&info, peeking, pick_roulette);
    generate_basic_feed(info, &pick_roulette, &pick_roulette, &peeking)
}

/// Articles from publishers registered under `channel` in this locale.
pub fn generate_channel_feed(mut info: FeedGenerationInfo, channel: &str, peeking: &PeekingCardConfig) -> FeedV2 {
    let items = info
        .raw_feed_items
        .iter()
        .filter(|item| item.is_article())
        .filter(|item| {
            info.publishers
                .get(&item.metadata().publisher_id)
                .is_some_and(|p| p.channels_for_locale(&info.locale).iter().any(|c| c == channel))
        })
        .cloned()
        .collect();
    info.set_raw_feed_items(items);

    let peeking = peeking_or(&info, peeking, pick_roulette);
    generate_basic_feed(info, &pick_roulette, &pick_roulette, &peeking)
}

/// Every article from one publisher, newest first.
pub fn generate_publisher_feed(mut info: FeedGenerationInfo, publisher_id: &str) -> FeedV2 {
    let mut items: Vec<FeedItem> = info
        .raw_feed_items
        .iter()
        .filter(|item| item.is_article() && item.metadata().publisher_id == publisher_id)
        .cloned()
        .collect();
    items.sort_by(|a, b| b.metadata().publish_time.cmp(&a.metadata().publish_time));
    info.set_raw_feed_items(items);

    let first = crate::feed_sampling::pick_first_index;
    generate_basic_feed(info, &first, &first, &first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet, HashSet};

    use chrono::{Duration, Utc};
    use rand::SeedableRng;
    use url::Url;

    use crate::config::RankingConfig;
    use crate::signal_calculator::calculate_signals;
    use crate::subscriptions::SubscriptionsSnapshot;
    use crate::types::{
        FeedItemMetadata, FeedItems, Image, LocaleInfo, Publisher, PublisherType, Publishers, UserEnabled,
    };

    fn publisher(id: &str, channels: &[&str], status: UserEnabled) -> Publisher {
        Publisher {
            publisher_id: id.to_string(),
            publisher_type: PublisherType::CombinedSource,
            publisher_name: id.to_string(),
            category_name: String::new(),
            is_enabled: true,
            locales: vec![LocaleInfo {
                locale: "en_US".to_string(),
                channels: channels.iter().map(|c| c.to_string()).collect(),
                rank: 0,
            }],
            site_url: Url::parse(&format!("https://{}.example", id)).ok(),
            feed_source: None,
            favicon_url: None,
            cover_url: None,
            background_color: None,
            user_enabled_status: status,
        }
    }

    fn article(publisher_id: &str, n: usize, age_hours: i64) -> FeedItem {
        let url = Url::parse(&format!("https://{}.example/{}", publisher_id, n)).unwrap();
        FeedItem::Article(FeedItemMetadata {
            category_name: String::new(),
            channels: vec![],
            publisher_id: publisher_id.to_string(),
            publisher_name: publisher_id.to_string(),
            title: format!("{} #{}", publisher_id, n),
            description: String::new(),
            image: Some(Image::PaddedImageUrl(url.join("image.jpg").unwrap())),
            url,
            score: 0.0,
            pop_score: 10.0,
            publish_time: Utc::now() - Duration::hours(age_hours),
            relative_time_description: String::new(),
        })
    }

    struct Fixture {
        publishers: Publishers,
        subscriptions: SubscriptionsSnapshot,
        items: FeedItems,
    }

    fn fixture(articles_per_publisher: usize) -> Fixture {
        let mut publishers = Publishers::new();
        publishers.insert("followed".into(), publisher("followed", &["Sports"], UserEnabled::Enabled));
        publishers.insert("news".into(), publisher("news", &["Top News"], UserEnabled::NotModified));
        publishers.insert("other".into(), publisher("other", &["Cars"], UserEnabled::NotModified));
        publishers.insert("hidden".into(), publisher("hidden", &["Top News"], UserEnabled::Disabled));

        let mut channels = BTreeMap::new();
        channels.insert("en_US".to_string(), vec!["Top News".to_string()]);
        let subscriptions = SubscriptionsSnapshot::new(
            BTreeSet::from(["followed".to_string()]),
            BTreeSet::from(["hidden".to_string()]),
            vec![],
            channels,
        );

        let items = publishers
            .keys()
            .flat_map(|id| (0..articles_per_publisher).map(move |n| article(id, n, n as i64)))
            .collect();

        Fixture {
            publishers,
            subscriptions,
            items,
        }
    }

    fn info(fixture: &Fixture, seed: u64, suggestions: Vec<String>) -> FeedGenerationInfo {
        let config = RankingConfig::default();
        let signals = calculate_signals(
            "en_US",
            &fixture.publishers,
            &fixture.subscriptions,
            &fixture.items,
            &[],
            &config,
        );
        FeedGenerationInfo::new(
            fixture.subscriptions.clone(),
            "en_US".to_string(),
            fixture.items.clone(),
            fixture.publishers.clone(),
            vec!["Top News".to_string()],
            signals,
            suggestions,
            config,
            StdRng::seed_from_u64(seed),
        )
    }

    fn assert_unique_urls(feed: &FeedV2) {
        let urls = feed.article_urls();
        let unique: HashSet<_> = urls.iter().collect();
        assert_eq!(urls.len(), unique.len(), "an article was used twice");
    }

    #[test]
    fn all_feed_uses_every_article_once_and_hides_disabled() {
        let fixture = fixture(12);
        for seed in 0..20 {
            let feed = generate_all_feed(info(&fixture, seed, vec!["other".into()]), &PeekingCardConfig::default());
            assert_unique_urls(&feed);
            assert!(feed
                .items
                .iter()
                .flat_map(|item| item.articles())
                .all(|a| a.publisher_id != "hidden"));
            // Every visible article ends up somewhere in the feed.
            assert_eq!(feed.article_urls().len(), 36, "seed {}", seed);
        }
    }

    #[test]
    fn all_feed_opens_with_hero_then_top_news_cluster() {
        let fixture = fixture(6);
        let feed = generate_all_feed(info(&fixture, 3, vec![]), &PeekingCardConfig::default());
        assert!(matches!(feed.items[0], FeedItemV2::Hero(_)));
        let cluster = feed
            .items
            .iter()
            .find_map(|item| match item {
                FeedItemV2::Cluster(cluster) => Some(cluster),
                _ => None,
            })
            .expect("top news cluster");
        assert_eq!(cluster.id, TOP_NEWS_CHANNEL);
        assert!(cluster.articles.iter().all(|a| a.data().publisher_id == "news"));
    }

    #[test]
    fn all_feed_is_empty_without_subscriptions_or_items() {
        let mut fixture = fixture(3);
        fixture.subscriptions = SubscriptionsSnapshot::default();
        assert!(generate_all_feed(info(&fixture, 1, vec![]), &PeekingCardConfig::default())
            .items
            .is_empty());

        let mut fixture = self::fixture(3);
        fixture.items.clear();
        assert!(generate_all_feed(info(&fixture, 1, vec![]), &PeekingCardConfig::default())
            .items
            .is_empty());
    }

    #[test]
    fn same_seed_same_feed() {
        let fixture = fixture(8);
        let a = generate_all_feed(info(&fixture, 42, vec![]), &PeekingCardConfig::default());
        let b = generate_all_feed(info(&fixture, 42, vec![]), &PeekingCardConfig::default());
        assert_eq!(a.items, b.items);
    }

    #[test]
    fn inline_discovery_ratio_holds() {
        let fixture = fixture(2000);
        let mut info = info(&fixture, 9, vec![]);
        let (mut discover, mut total) = (0usize, 0usize);
        for _ in 0..300 {
            for item in generate_standard_block(&mut info, &pick_hero_roulette) {
                if let FeedItemV2::Article(article) = item {
                    total += 1;
                    discover += usize::from(article.is_discover);
                }
            }
        }
        let ratio = discover as f64 / total as f64;
        assert!((ratio - 0.25).abs() < 0.05, "ratio was {}", ratio);
    }

    #[test]
    fn channel_block_leaves_other_articles_in_pool() {
        let fixture = fixture(4);
        let mut info = info(&fixture, 5, vec![]);
        let before = info.article_infos().len();
        let block = generate_channel_block(&mut info, "Cars");
        let FeedItemV2::Cluster(cluster) = &block[0] else {
            panic!("expected a cluster");
        };
        assert!(cluster.articles.iter().all(|a| a.data().publisher_id == "other"));
        assert_eq!(info.article_infos().len(), before - cluster.articles.len());

        assert!(generate_channel_block(&mut info, "Knitting").is_empty());
    }

    #[test]
    fn special_block_takes_three_suggestions() {
        let fixture = fixture(1);
        let suggestions = (0..5).map(|i| format!("p{}", i)).collect();
        let mut info = info(&fixture, 1, suggestions);

        assert_eq!(
            generate_special_block(&mut info),
            vec![FeedItemV2::Discover {
                publisher_ids: vec!["p0".into(), "p1".into(), "p2".into()]
            }]
        );
        assert_eq!(
            generate_special_block(&mut info),
            vec![FeedItemV2::Discover {
                publisher_ids: vec!["p3".into(), "p4".into()]
            }]
        );
        assert!(generate_special_block(&mut info).is_empty());
    }

    #[test]
    fn following_feed_only_has_followed_content() {
        let fixture = fixture(10);
        let feed = generate_following_feed(info(&fixture, 2, vec![]), &PeekingCardConfig::default());
        assert_unique_urls(&feed);
        assert_eq!(feed.items.get(1), Some(&FeedItemV2::Advert));
        let publishers: HashSet<_> = feed
            .items
            .iter()
            .flat_map(|item| item.articles())
            .map(|a| a.publisher_id.as_str())
            .collect();
        assert_eq!(publishers, HashSet::from(["followed", "news"]));
    }

    #[test]
    fn following_feed_leads_with_a_hero_without_images() {
        let mut fixture = fixture(4);
        for item in &mut fixture.items {
            if let FeedItem::Article(article) = item {
                article.image = None;
            }
        }
        let feed = generate_following_feed(info(&fixture, 6, vec![]), &PeekingCardConfig::default());
        assert!(matches!(feed.items[0], FeedItemV2::Hero(_)));
        assert!(feed
            .items
            .iter()
            .skip(2)
            .any(|item| matches!(item, FeedItemV2::Hero(_))));
    }

    #[test]
    fn top_stories_come_from_top_news_publishers() {
        let fixture = fixture(3);
        let urls = top_story_urls(&info(&fixture, 1, vec![]));
        assert_eq!(urls.len(), 6);
        assert!(urls
            .iter()
            .all(|url| matches!(url.host_str(), Some("news.example") | Some("hidden.example"))));
    }

    #[test]
    fn publisher_feed_is_newest_first() {
        let fixture = fixture(5);
        let feed = generate_publisher_feed(info(&fixture, 2, vec![]), "other");
        let times: Vec<_> = feed
            .items
            .iter()
            .flat_map(|item| item.articles())
            .map(|a| a.publish_time)
            .collect();
        assert_eq!(times.len(), 5);
        assert!(times.windows(2).all(|w| w[0] >= w[1]));
        assert!(feed.items.iter().all(|i| !matches!(i, FeedItemV2::Cluster(_))));
    }

    #[test]
    fn channel_feed_filters_by_channel() {
        let fixture = fixture(5);
        let feed = generate_channel_feed(info(&fixture, 4, vec![]), "Sports", &PeekingCardConfig::default());
        let articles: Vec<_> = feed.items.iter().flat_map(|item| item.articles()).collect();
        assert_eq!(articles.len(), 5);
        assert!(articles.iter().all(|a| a.publisher_id == "followed"));
    }
}
