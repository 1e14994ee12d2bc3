use std::sync::Arc;

use anyhow::{Context, Result};
use brave_news::{
    BraveNewsEngine, Feed, FeedItemMetadata, FeedItemV2, FeedV2, InitializationState, NewsConfig, UserEnabled,
};
use clap::{Parser, ValueEnum};
use interfaces::{InMemoryPrefService, StaticHistory};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FeedKind {
    All,
    Following,
    V1,
}

#[derive(Parser, Debug)]
#[command(name = "brave-news", about = "Fetch and rank a Brave News feed")]
struct Args {
    /// News API host (defaults to BRAVE_NEWS_HOST or the public CDN)
    #[arg(long)]
    host: Option<String>,

    /// Preferred locale, e.g. en_US
    #[arg(long)]
    locale: Option<String>,

    /// Publisher ids to follow
    #[arg(long = "subscribe")]
    subscribe: Vec<String>,

    /// Channels to follow in the feed locale
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// RSS/Atom feeds to follow
    #[arg(long = "direct-feed")]
    direct_feeds: Vec<Url>,

    /// Hosts to treat as recently visited
    #[arg(long = "history-host")]
    history_hosts: Vec<String>,

    #[arg(long, value_enum, default_value = "all")]
    feed: FeedKind,

    /// Seed for reproducible feed generation
    #[arg(long)]
    seed: Option<u64>,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,brave_news=debug"));

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

fn describe(data: &FeedItemMetadata) -> String {
    format!("[{}] {} ({})", data.publisher_name, data.title, data.url)
}

fn print_feed_v2(feed: &FeedV2) {
    println!("{:?} feed, {} cards, source {}", feed.feed_type, feed.items.len(), feed.source_hash);
    if let Some(error) = feed.error {
        println!("  error: {:?}", error);
    }
    for item in &feed.items {
        match item {
            FeedItemV2::Hero(hero) => println!("HERO     {}", describe(&hero.data)),
            FeedItemV2::Article(article) if article.is_discover => println!("DISCOVER {}", describe(&article.data)),
            FeedItemV2::Article(article) => println!("ARTICLE  {}", describe(&article.data)),
            FeedItemV2::Cluster(cluster) => {
                println!("CLUSTER  {} ({} articles)", cluster.id, cluster.articles.len());
                for article in &cluster.articles {
                    println!("         {}", describe(article.data()));
                }
            }
            FeedItemV2::Advert => println!("ADVERT"),
            FeedItemV2::Discover { publisher_ids } => println!("SUGGEST  {}", publisher_ids.join(", ")),
        }
    }
}

fn print_feed_v1(feed: &Feed) {
    println!("Feed {} ({} pages)", feed.hash, feed.pages.len());
    if let Some(featured) = &feed.featured_item {
        println!("FEATURED {}", describe(featured.metadata()));
    }
    for (index, page) in feed.pages.iter().enumerate() {
        println!("-- page {}", index + 1);
        for card in &page.items {
            for item in &card.items {
                println!("{:<16} {}", format!("{:?}", card.card_type), describe(item.metadata()));
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let mut config = NewsConfig::from_env().context("invalid BRAVE_NEWS_* configuration")?;
    if let Some(host) = args.host {
        config.api_host = host;
    }
    if let Some(locale) = args.locale {
        config.preferred_locale = locale;
    }

    let visited: Vec<String> = args.history_hosts.iter().map(|host| format!("https://{}/", host)).collect();
    let history = StaticHistory::from_urls(visited.iter().map(String::as_str));

    let engine = BraveNewsEngine::new(config, Arc::new(InMemoryPrefService::new()), Arc::new(history))
        .context("failed to create engine")?;
    engine.prefs().set_config(true, true);
    if let Some(seed) = args.seed {
        engine.set_seed(seed);
    }

    for publisher_id in &args.subscribe {
        engine.set_publisher_pref(publisher_id, UserEnabled::Enabled);
    }

    let state = engine.initialize().await;
    if state == InitializationState::Failed {
        warn!("Publisher directory unavailable, feeds will be empty");
    }

    let locale = engine.get_locale().await;
    for channel in &args.channels {
        engine.set_channel_subscribed(&locale, channel, true);
    }
    for url in &args.direct_feeds {
        match engine.subscribe_to_new_direct_feed(url).await {
            Some(id) => info!("Following {} as {}", url, id),
            None => warn!("{} is not a readable feed", url),
        }
    }

    match args.feed {
        FeedKind::All => print_feed_v2(&engine.get_feed_v2().await?),
        FeedKind::Following => print_feed_v2(&engine.get_following_feed().await?),
        FeedKind::V1 => print_feed_v1(&*engine.get_feed().await),
    }

    Ok(())
}
