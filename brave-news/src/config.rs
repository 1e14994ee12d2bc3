use std::time::Duration;

use thiserror::Error;

use crate::types::CardType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as number: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
}

/// HTTP behaviour shared by every request the News core makes.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_millis: u64,
    pub max_body_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "BraveNews/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_millis: 500,
            max_body_size_mb: 10,
            max_redirects: 5,
        }
    }
}

/// Tunables for signal calculation and feed assembly.
#[derive(Debug, Clone)]
pub struct RankingConfig {
    pub min_block_cards: usize,
    pub max_block_cards: usize,
    pub inline_discovery_ratio: f64,
    /// Chance that the second iteration of the All feed loop is a channel
    /// cluster rather than a standard block.
    pub category_channel_ratio: f64,
    pub source_subscribed_boost: f64,
    pub channel_subscribed_boost: f64,
    pub source_visits_min: f64,
    pub unsubscribed_weight: f64,
    pub pop_recency_half_life_hours: f64,
    pub pop_recency_fresh_hours: i64,
    pub default_pop_score: f64,
    pub history_max_results: usize,
    pub history_days: i64,
    pub suggested_publishers_per_card: usize,
    /// Score reduction for articles on a host the user has visited.
    pub history_score_boost: f64,
    /// Score reduction for articles from explicitly followed sources.
    pub subscribed_score_boost: f64,
    pub page_content_order: Vec<CardType>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            min_block_cards: 1,
            max_block_cards: 5,
            inline_discovery_ratio: 0.25,
            category_channel_ratio: 0.5,
            source_subscribed_boost: 1.0,
            channel_subscribed_boost: 0.2,
            source_visits_min: 0.2,
            unsubscribed_weight: 1e-5,
            pop_recency_half_life_hours: 18.0,
            pop_recency_fresh_hours: 5,
            default_pop_score: 50.0,
            history_max_results: 2000,
            history_days: 14,
            suggested_publishers_per_card: 3,
            history_score_boost: 5.0,
            subscribed_score_boost: 2.0,
            page_content_order: default_page_content_order(),
        }
    }
}

pub fn default_page_content_order() -> Vec<CardType> {
    vec![
        CardType::Headline,
        CardType::Headline,
        CardType::HeadlinePaired,
        CardType::PromotedArticle,
        CardType::CategoryGroup,
        CardType::Headline,
        CardType::Headline,
        CardType::HeadlinePaired,
        CardType::PublisherGroup,
        CardType::Deals,
        CardType::Headline,
        CardType::HeadlinePaired,
    ]
}

#[derive(Debug, Clone)]
pub struct PeekingCardConfig {
    pub direct_feed_boost: f64,
    pub publisher_boost: f64,
    pub channel_boost: f64,
    pub top_story_multiplier: f64,
    pub contextual_boost: f64,
    pub candidate_threshold_ratio: f64,
    pub max_publisher_share: f64,
    pub max_candidates: usize,
}

impl Default for PeekingCardConfig {
    fn default() -> Self {
        Self {
            direct_feed_boost: 15.0,
            publisher_boost: 10.0,
            channel_boost: 5.0,
            top_story_multiplier: 1.2,
            contextual_boost: 3.0,
            candidate_threshold_ratio: 0.7,
            max_publisher_share: 0.2,
            max_candidates: 25,
        }
    }
}

/// Everything the engine needs to know about its environment.
#[derive(Debug, Clone)]
pub struct NewsConfig {
    pub api_host: String,
    pub api_scheme: String,
    pub preferred_locale: String,
    pub init_retry_delays: Vec<Duration>,
    pub fetch: FetchConfig,
    pub ranking: RankingConfig,
    pub peeking: PeekingCardConfig,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            api_host: "brave-today-cdn.brave.com".to_string(),
            api_scheme: "https".to_string(),
            preferred_locale: "en_US".to_string(),
            init_retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            fetch: FetchConfig::default(),
            ranking: RankingConfig::default(),
            peeking: PeekingCardConfig::default(),
        }
    }
}

impl NewsConfig {
    /// Load configuration from `BRAVE_NEWS_*` environment variables, falling
    /// back to the defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let ranking = RankingConfig {
            min_block_cards: parse_env_usize(
                "BRAVE_NEWS_MIN_BLOCK_CARDS",
                defaults.ranking.min_block_cards,
            )?,
            max_block_cards: parse_env_usize(
                "BRAVE_NEWS_MAX_BLOCK_CARDS",
                defaults.ranking.max_block_cards,
            )?,
            inline_discovery_ratio: parse_env_f64(
                "BRAVE_NEWS_INLINE_DISCOVERY_RATIO",
                defaults.ranking.inline_discovery_ratio,
            )?,
            source_subscribed_boost: parse_env_f64(
                "BRAVE_NEWS_SOURCE_SUBSCRIBED_BOOST",
                defaults.ranking.source_subscribed_boost,
            )?,
            channel_subscribed_boost: parse_env_f64(
                "BRAVE_NEWS_CHANNEL_SUBSCRIBED_BOOST",
                defaults.ranking.channel_subscribed_boost,
            )?,
            ..defaults.ranking
        };

        Ok(Self {
            api_host: env_or_default("BRAVE_NEWS_HOST", &defaults.api_host),
            api_scheme: env_or_default("BRAVE_NEWS_SCHEME", &defaults.api_scheme),
            preferred_locale: env_or_default("BRAVE_NEWS_LOCALE", &defaults.preferred_locale),
            init_retry_delays: defaults.init_retry_delays,
            fetch: FetchConfig {
                timeout_seconds: parse_env_u64(
                    "BRAVE_NEWS_TIMEOUT_SECS",
                    defaults.fetch.timeout_seconds,
                )?,
                max_retries: parse_env_u32("BRAVE_NEWS_MAX_RETRIES", defaults.fetch.max_retries)?,
                ..defaults.fetch
            },
            ranking,
            peeking: defaults.peeking,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_host.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "BRAVE_NEWS_HOST".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if !matches!(self.api_scheme.as_str(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                name: "BRAVE_NEWS_SCHEME".to_string(),
                message: format!("must be 'http' or 'https', got '{}'", self.api_scheme),
            });
        }
        if self.ranking.min_block_cards > self.ranking.max_block_cards {
            return Err(ConfigError::InvalidValue {
                name: "BRAVE_NEWS_MIN_BLOCK_CARDS".to_string(),
                message: "must not exceed BRAVE_NEWS_MAX_BLOCK_CARDS".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.ranking.inline_discovery_ratio) {
            return Err(ConfigError::InvalidValue {
                name: "BRAVE_NEWS_INLINE_DISCOVERY_RATIO".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.ranking.category_channel_ratio) {
            return Err(ConfigError::InvalidValue {
                name: "ranking.category_channel_ratio".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        if self.ranking.page_content_order.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "ranking.page_content_order".to_string(),
                message: "needs at least one card type".to_string(),
            });
        }
        Ok(())
    }

    /// Base URL for the News API, e.g. `https://brave-today-cdn.brave.com`.
    pub fn api_base(&self) -> String {
        format!("{}://{}", self.api_scheme, self.api_host)
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_f64(name: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
