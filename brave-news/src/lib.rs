pub mod types;
pub mod config;
pub mod traits;
pub mod fetcher;
pub mod utils;

pub mod channel_migrator;
pub mod subscriptions;
pub mod pref_manager;

pub mod feed_parsing;
pub mod publishers_controller;
pub mod channels_controller;
pub mod direct_feed_fetcher;
pub mod feed_fetcher;

pub mod signal_calculator;
pub mod suggestions;
pub mod feed_sampling;
pub mod feed_generation_info;
pub mod peeking_card;
pub mod feed_v2_generation;
pub mod feed_v2_builder;

pub mod feed_building;
pub mod feed_controller;

pub mod initialization_promise;
pub mod engine;

pub use types::*;
pub use config::{ConfigError, FetchConfig, NewsConfig, PeekingCardConfig, RankingConfig};
pub use traits::{ApiRequest, ApiResponse};
pub use fetcher::Fetcher;
pub use subscriptions::{SubscriptionsDiff, SubscriptionsSnapshot};
pub use pref_manager::{NewsPrefManager, PrefObserver};
pub use publishers_controller::PublishersController;
pub use feed_fetcher::FeedFetcher;
pub use feed_v2_builder::{FeedV2Builder, UpdateSettings};
pub use feed_controller::FeedController;
pub use initialization_promise::{InitializationPromise, InitializationState};
pub use engine::BraveNewsEngine;
