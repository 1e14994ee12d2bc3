use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pref_manager::NewsPrefManager;
use crate::publishers_controller::PublishersController;
use crate::types::TOP_NEWS_CHANNEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializationState {
    NotStarted,
    Initializing,
    Initialized,
    Failed,
}

impl InitializationState {
    pub fn is_settled(self) -> bool {
        matches!(self, InitializationState::Initialized | InitializationState::Failed)
    }
}

/// Loads the publisher directory once, retrying after each configured
/// delay, and then settles for good. Waiters are released either way.
///
/// Users who follow nothing once the directory is known get Top News in the
/// directory's locale.
pub struct InitializationPromise {
    prefs: Arc<NewsPrefManager>,
    publishers_controller: Arc<PublishersController>,
    retry_delays: Vec<Duration>,
    started: AtomicBool,
    state_tx: watch::Sender<InitializationState>,
    cancel: CancellationToken,
}

impl InitializationPromise {
    pub fn new(
        prefs: Arc<NewsPrefManager>,
        publishers_controller: Arc<PublishersController>,
        retry_delays: Vec<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(InitializationState::NotStarted);
        Self {
            prefs,
            publishers_controller,
            retry_delays,
            started: AtomicBool::new(false),
            state_tx,
            cancel,
        }
    }

    pub fn state(&self) -> InitializationState {
        *self.state_tx.borrow()
    }

    /// Starts initialization if it has not been started.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state_tx.send_replace(InitializationState::Initializing);
        let promise = self.clone();
        tokio::spawn(async move { promise.run().await });
    }

    /// Starts initialization if needed and waits for it to settle.
    pub async fn on_once_initialized(self: &Arc<Self>) -> InitializationState {
        self.start();
        let mut rx = self.state_tx.subscribe();
        let state = match rx.wait_for(|state| state.is_settled()).await {
            Ok(state) => *state,
            Err(_) => InitializationState::Failed,
        };
        state
    }

    async fn attempt(&self) -> bool {
        let publishers = self.publishers_controller.ensure_publishers_is_updating().await;
        !publishers.is_empty()
    }

    async fn run(&self) {
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            let loaded = tokio::select! {
                _ = self.cancel.cancelled() => false,
                loaded = self.attempt() => loaded,
            };
            if self.cancel.is_cancelled() {
                debug!("Initialization cancelled");
                self.state_tx.send_replace(InitializationState::Failed);
                return;
            }

            if loaded {
                self.subscribe_default_channel().await;
                info!("News initialized after {} attempt(s)", attempts);
                self.state_tx.send_replace(InitializationState::Initialized);
                return;
            }

            let Some(delay) = self.retry_delays.get(attempts - 1).copied() else {
                warn!("News initialization failed after {} attempts", attempts);
                self.state_tx.send_replace(InitializationState::Failed);
                return;
            };

            warn!("Publishers unavailable, retrying in {:?}", delay);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.state_tx.send_replace(InitializationState::Failed);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn subscribe_default_channel(&self) {
        if !self.prefs.get_subscriptions().is_empty() {
            return;
        }
        let locale = self.publishers_controller.get_last_locale().await;
        info!("Nothing followed, subscribing to {} in {}", TOP_NEWS_CHANNEL, locale);
        self.prefs.set_channel_subscribed(&locale, TOP_NEWS_CHANNEL, true);
    }
}
