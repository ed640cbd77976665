//! Shared, periodically refreshed coin listing.
//!
//! Many screens show the same top-coins list. [`SharedCoinData`] keeps the
//! latest listing in a [`watch`] channel so they all read one snapshot, and
//! refreshes it through the [`RequestCoordinator`] so concurrent refreshes are
//! deduplicated and rate limited like any other call.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use market_data_client::coordinator::{CoordinatorConfig, RequestCoordinator};
//! use market_data_client::rest::{ListingsRequest, MarketRestClient};
//! use market_data_client::shared::SharedCoinData;
//!
//! #[tokio::main]
//! async fn main() {
//!     let coordinator = RequestCoordinator::new(MarketRestClient::new(), CoordinatorConfig::default());
//!     let shared = SharedCoinData::new(coordinator, ListingsRequest::top(100));
//!     let refresher = shared.spawn_refresh_loop(Duration::from_secs(30));
//!
//!     let mut updates = shared.subscribe();
//!     while updates.changed().await.is_ok() {
//!         if let Some(snapshot) = updates.borrow().as_ref() {
//!             println!("{} coins at {}", snapshot.coins.len(), snapshot.fetched_at);
//!         }
//!     }
//!     refresher.abort();
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::coordinator::{RequestCoordinator, RequestPriority};
use crate::error::CoordinatorError;
use crate::rest::{Coin, ListingsRequest, MarketDataApi};

/// One published listing.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinSnapshot {
    /// Coins in rank order
    pub coins: Vec<Coin>,
    /// When the listing was received
    pub fetched_at: OffsetDateTime,
    /// The request that produced it
    pub request: ListingsRequest,
}

impl CoinSnapshot {
    /// Find a coin by ticker symbol, case-insensitively.
    pub fn coin(&self, symbol: &str) -> Option<&Coin> {
        self.coins
            .iter()
            .find(|coin| coin.symbol.eq_ignore_ascii_case(symbol))
    }
}

/// The latest published snapshot, `None` until the first successful refresh.
pub type LatestSnapshot = Option<Arc<CoinSnapshot>>;

/// Process-wide coin listing shared by every subscriber.
///
/// Cloning shares the same channel and coordinator.
pub struct SharedCoinData<C> {
    coordinator: RequestCoordinator<C>,
    request: ListingsRequest,
    sender: Arc<watch::Sender<LatestSnapshot>>,
}

impl<C> Clone for SharedCoinData<C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            request: self.request.clone(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<C> SharedCoinData<C>
where
    C: MarketDataApi + 'static,
{
    /// Create an empty store that refreshes with `request`.
    pub fn new(coordinator: RequestCoordinator<C>, request: ListingsRequest) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            coordinator,
            request,
            sender: Arc::new(sender),
        }
    }

    /// The coordinator refreshes go through.
    pub fn coordinator(&self) -> &RequestCoordinator<C> {
        &self.coordinator
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<LatestSnapshot> {
        self.sender.subscribe()
    }

    /// The current snapshot.
    pub fn latest(&self) -> LatestSnapshot {
        self.sender.borrow().clone()
    }

    /// Fetch the listing and publish it.
    ///
    /// A throttled refresh means the current snapshot is still fresh, so it is
    /// returned instead of an error.
    pub async fn refresh(
        &self,
        priority: RequestPriority,
    ) -> Result<LatestSnapshot, CoordinatorError> {
        match self
            .coordinator
            .fetch_top_coins(&self.request, Some(priority))
            .await
        {
            Ok(coins) => {
                let snapshot = Arc::new(CoinSnapshot {
                    coins,
                    fetched_at: OffsetDateTime::now_utc(),
                    request: self.request.clone(),
                });
                debug!(
                    coins = snapshot.coins.len(),
                    priority = %priority,
                    "published coin snapshot"
                );
                self.sender.send_replace(Some(Arc::clone(&snapshot)));
                Ok(Some(snapshot))
            }
            Err(CoordinatorError::Throttled { key, retry_after }) => {
                debug!(
                    key = %key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "snapshot still fresh"
                );
                Ok(self.latest())
            }
            Err(err) => Err(err),
        }
    }

    /// Refresh at Normal priority every `interval` until the handle is aborted.
    ///
    /// The first refresh runs immediately. Failures are logged and the loop
    /// keeps going.
    pub fn spawn_refresh_loop(&self, interval: Duration) -> JoinHandle<()> {
        let shared = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = shared.refresh(RequestPriority::Normal).await {
                    warn!(
                        error = %err,
                        retry_after = ?err.retry_after(),
                        "coin snapshot refresh failed"
                    );
                }
            }
        })
    }
}
