//! # Market Data Client
//!
//! An async Rust client for cryptocurrency market data (CoinMarketCap listings and
//! quotes, CoinGecko charts) with a request coordination layer in front of it.
//!
//! ## Features
//!
//! - Typed REST client for the listings, quotes, coin info, chart and OHLC endpoints
//! - Deduplication of concurrent identical requests
//! - Per-priority throttling of repeated requests
//! - Fixed-window rate limiting and adaptive cooldown for quota-limited upstreams
//! - Retry with capped exponential backoff
//! - High / Normal / Low priority scheduling
//! - Financial precision with `rust_decimal`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use market_data_client::coordinator::{CoordinatorConfig, RequestCoordinator};
//! use market_data_client::rest::{ListingsRequest, MarketRestClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MarketRestClient::new();
//!     let coordinator = RequestCoordinator::new(client, CoordinatorConfig::default());
//!
//!     let coins = coordinator.fetch_top_coins(&ListingsRequest::top(10), None).await?;
//!     for coin in coins {
//!         println!("{} {}", coin.symbol, coin.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod coordinator;
pub mod error;
pub mod rest;
pub mod shared;
pub mod types;

// Re-export commonly used types at crate root
pub use coordinator::{CoordinatorConfig, RequestCoordinator, RequestKey, RequestPriority};
pub use error::{CoordinatorError, FailureKind, MarketDataError};
pub use types::common::{SortDirection, SortField, Upstream};

/// Result type alias using MarketDataError
pub type Result<T> = std::result::Result<T, MarketDataError>;
