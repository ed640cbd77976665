//! Market data REST client.
//!
//! Provides access to the CoinMarketCap and CoinGecko endpoints the
//! coordinator fronts.
//!
//! # Trait-based API
//!
//! The [`MarketDataApi`] trait abstracts every upstream operation, enabling:
//! - Mock implementations for testing
//! - Wrapping with the [`RequestCoordinator`](crate::coordinator::RequestCoordinator)
//! - Alternative implementations
//!
//! ```rust,ignore
//! use market_data_client::rest::{MarketDataApi, OhlcRequest};
//!
//! async fn last_close<C: MarketDataApi>(client: &C) -> Result<(), market_data_client::MarketDataError> {
//!     let candles = client.get_ohlc(&OhlcRequest::new("bitcoin", "usd", "1")).await?;
//!     println!("{:?}", candles.last().map(|c| c.close));
//!     Ok(())
//! }
//! ```

mod client;
mod endpoints;
mod traits;
mod types;

pub use client::{MarketRestClient, MarketRestClientBuilder};
pub use endpoints::*;
pub use traits::MarketDataApi;
pub use types::*;
