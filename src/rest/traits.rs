//! Trait definition for the market data REST API.
//!
//! [`MarketDataApi`] abstracts the upstream calls the coordinator makes. This
//! enables:
//! - Mock implementations for testing the coordinator without a network
//! - Wrapping a client with coordination ([`RequestCoordinator`](crate::coordinator::RequestCoordinator))
//! - Alternative implementations
//!
//! # Example
//!
//! ```rust,ignore
//! use market_data_client::rest::{ListingsRequest, MarketDataApi, MarketRestClient};
//!
//! async fn print_top<C: MarketDataApi>(client: &C) -> Result<(), market_data_client::MarketDataError> {
//!     for coin in client.get_listings(&ListingsRequest::top(10)).await? {
//!         println!("{} {}", coin.cmc_rank.unwrap_or_default(), coin.symbol);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;

use crate::error::MarketDataError;
use crate::rest::types::{
    Candle, ChartRequest, Coin, CoinInfo, CoinInfoRequest, ListingsRequest, MarketChart,
    OhlcRequest, QuotesRequest,
};

/// Trait defining the market data REST operations.
///
/// All methods are async and return `Result<T, MarketDataError>`.
pub trait MarketDataApi: Send + Sync {
    // ========== CoinMarketCap ==========

    /// Get the latest coin listings.
    fn get_listings(
        &self,
        request: &ListingsRequest,
    ) -> impl Future<Output = Result<Vec<Coin>, MarketDataError>> + Send;

    /// Get the latest quotes for specific coins, keyed by id.
    fn get_quotes(
        &self,
        request: &QuotesRequest,
    ) -> impl Future<Output = Result<HashMap<String, Coin>, MarketDataError>> + Send;

    /// Get coin metadata (including logo URLs), keyed by id.
    fn get_coin_info(
        &self,
        request: &CoinInfoRequest,
    ) -> impl Future<Output = Result<HashMap<String, CoinInfo>, MarketDataError>> + Send;

    // ========== CoinGecko ==========

    /// Get a coin's price, market cap and volume series.
    fn get_market_chart(
        &self,
        request: &ChartRequest,
    ) -> impl Future<Output = Result<MarketChart, MarketDataError>> + Send;

    /// Get a coin's OHLC candles.
    fn get_ohlc(
        &self,
        request: &OhlcRequest,
    ) -> impl Future<Output = Result<Vec<Candle>, MarketDataError>> + Send;
}
