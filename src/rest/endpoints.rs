//! Upstream REST endpoint constants.

/// Base URL for the CoinMarketCap API.
pub const COINMARKETCAP_BASE_URL: &str = "https://pro-api.coinmarketcap.com";

/// Base URL for the CoinGecko API.
pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com";

/// Header carrying the CoinMarketCap API key.
pub const CMC_API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

/// CoinMarketCap endpoints (API key required).
pub mod coinmarketcap {
    /// Latest listings, paged and sorted.
    pub const LISTINGS_LATEST: &str = "/v1/cryptocurrency/listings/latest";
    /// Latest quotes for specific ids.
    pub const QUOTES_LATEST: &str = "/v2/cryptocurrency/quotes/latest";
    /// Static metadata, including logo URLs.
    pub const INFO: &str = "/v2/cryptocurrency/info";
}

/// CoinGecko endpoints.
pub mod coingecko {
    /// Historical price, market cap and volume series for a coin.
    pub fn market_chart(coin_id: &str) -> String {
        format!("/api/v3/coins/{}/market_chart", coin_id)
    }

    /// OHLC candles for a coin.
    pub fn ohlc(coin_id: &str) -> String {
        format!("/api/v3/coins/{}/ohlc", coin_id)
    }
}
