//! Common domain types for market data requests.

use serde::{Deserialize, Serialize};

/// Field used to order a coin listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Market capitalization
    #[default]
    MarketCap,
    /// Coin name
    Name,
    /// Latest price
    Price,
    /// 24 hour trading volume
    #[serde(rename = "volume_24h")]
    Volume24h,
    /// 1 hour price change
    #[serde(rename = "percent_change_1h")]
    PercentChange1h,
    /// 24 hour price change
    #[serde(rename = "percent_change_24h")]
    PercentChange24h,
    /// 7 day price change
    #[serde(rename = "percent_change_7d")]
    PercentChange7d,
    /// Circulating supply
    CirculatingSupply,
    /// Date the coin was added
    DateAdded,
}

impl std::fmt::Display for SortField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SortField::MarketCap => "market_cap",
            SortField::Name => "name",
            SortField::Price => "price",
            SortField::Volume24h => "volume_24h",
            SortField::PercentChange1h => "percent_change_1h",
            SortField::PercentChange24h => "percent_change_24h",
            SortField::PercentChange7d => "percent_change_7d",
            SortField::CirculatingSupply => "circulating_supply",
            SortField::DateAdded => "date_added",
        };
        write!(f, "{}", s)
    }
}

/// Sort direction for a coin listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order
    Asc,
    /// Descending order
    #[default]
    Desc,
}

impl std::fmt::Display for SortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "asc"),
            SortDirection::Desc => write!(f, "desc"),
        }
    }
}

/// Identity of an upstream API.
///
/// Rate-limit windows and cooldown are tracked per upstream, so independent
/// quotas never interfere with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Upstream {
    /// CoinMarketCap: listings, quotes and coin info.
    CoinMarketCap,
    /// CoinGecko: chart series and OHLC candles. Strict free-tier quota.
    CoinGecko,
}

impl std::fmt::Display for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Upstream::CoinMarketCap => write!(f, "coinmarketcap"),
            Upstream::CoinGecko => write!(f, "coingecko"),
        }
    }
}
