//! Request and response types for the market data REST endpoints.
//!
//! Each request type knows its own [`RequestKey`], derived from its effective
//! parameters: absent optional parameters are keyed by the value the upstream
//! would default to, and currency codes are case-normalized. Two requests that
//! would fetch the same data therefore always share one key.

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use time::OffsetDateTime;

use crate::coordinator::RequestKey;
use crate::types::serde_helpers::{comma_separated, empty_string_as_none};
use crate::types::{SortDirection, SortField};

/// Fiat currency quotes are converted to when none is given.
pub const DEFAULT_CONVERT: &str = "USD";

/// First listing rank returned when no start is given.
pub const DEFAULT_LISTINGS_START: u32 = 1;

/// Page size returned when no limit is given.
pub const DEFAULT_LISTINGS_LIMIT: u32 = 100;

fn convert_or_default(convert: Option<&str>) -> String {
    convert.unwrap_or(DEFAULT_CONVERT).to_uppercase()
}

// ========== Requests ==========

/// Request parameters for the latest coin listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListingsRequest {
    /// 1-based rank to start from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    /// Number of coins to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Quote currency (e.g. "USD").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert: Option<String>,
    /// Sort field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortField>,
    /// Sort direction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_dir: Option<SortDirection>,
}

impl ListingsRequest {
    /// Request the top `limit` coins by market cap.
    pub fn top(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Set the starting rank.
    pub fn start(mut self, start: u32) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the quote currency.
    pub fn convert(mut self, convert: impl Into<String>) -> Self {
        self.convert = Some(convert.into());
        self
    }

    /// Set the sort field and direction.
    pub fn sort(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort = Some(field);
        self.sort_dir = Some(direction);
        self
    }

    /// Deduplication key for this request.
    pub fn request_key(&self) -> RequestKey {
        RequestKey::builder("listings")
            .param("start", self.start.unwrap_or(DEFAULT_LISTINGS_START))
            .param("limit", self.limit.unwrap_or(DEFAULT_LISTINGS_LIMIT))
            .param("convert", convert_or_default(self.convert.as_deref()))
            .param("sort", self.sort.unwrap_or_default())
            .param("sort_dir", self.sort_dir.unwrap_or_default())
            .build()
    }
}

/// Request parameters for the latest quotes of specific coins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotesRequest {
    /// CoinMarketCap ids.
    #[serde(with = "comma_separated")]
    pub id: BTreeSet<u64>,
    /// Quote currency (e.g. "USD").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert: Option<String>,
}

impl QuotesRequest {
    /// Request quotes for the given coin ids.
    pub fn for_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            id: ids.into_iter().collect(),
            convert: None,
        }
    }

    /// Set the quote currency.
    pub fn convert(mut self, convert: impl Into<String>) -> Self {
        self.convert = Some(convert.into());
        self
    }

    /// Deduplication key for this request.
    pub fn request_key(&self) -> RequestKey {
        RequestKey::builder("quotes")
            .ids(self.id.iter().copied())
            .param("convert", convert_or_default(self.convert.as_deref()))
            .build()
    }
}

/// Request parameters for coin metadata, used for logos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoinInfoRequest {
    /// CoinMarketCap ids.
    #[serde(with = "comma_separated")]
    pub id: BTreeSet<u64>,
}

impl CoinInfoRequest {
    /// Request metadata for the given coin ids.
    pub fn for_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            id: ids.into_iter().collect(),
        }
    }

    /// Deduplication key for this request.
    pub fn request_key(&self) -> RequestKey {
        RequestKey::builder("logos")
            .ids(self.id.iter().copied())
            .build()
    }
}

/// Request parameters for a coin's market chart series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartRequest {
    /// CoinGecko coin id (e.g. "bitcoin"). Part of the path, not the query.
    #[serde(skip)]
    pub coin_id: String,
    /// Quote currency (e.g. "usd").
    pub vs_currency: String,
    /// Days of history: a number or "max".
    pub days: String,
    /// Data interval (e.g. "daily"); chosen automatically when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

impl ChartRequest {
    /// Request `days` of history for `coin_id` quoted in `vs_currency`.
    pub fn new(
        coin_id: impl Into<String>,
        vs_currency: impl Into<String>,
        days: impl Into<String>,
    ) -> Self {
        Self {
            coin_id: coin_id.into(),
            vs_currency: vs_currency.into().to_lowercase(),
            days: days.into(),
            interval: None,
        }
    }

    /// Set the data interval.
    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    /// Deduplication key for this request.
    pub fn request_key(&self) -> RequestKey {
        RequestKey::builder("chart")
            .param("coin", &self.coin_id)
            .param("vs", self.vs_currency.to_lowercase())
            .param("days", &self.days)
            .param_opt("interval", self.interval.as_deref())
            .build()
    }
}

/// Request parameters for a coin's OHLC candles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OhlcRequest {
    /// CoinGecko coin id (e.g. "bitcoin"). Part of the path, not the query.
    #[serde(skip)]
    pub coin_id: String,
    /// Quote currency (e.g. "usd").
    pub vs_currency: String,
    /// Days of history (1, 7, 14, 30, 90, 180, 365 or "max").
    pub days: String,
}

impl OhlcRequest {
    /// Request `days` of candles for `coin_id` quoted in `vs_currency`.
    pub fn new(
        coin_id: impl Into<String>,
        vs_currency: impl Into<String>,
        days: impl Into<String>,
    ) -> Self {
        Self {
            coin_id: coin_id.into(),
            vs_currency: vs_currency.into().to_lowercase(),
            days: days.into(),
        }
    }

    /// Deduplication key for this request.
    pub fn request_key(&self) -> RequestKey {
        RequestKey::builder("ohlc")
            .param("coin", &self.coin_id)
            .param("vs", self.vs_currency.to_lowercase())
            .param("days", &self.days)
            .build()
    }
}

// ========== Responses ==========

/// A coin with its market quotes, as returned by listings and quotes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Coin {
    /// CoinMarketCap id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Ticker symbol.
    pub symbol: String,
    /// URL-friendly name.
    pub slug: String,
    /// Market cap rank.
    #[serde(default)]
    pub cmc_rank: Option<u32>,
    /// Number of active market pairs.
    #[serde(default)]
    pub num_market_pairs: Option<u32>,
    /// Circulating supply.
    #[serde(default)]
    pub circulating_supply: Option<Decimal>,
    /// Total supply.
    #[serde(default)]
    pub total_supply: Option<Decimal>,
    /// Maximum supply, if capped.
    #[serde(default)]
    pub max_supply: Option<Decimal>,
    /// Tags (e.g. "mineable").
    #[serde(default)]
    pub tags: Vec<String>,
    /// Last update of the coin's data.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
    /// Quotes keyed by currency (e.g. "USD").
    #[serde(default)]
    pub quote: HashMap<String, Quote>,
}

impl Coin {
    /// Quote in the given currency, case-insensitively.
    pub fn quote_in(&self, currency: &str) -> Option<&Quote> {
        self.quote
            .get(currency)
            .or_else(|| self.quote.get(&currency.to_uppercase()))
    }
}

/// Market data for a coin in one currency.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Quote {
    /// Latest price.
    pub price: Option<Decimal>,
    /// 24 hour volume.
    #[serde(default)]
    pub volume_24h: Option<Decimal>,
    /// 1 hour price change, in percent.
    #[serde(default)]
    pub percent_change_1h: Option<Decimal>,
    /// 24 hour price change, in percent.
    #[serde(default)]
    pub percent_change_24h: Option<Decimal>,
    /// 7 day price change, in percent.
    #[serde(default)]
    pub percent_change_7d: Option<Decimal>,
    /// Market capitalization.
    #[serde(default)]
    pub market_cap: Option<Decimal>,
    /// Last update of this quote.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
}

/// Coin metadata.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CoinInfo {
    /// CoinMarketCap id.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Ticker symbol.
    pub symbol: String,
    /// URL-friendly name.
    #[serde(default)]
    pub slug: String,
    /// Logo image URL.
    #[serde(default, deserialize_with = "empty_string_as_none::deserialize")]
    pub logo: Option<String>,
    /// Category ("coin" or "token").
    #[serde(default, deserialize_with = "empty_string_as_none::deserialize")]
    pub category: Option<String>,
    /// Free-text description.
    #[serde(default, deserialize_with = "empty_string_as_none::deserialize")]
    pub description: Option<String>,
}

/// One `[timestamp_ms, value]` sample of a chart series.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PricePoint(
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub OffsetDateTime,
    pub Decimal,
);

impl PricePoint {
    /// Sample time.
    pub fn time(&self) -> OffsetDateTime {
        self.0
    }

    /// Sample value.
    pub fn value(&self) -> Decimal {
        self.1
    }
}

/// Price, market cap and volume series for a coin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MarketChart {
    /// Price samples.
    pub prices: Vec<PricePoint>,
    /// Market cap samples.
    #[serde(default)]
    pub market_caps: Vec<PricePoint>,
    /// Volume samples.
    #[serde(default)]
    pub total_volumes: Vec<PricePoint>,
}

/// One OHLC candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "CandleRow")]
pub struct Candle {
    /// Candle open time.
    pub time: OffsetDateTime,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
}

/// Wire shape of a candle: `[timestamp_ms, open, high, low, close]`.
#[serde_as]
#[derive(Deserialize)]
struct CandleRow(
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    OffsetDateTime,
    Decimal,
    Decimal,
    Decimal,
    Decimal,
);

impl From<CandleRow> for Candle {
    fn from(row: CandleRow) -> Self {
        let CandleRow(time, open, high, low, close) = row;
        Self {
            time,
            open,
            high,
            low,
            close,
        }
    }
}
