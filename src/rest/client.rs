//! Market data REST client implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    RetryTransientMiddleware, Retryable, RetryableStrategy, default_on_request_failure,
    default_on_request_success, policies::ExponentialBackoff,
};
use reqwest_tracing::TracingMiddleware;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::ApiKeyProvider;
use crate::error::{ApiError, MarketDataError};
use crate::rest::endpoints::{
    CMC_API_KEY_HEADER, COINGECKO_BASE_URL, COINMARKETCAP_BASE_URL, coingecko, coinmarketcap,
};
use crate::rest::traits::MarketDataApi;
use crate::rest::types::{
    Candle, ChartRequest, Coin, CoinInfo, CoinInfoRequest, ListingsRequest, MarketChart,
    OhlcRequest, QuotesRequest,
};

/// The market data REST client.
///
/// Talks to CoinMarketCap for listings, quotes and coin info, and to CoinGecko
/// for chart series and candles. Transport-level transient failures (connection
/// errors, 5xx) are retried by middleware; quota rejections (HTTP 429) are
/// returned as [`MarketDataError::RateLimitExceeded`] so the
/// [`RequestCoordinator`](crate::coordinator::RequestCoordinator) can apply its
/// own cooldown and backoff.
///
/// # Example
///
/// ```rust,no_run
/// use market_data_client::auth::EnvApiKey;
/// use market_data_client::rest::{ChartRequest, MarketDataApi, MarketRestClient};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut builder = MarketRestClient::builder();
///     if let Some(key) = EnvApiKey::try_from_env() {
///         builder = builder.api_key(Arc::new(key));
///     }
///     let client = builder.build();
///
///     let chart = client
///         .get_market_chart(&ChartRequest::new("bitcoin", "usd", "7"))
///         .await?;
///     println!("{} prices", chart.prices.len());
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MarketRestClient {
    http_client: ClientWithMiddleware,
    listings_base_url: String,
    charts_base_url: String,
    api_key: Option<Arc<dyn ApiKeyProvider>>,
}

impl MarketRestClient {
    /// Create a new client with default settings and no API key.
    ///
    /// CoinMarketCap endpoints fail with [`MarketDataError::MissingCredentials`]
    /// until a key is configured through [`MarketRestClient::builder()`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new client builder.
    pub fn builder() -> MarketRestClientBuilder {
        MarketRestClientBuilder::new()
    }

    /// Make an authenticated CoinMarketCap GET request.
    async fn cmc_get<T, Q>(&self, endpoint: &str, params: &Q) -> Result<T, MarketDataError>
    where
        T: DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(MarketDataError::MissingCredentials)?;

        let url = build_url(&self.listings_base_url, endpoint, params)?;
        debug!(%url, "coinmarketcap request");
        let response = self
            .http_client
            .get(&url)
            .header(CMC_API_KEY_HEADER, api_key.api_key().expose_secret())
            .send()
            .await?;

        let (status, retry_after_ms, body) = read_response(response).await?;
        parse_cmc_body(status, retry_after_ms, &body)
    }

    /// Make a CoinGecko GET request.
    async fn gecko_get<T, Q>(&self, endpoint: &str, params: &Q) -> Result<T, MarketDataError>
    where
        T: DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let url = build_url(&self.charts_base_url, endpoint, params)?;
        debug!(%url, "coingecko request");
        let response = self.http_client.get(&url).send().await?;

        let (status, retry_after_ms, body) = read_response(response).await?;
        parse_gecko_body(status, retry_after_ms, &body)
    }
}

impl Default for MarketRestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MarketRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketRestClient")
            .field("listings_base_url", &self.listings_base_url)
            .field("charts_base_url", &self.charts_base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

/// Builder for [`MarketRestClient`].
pub struct MarketRestClientBuilder {
    listings_base_url: String,
    charts_base_url: String,
    api_key: Option<Arc<dyn ApiKeyProvider>>,
    user_agent: Option<String>,
    timeout: Option<Duration>,
    max_retries: u32,
}

impl MarketRestClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            listings_base_url: COINMARKETCAP_BASE_URL.to_string(),
            charts_base_url: COINGECKO_BASE_URL.to_string(),
            api_key: None,
            user_agent: None,
            timeout: None,
            max_retries: 3,
        }
    }

    /// Set the CoinMarketCap base URL (useful for testing with a mock server).
    pub fn listings_base_url(mut self, url: impl Into<String>) -> Self {
        self.listings_base_url = url.into();
        self
    }

    /// Set the CoinGecko base URL (useful for testing with a mock server).
    pub fn charts_base_url(mut self, url: impl Into<String>) -> Self {
        self.charts_base_url = url.into();
        self
    }

    /// Point both upstreams at one base URL.
    pub fn base_url(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.listings_base_url(url.clone()).charts_base_url(url)
    }

    /// Set the CoinMarketCap API key provider.
    pub fn api_key(mut self, api_key: Arc<dyn ApiKeyProvider>) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set a per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the maximum number of transport-level retries for transient failures.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Build the client.
    pub fn build(self) -> MarketRestClient {
        let mut headers = HeaderMap::new();
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("market-data-client/{}", env!("CARGO_PKG_VERSION")));
        let header_value = HeaderValue::from_str(&user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("market-data-client"));
        headers.insert(USER_AGENT, header_value);

        let mut reqwest_builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = self.timeout {
            reqwest_builder = reqwest_builder.timeout(timeout);
        }
        let reqwest_client = reqwest_builder
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(self.max_retries);

        let client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                QuotaAwareStrategy,
            ))
            .build();

        MarketRestClient {
            http_client: client,
            listings_base_url: self.listings_base_url,
            charts_base_url: self.charts_base_url,
            api_key: self.api_key,
        }
    }
}

impl Default for MarketRestClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport retry strategy that leaves HTTP 429 to the coordinator.
///
/// Retrying a quota rejection inside the middleware would spend more quota
/// without the coordinator ever seeing the violation.
struct QuotaAwareStrategy;

impl RetryableStrategy for QuotaAwareStrategy {
    fn handle(
        &self,
        res: &Result<reqwest::Response, reqwest_middleware::Error>,
    ) -> Option<Retryable> {
        match res {
            Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => None,
            Ok(response) => default_on_request_success(response),
            Err(error) => default_on_request_failure(error),
        }
    }
}

fn build_url<Q>(base_url: &str, endpoint: &str, params: &Q) -> Result<String, MarketDataError>
where
    Q: serde::Serialize + ?Sized,
{
    let query_string = serde_urlencoded::to_string(params)
        .map_err(|e| MarketDataError::InvalidResponse(e.to_string()))?;
    Ok(if query_string.is_empty() {
        format!("{}{}", base_url, endpoint)
    } else {
        format!("{}{}?{}", base_url, endpoint, query_string)
    })
}

async fn read_response(
    response: reqwest::Response,
) -> Result<(StatusCode, Option<u64>, String), MarketDataError> {
    let status = response.status();
    let retry_after_ms = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000));
    let body = response.text().await?;
    Ok((status, retry_after_ms, body))
}

/// Error status object shared by both upstreams.
#[derive(Debug, Deserialize)]
struct UpstreamStatus {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: Option<String>,
}

impl UpstreamStatus {
    fn into_error(self) -> Option<MarketDataError> {
        if self.error_code == 0 {
            return None;
        }
        let api_error = ApiError::new(self.error_code, self.error_message.unwrap_or_default());
        if api_error.is_rate_limit() {
            Some(MarketDataError::RateLimitExceeded {
                retry_after_ms: None,
            })
        } else {
            Some(MarketDataError::Api(api_error))
        }
    }
}

/// Internal response wrapper for CoinMarketCap responses.
#[derive(Debug, Deserialize)]
struct CmcResponse<T> {
    status: UpstreamStatus,
    data: Option<T>,
}

/// Error body CoinGecko returns on non-success statuses: either a status
/// object or a bare `{"error": "..."}` message.
#[derive(Debug, Deserialize)]
struct GeckoErrorBody {
    #[serde(default)]
    status: Option<UpstreamStatus>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_cmc_body<T>(
    status: StatusCode,
    retry_after_ms: Option<u64>,
    body: &str,
) -> Result<T, MarketDataError>
where
    T: DeserializeOwned,
{
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(MarketDataError::RateLimitExceeded { retry_after_ms });
    }

    let parsed: CmcResponse<T> = serde_json::from_str(body).map_err(|e| {
        if status.is_success() {
            MarketDataError::InvalidResponse(format!(
                "Failed to parse response: {}. Body: {}",
                e, body
            ))
        } else {
            MarketDataError::InvalidResponse(format!("HTTP {}: {}", status, body))
        }
    })?;

    if let Some(error) = parsed.status.into_error() {
        return Err(error);
    }

    parsed.data.ok_or_else(|| {
        if !status.is_success() {
            MarketDataError::InvalidResponse(format!("HTTP {}: {}", status, body))
        } else {
            MarketDataError::InvalidResponse("Response missing 'data' field".to_string())
        }
    })
}

fn parse_gecko_body<T>(
    status: StatusCode,
    retry_after_ms: Option<u64>,
    body: &str,
) -> Result<T, MarketDataError>
where
    T: DeserializeOwned,
{
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(MarketDataError::RateLimitExceeded { retry_after_ms });
    }

    if !status.is_success() {
        let error = serde_json::from_str::<GeckoErrorBody>(body)
            .ok()
            .and_then(|parsed| match (parsed.status, parsed.error) {
                (Some(upstream), _) => upstream.into_error(),
                (None, Some(message)) => Some(MarketDataError::Api(ApiError::new(
                    i64::from(status.as_u16()),
                    message,
                ))),
                (None, None) => None,
            });
        return Err(error.unwrap_or_else(|| {
            MarketDataError::InvalidResponse(format!("HTTP {}: {}", status, body))
        }));
    }

    serde_json::from_str(body).map_err(|e| {
        MarketDataError::InvalidResponse(format!("Failed to parse response: {}. Body: {}", e, body))
    })
}

// MarketDataApi trait implementation.

impl MarketDataApi for MarketRestClient {
    // ========== CoinMarketCap ==========

    async fn get_listings(&self, request: &ListingsRequest) -> Result<Vec<Coin>, MarketDataError> {
        self.cmc_get(coinmarketcap::LISTINGS_LATEST, request).await
    }

    async fn get_quotes(
        &self,
        request: &QuotesRequest,
    ) -> Result<HashMap<String, Coin>, MarketDataError> {
        self.cmc_get(coinmarketcap::QUOTES_LATEST, request).await
    }

    async fn get_coin_info(
        &self,
        request: &CoinInfoRequest,
    ) -> Result<HashMap<String, CoinInfo>, MarketDataError> {
        self.cmc_get(coinmarketcap::INFO, request).await
    }

    // ========== CoinGecko ==========

    async fn get_market_chart(
        &self,
        request: &ChartRequest,
    ) -> Result<MarketChart, MarketDataError> {
        self.gecko_get(&coingecko::market_chart(&request.coin_id), request)
            .await
    }

    async fn get_ohlc(&self, request: &OhlcRequest) -> Result<Vec<Candle>, MarketDataError> {
        self.gecko_get(&coingecko::ohlc(&request.coin_id), request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_build_url() {
        let url = build_url("https://example.com", "/v1/x", &[("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(url, "https://example.com/v1/x?a=1&b=2");

        let empty: [(&str, &str); 0] = [];
        let url = build_url("https://example.com", "/v1/x", &empty).unwrap();
        assert_eq!(url, "https://example.com/v1/x");
    }

    #[test]
    fn test_cmc_success() {
        let body = r#"{"status": {"error_code": 0, "error_message": null}, "data": [1, 2, 3]}"#;
        let data: Vec<u32> = parse_cmc_body(StatusCode::OK, None, body).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn test_cmc_quota_code_is_rate_limit() {
        let body = r#"{"status": {"error_code": 1008, "error_message": "minute limit"}}"#;
        let err = parse_cmc_body::<Vec<u32>>(StatusCode::OK, None, body).unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::RateLimit);
    }

    #[test]
    fn test_cmc_invalid_key_is_fatal_api_error() {
        let body = r#"{"status": {"error_code": 1001, "error_message": "This API Key is invalid."}}"#;
        let err = parse_cmc_body::<Vec<u32>>(StatusCode::UNAUTHORIZED, None, body).unwrap_err();
        match err {
            MarketDataError::Api(api) => assert!(api.is_invalid_key()),
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[test]
    fn test_http_429_carries_retry_after() {
        let err = parse_gecko_body::<Vec<u32>>(StatusCode::TOO_MANY_REQUESTS, Some(30_000), "")
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(err.failure_kind(), FailureKind::RateLimit);
    }

    #[test]
    fn test_gecko_error_shapes() {
        let err = parse_gecko_body::<Vec<u32>>(
            StatusCode::NOT_FOUND,
            None,
            r#"{"error": "coin not found"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, MarketDataError::Api(ref api) if api.code == 404));

        let err = parse_gecko_body::<Vec<u32>>(StatusCode::BAD_GATEWAY, None, "<html>")
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Transient);
    }

    #[test]
    fn test_gecko_unparsable_success_is_transient() {
        let err = parse_gecko_body::<Vec<u32>>(StatusCode::OK, None, "not json").unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn test_cmc_requires_api_key() {
        let client = MarketRestClient::new();
        let err = client
            .get_listings(&ListingsRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::MissingCredentials));
    }
}
