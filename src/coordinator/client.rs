//! The request coordinator.
//!
//! Wraps any [`MarketDataApi`] implementation and routes every call through one
//! serialization point: a single async mutex guarding the dedup ledger, the
//! upstream windows, cooldowns, retry counters and priority queues. The lock is
//! only held while a decision is made; upstream I/O always runs outside it.
//!
//! A call flows through these steps:
//!
//! 1. **Throttle**: a key that succeeded too recently for its priority fails
//!    fast with [`CoordinatorError::Throttled`].
//! 2. **Deduplicate**: if the key is already in flight, the caller attaches to
//!    it and receives the same outcome.
//! 3. **Gate**: for protected upstreams an active cooldown or a full window
//!    rejects the call before it is queued. A full window also escalates the
//!    cooldown.
//! 4. **Queue**: the request is registered and enqueued at its priority. The
//!    drain task dispatches requests High before Normal before Low, pausing
//!    after each by the priority's spacing.
//! 5. **Dispatch with retry**: each attempt re-checks the gate, calls the
//!    upstream, and on a retryable failure waits out a capped exponential
//!    backoff before trying again.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::coordinator::ledger::await_outcome;
use crate::coordinator::{
    CoordinatorConfig, CooldownController, CooldownStatus, DedupLedger, PriorityQueues,
    QueueDepths, QueuedRequest, RequestKey, RequestPriority, RetryState, SchedulerState,
    SharedOutcome, Upstream, UpstreamWindows, WindowStatus,
};
use crate::error::{CoordinatorError, FailureKind, MarketDataError};
use crate::rest::{
    Candle, ChartRequest, Coin, CoinInfo, CoinInfoRequest, ListingsRequest, MarketChart,
    MarketDataApi, OhlcRequest, QuotesRequest,
};

/// Coordinates market data requests: deduplication, throttling, rate limiting,
/// cooldown, retry and priority scheduling.
///
/// Cloning is cheap and shares the same coordinator state, so one instance can
/// be handed to every screen of an application.
///
/// # Example
///
/// ```rust,no_run
/// use market_data_client::coordinator::{CoordinatorConfig, RequestCoordinator, RequestPriority};
/// use market_data_client::rest::{ListingsRequest, MarketRestClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let coordinator = RequestCoordinator::new(MarketRestClient::new(), CoordinatorConfig::default());
///
///     // Standard refresh at the default (Normal) priority
///     let coins = coordinator.fetch_top_coins(&ListingsRequest::top(100), None).await?;
///     println!("{} coins", coins.len());
///
///     // A user-driven filter change goes first
///     let request = ListingsRequest::top(100).start(101);
///     let next_page = coordinator
///         .fetch_top_coins(&request, Some(RequestPriority::High))
///         .await?;
///     println!("{} more coins", next_page.len());
///
///     Ok(())
/// }
/// ```
pub struct RequestCoordinator<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for RequestCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C> {
    client: C,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
}

/// All mutable coordinator state, guarded by one lock.
struct CoordinatorState {
    ledger: DedupLedger,
    windows: UpstreamWindows,
    cooldowns: HashMap<Upstream, CooldownController>,
    retry: RetryState,
    queues: PriorityQueues,
    drain: Option<AbortHandle>,
}

/// Why the gate of a protected upstream is closed.
enum GateBlock {
    Cooldown(Duration),
    WindowFull(Duration),
}

impl CoordinatorState {
    fn new(config: &CoordinatorConfig) -> Self {
        let cooldowns = config
            .windows
            .keys()
            .map(|upstream| (*upstream, CooldownController::new(config.cooldown)))
            .collect();

        Self {
            ledger: DedupLedger::new(config.priorities.longest_reissue_interval()),
            windows: UpstreamWindows::new(config.windows.clone()),
            cooldowns,
            retry: RetryState::new(config.retry),
            queues: PriorityQueues::new(),
            drain: None,
        }
    }

    /// Check the cooldown, then the window, of `upstream`.
    fn check_gate(&mut self, upstream: Upstream, now: Instant) -> Result<(), GateBlock> {
        if let Some(cooldown) = self.cooldowns.get_mut(&upstream) {
            if cooldown.is_in_cooldown(now) {
                let remaining = cooldown.remaining(now).unwrap_or_default();
                return Err(GateBlock::Cooldown(remaining));
            }
        }
        self.windows
            .try_reserve(upstream, now)
            .map_err(GateBlock::WindowFull)
    }

    /// Record a quota violation against `upstream`, returning the cooldown length.
    fn enter_cooldown(&mut self, upstream: Upstream, now: Instant) -> Option<Duration> {
        self.cooldowns
            .get_mut(&upstream)
            .map(|cooldown| cooldown.enter_cooldown(now))
    }

    fn cooldown_status(&mut self, now: Instant) -> CooldownStatus {
        self.cooldowns
            .values_mut()
            .map(|cooldown| cooldown.status(now))
            .max_by_key(|status| (status.active, status.remaining, status.violations))
            .unwrap_or_default()
    }
}

/// Point-in-time view of the coordinator, for "please wait" feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// Waiting requests per priority
    pub queue_depths: QueueDepths,
    /// Requests registered and not yet completed, queued ones included
    pub in_flight: usize,
    /// Whether the drain task is running
    pub scheduler: SchedulerState,
    /// Most restrictive cooldown across protected upstreams
    pub cooldown: CooldownStatus,
    /// Call windows of protected upstreams that have been used
    pub windows: Vec<WindowStatus>,
}

impl<C> RequestCoordinator<C>
where
    C: MarketDataApi + 'static,
{
    /// Create a coordinator around `client`.
    pub fn new(client: C, config: CoordinatorConfig) -> Self {
        let state = CoordinatorState::new(&config);
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Get a reference to the wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner.client
    }

    /// Get the configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Run `operation` under coordination.
    ///
    /// `key` identifies the logical request for deduplication and throttling;
    /// `upstream` selects the quota and cooldown that apply. `operation` may be
    /// invoked several times when retrying, so it must build a fresh future per
    /// call.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::Throttled`] if `key` succeeded too recently for `priority`
    /// - [`CoordinatorError::RateLimited`] if `upstream` is cooling down or its window is full
    /// - [`CoordinatorError::CastingError`] if an in-flight request for `key` produces another type
    /// - [`CoordinatorError::Cancelled`] if [`cancel_all`](Self::cancel_all) runs first
    /// - [`CoordinatorError::Upstream`] with the last failure once retries are exhausted
    pub async fn execute<T, F, Fut>(
        &self,
        key: RequestKey,
        priority: RequestPriority,
        upstream: Upstream,
        operation: F,
    ) -> Result<T, CoordinatorError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, MarketDataError>> + Send + 'static,
    {
        let receiver = {
            let mut state = self.inner.state.lock().await;
            let now = Instant::now();

            if let Err(retry_after) =
                state
                    .ledger
                    .check_throttle(&key, priority, &self.inner.config.priorities, now)
            {
                debug!(
                    key = %key,
                    priority = %priority,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "request throttled"
                );
                return Err(CoordinatorError::Throttled { key, retry_after });
            }

            if let Some(receiver) = state.ledger.attach(&key) {
                debug!(key = %key, priority = %priority, "attached to in-flight request");
                receiver
            } else {
                if let Err(block) = state.check_gate(upstream, now) {
                    let retry_after = match block {
                        GateBlock::Cooldown(remaining) => {
                            warn!(
                                key = %key,
                                priority = %priority,
                                upstream = %upstream,
                                remaining_ms = remaining.as_millis() as u64,
                                "rejected during cooldown"
                            );
                            remaining
                        }
                        GateBlock::WindowFull(resets_in) => {
                            let cooldown = state.enter_cooldown(upstream, now).unwrap_or_default();
                            warn!(
                                key = %key,
                                priority = %priority,
                                upstream = %upstream,
                                resets_in_ms = resets_in.as_millis() as u64,
                                "rejected, call window full"
                            );
                            cooldown.max(resets_in)
                        }
                    };
                    return Err(CoordinatorError::RateLimited {
                        upstream,
                        retry_after: Some(retry_after),
                    });
                }

                let (ticket, receiver) = state.ledger.register(&key);
                let dispatch = Arc::clone(&self.inner)
                    .dispatch(key.clone(), ticket, priority, upstream, operation)
                    .boxed();
                let request = QueuedRequest {
                    key: key.clone(),
                    ticket,
                    priority,
                    dispatch,
                };

                debug!(key = %key, priority = %priority, upstream = %upstream, "request queued");
                if state.queues.push(request) {
                    let drain = tokio::spawn(Arc::clone(&self.inner).drain());
                    state.drain = Some(drain.abort_handle());
                }
                receiver
            }
        };

        await_outcome(&key, priority, receiver).await
    }

    // ========== CoinMarketCap ==========

    /// Fetch a page of coin listings. Defaults to Normal priority.
    pub async fn fetch_top_coins(
        &self,
        request: &ListingsRequest,
        priority: Option<RequestPriority>,
    ) -> Result<Vec<Coin>, CoordinatorError> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        self.execute(
            request.request_key(),
            priority.unwrap_or(RequestPriority::Normal),
            Upstream::CoinMarketCap,
            move || {
                let inner = Arc::clone(&inner);
                let request = request.clone();
                async move { inner.client.get_listings(&request).await }
            },
        )
        .await
    }

    /// Fetch the latest quotes for specific coins. Defaults to Normal priority.
    pub async fn fetch_quotes(
        &self,
        request: &QuotesRequest,
        priority: Option<RequestPriority>,
    ) -> Result<HashMap<String, Coin>, CoordinatorError> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        self.execute(
            request.request_key(),
            priority.unwrap_or(RequestPriority::Normal),
            Upstream::CoinMarketCap,
            move || {
                let inner = Arc::clone(&inner);
                let request = request.clone();
                async move { inner.client.get_quotes(&request).await }
            },
        )
        .await
    }

    /// Fetch coin metadata for logos. Defaults to Low priority.
    pub async fn fetch_coin_logos(
        &self,
        request: &CoinInfoRequest,
        priority: Option<RequestPriority>,
    ) -> Result<HashMap<String, CoinInfo>, CoordinatorError> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        self.execute(
            request.request_key(),
            priority.unwrap_or(RequestPriority::Low),
            Upstream::CoinMarketCap,
            move || {
                let inner = Arc::clone(&inner);
                let request = request.clone();
                async move { inner.client.get_coin_info(&request).await }
            },
        )
        .await
    }

    // ========== CoinGecko ==========

    /// Fetch a coin's chart series. Defaults to Normal priority.
    pub async fn fetch_chart_data(
        &self,
        request: &ChartRequest,
        priority: Option<RequestPriority>,
    ) -> Result<MarketChart, CoordinatorError> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        self.execute(
            request.request_key(),
            priority.unwrap_or(RequestPriority::Normal),
            Upstream::CoinGecko,
            move || {
                let inner = Arc::clone(&inner);
                let request = request.clone();
                async move { inner.client.get_market_chart(&request).await }
            },
        )
        .await
    }

    /// Fetch a coin's OHLC candles. Defaults to Normal priority.
    pub async fn fetch_ohlc_data(
        &self,
        request: &OhlcRequest,
        priority: Option<RequestPriority>,
    ) -> Result<Vec<Candle>, CoordinatorError> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        self.execute(
            request.request_key(),
            priority.unwrap_or(RequestPriority::Normal),
            Upstream::CoinGecko,
            move || {
                let inner = Arc::clone(&inner);
                let request = request.clone();
                async move { inner.client.get_ohlc(&request).await }
            },
        )
        .await
    }

    // ========== Status ==========

    /// Waiting requests per priority.
    pub async fn queue_depths(&self) -> QueueDepths {
        self.inner.state.lock().await.queues.depths()
    }

    /// Most restrictive cooldown across protected upstreams.
    pub async fn cooldown_status(&self) -> CooldownStatus {
        self.inner.state.lock().await.cooldown_status(Instant::now())
    }

    /// Cooldown of one upstream, or `None` if it is not protected.
    pub async fn cooldown_status_for(&self, upstream: Upstream) -> Option<CooldownStatus> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        state
            .cooldowns
            .get_mut(&upstream)
            .map(|cooldown| cooldown.status(now))
    }

    /// Requests registered and not yet completed, queued ones included.
    pub async fn in_flight_count(&self) -> usize {
        self.inner.state.lock().await.ledger.in_flight_count()
    }

    /// Full status snapshot.
    pub async fn status(&self) -> CoordinatorStatus {
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        CoordinatorStatus {
            queue_depths: state.queues.depths(),
            in_flight: state.ledger.in_flight_count(),
            scheduler: state.queues.state(),
            cooldown: state.cooldown_status(now),
            windows: state.windows.snapshot(now),
        }
    }

    /// Cancel everything pending.
    ///
    /// Stops the drain task, drops every queued request, aborts running
    /// dispatches and clears retry counters. Every waiting caller receives
    /// [`CoordinatorError::Cancelled`]. Success stamps, windows and cooldowns are
    /// kept, so a burst of re-issues after a reset is still throttled.
    pub async fn cancel_all(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(drain) = state.drain.take() {
            drain.abort();
        }
        let queued = state.queues.clear();
        let in_flight = state.ledger.cancel_all();
        state.retry.clear_all();
        info!(queued, in_flight, "cancelled all pending requests");
    }
}

impl<C> Inner<C>
where
    C: MarketDataApi + 'static,
{
    /// Scheduler loop: dispatch the next request, pause by its priority's
    /// spacing, repeat until every queue is empty.
    async fn drain(self: Arc<Self>) {
        loop {
            let spacing = {
                let mut state = self.state.lock().await;
                let Some(request) = state.queues.pop_next() else {
                    state.drain = None;
                    state.ledger.cleanup(Instant::now());
                    debug!("queues empty, scheduler idle");
                    return;
                };

                let QueuedRequest {
                    key,
                    ticket,
                    priority,
                    dispatch,
                } = request;
                debug!(key = %key, priority = %priority, "dispatching");
                let handle = tokio::spawn(dispatch);
                state.ledger.set_dispatch(&key, ticket, handle.abort_handle());
                priority.dispatch_spacing(&self.config.priorities)
            };
            tokio::time::sleep(spacing).await;
        }
    }

    /// Run a registered request to completion and deliver its outcome.
    async fn dispatch<T, F, Fut>(
        self: Arc<Self>,
        key: RequestKey,
        ticket: u64,
        priority: RequestPriority,
        upstream: Upstream,
        operation: F,
    ) where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, MarketDataError>> + Send + 'static,
    {
        let outcome: SharedOutcome = self
            .run_with_retry(&key, priority, upstream, &operation)
            .await
            .map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>);

        let mut state = self.state.lock().await;
        let delivered = state.ledger.complete(&key, ticket, outcome, Instant::now());
        debug!(key = %key, priority = %priority, delivered, "request completed");
    }

    /// Call the upstream, retrying retryable failures with backoff.
    async fn run_with_retry<T, F, Fut>(
        &self,
        key: &RequestKey,
        priority: RequestPriority,
        upstream: Upstream,
        operation: &F,
    ) -> Result<T, CoordinatorError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        loop {
            let err = match self.attempt(key, upstream, operation).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let delay = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let kind = err.failure_kind();

                if kind == FailureKind::RateLimit
                    && matches!(err, CoordinatorError::Upstream(_))
                    && state.windows.is_protected(upstream)
                {
                    state.enter_cooldown(upstream, now);
                    state.windows.saturate(upstream, now);
                }

                match state.retry.next_delay(key, kind) {
                    Some(delay) => delay.max(err.retry_after().unwrap_or_default()),
                    None => {
                        warn!(
                            key = %key,
                            priority = %priority,
                            upstream = %upstream,
                            error = %err,
                            "request failed"
                        );
                        return Err(err);
                    }
                }
            };

            warn!(
                key = %key,
                priority = %priority,
                upstream = %upstream,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One gated upstream call. Counts against the window and clears the retry
    /// counter only on success.
    async fn attempt<T, F, Fut>(
        &self,
        key: &RequestKey,
        upstream: Upstream,
        operation: &F,
    ) -> Result<T, CoordinatorError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            if let Err(block) = state.check_gate(upstream, now) {
                let (GateBlock::Cooldown(wait) | GateBlock::WindowFull(wait)) = block;
                return Err(CoordinatorError::RateLimited {
                    upstream,
                    retry_after: Some(wait),
                });
            }
        }

        let value = operation().await?;

        let mut state = self.state.lock().await;
        state.windows.record_dispatch(upstream, Instant::now());
        state.retry.clear(key);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{BackoffSchedule, CooldownConfig, RetryConfig, WindowLimit};
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upstream double counting calls per operation.
    #[derive(Default)]
    struct MockApi {
        listings: AtomicUsize,
        quotes: AtomicUsize,
        charts: AtomicUsize,
    }

    impl MarketDataApi for MockApi {
        async fn get_listings(&self, _: &ListingsRequest) -> Result<Vec<Coin>, MarketDataError> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn get_quotes(
            &self,
            _: &QuotesRequest,
        ) -> Result<HashMap<String, Coin>, MarketDataError> {
            self.quotes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(HashMap::new())
        }

        async fn get_coin_info(
            &self,
            _: &CoinInfoRequest,
        ) -> Result<HashMap<String, CoinInfo>, MarketDataError> {
            Ok(HashMap::new())
        }

        async fn get_market_chart(&self, _: &ChartRequest) -> Result<MarketChart, MarketDataError> {
            self.charts.fetch_add(1, Ordering::SeqCst);
            Ok(MarketChart::default())
        }

        async fn get_ohlc(&self, _: &OhlcRequest) -> Result<Vec<Candle>, MarketDataError> {
            Ok(Vec::new())
        }
    }

    fn coordinator(config: CoordinatorConfig) -> RequestCoordinator<MockApi> {
        RequestCoordinator::new(MockApi::default(), config)
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            transient: BackoffSchedule::new(Duration::from_millis(100), Duration::from_secs(1)),
            rate_limit: BackoffSchedule::new(Duration::from_secs(5), Duration::from_secs(60)),
        }
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_dispatch() {
        let coordinator = coordinator(CoordinatorConfig::default());
        let request = QuotesRequest::for_ids([1, 1027]);

        let calls = (0..10).map(|_| coordinator.fetch_quotes(&request, None));
        let results = join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(coordinator.inner().quotes.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_execute_multicasts_value() {
        let coordinator = coordinator(CoordinatorConfig::default());
        let invocations = counter();

        let calls = (0..10).map(|_| {
            let invocations = Arc::clone(&invocations);
            coordinator.execute(
                RequestKey::from("custom|id=7"),
                RequestPriority::Normal,
                Upstream::CoinMarketCap,
                move || {
                    let invocations = Arc::clone(&invocations);
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, MarketDataError>(vec![7u64, 8, 9])
                    }
                },
            )
        });
        let results = join_all(calls).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), vec![7, 8, 9]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_within_interval_is_throttled() {
        let coordinator = coordinator(CoordinatorConfig::default());
        let request = ListingsRequest::top(100);

        coordinator.fetch_top_coins(&request, None).await.unwrap();
        let err = coordinator.fetch_top_coins(&request, None).await.unwrap_err();

        assert!(matches!(err, CoordinatorError::Throttled { .. }));
        assert!(err.retry_after().is_some());
        assert_eq!(coordinator.inner().listings.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        coordinator.fetch_top_coins(&request, None).await.unwrap();
        assert_eq!(coordinator.inner().listings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_priority_floor() {
        let coordinator = coordinator(CoordinatorConfig::default());
        let request = ListingsRequest::top(50);
        let high = Some(RequestPriority::High);

        coordinator.fetch_top_coins(&request, high).await.unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        let err = coordinator.fetch_top_coins(&request, high).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Throttled { .. }));

        tokio::time::advance(Duration::from_millis(700)).await;
        // Normal is still inside its interval; High only respects the floor.
        assert!(coordinator.fetch_top_coins(&request, None).await.is_err());
        coordinator.fetch_top_coins(&request, high).await.unwrap();
        assert_eq!(coordinator.inner().listings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_follows_priority_not_insertion() {
        let coordinator = coordinator(CoordinatorConfig::default());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let run = |tag: &'static str, priority: RequestPriority| {
            let coordinator = coordinator.clone();
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                coordinator
                    .execute(
                        RequestKey::from(tag),
                        priority,
                        Upstream::CoinMarketCap,
                        move || {
                            let order = Arc::clone(&order);
                            async move {
                                order.lock().unwrap().push(tag);
                                Ok::<_, MarketDataError>(())
                            }
                        },
                    )
                    .await
            })
        };

        // Dispatched at once; the scheduler then pauses for the Low spacing.
        let blocker = run("blocker", RequestPriority::Low);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let low = run("low", RequestPriority::Low);
        let normal = run("normal", RequestPriority::Normal);
        let high = run("high", RequestPriority::High);

        for handle in [blocker, low, normal, high] {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(
            *order.lock().unwrap(),
            vec!["blocker", "high", "normal", "low"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_duration() {
        let config = CoordinatorConfig::builder()
            .protect(Upstream::CoinGecko, WindowLimit::new(2, Duration::from_secs(60)))
            .build();
        let coordinator = coordinator(config);

        for days in ["1", "7"] {
            let request = ChartRequest::new("bitcoin", "usd", days);
            coordinator.fetch_chart_data(&request, None).await.unwrap();
        }
        let status = coordinator.status().await;
        assert_eq!(status.windows[0].count, 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        let request = ChartRequest::new("bitcoin", "usd", "30");
        coordinator.fetch_chart_data(&request, None).await.unwrap();

        assert_eq!(coordinator.inner().charts.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.status().await.windows[0].count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_window_rejects_before_queue() {
        let config = CoordinatorConfig::builder()
            .protect(Upstream::CoinGecko, WindowLimit::new(2, Duration::from_secs(60)))
            .build();
        let coordinator = coordinator(config);

        for days in ["1", "30"] {
            let request = ChartRequest::new("bitcoin", "usd", days);
            coordinator.fetch_chart_data(&request, None).await.unwrap();
        }
        let depths_before = coordinator.queue_depths().await;

        let request = ChartRequest::new("bitcoin", "usd", "7");
        let err = coordinator
            .fetch_chart_data(&request, Some(RequestPriority::High))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CoordinatorError::RateLimited {
                upstream: Upstream::CoinGecko,
                retry_after: Some(_),
            }
        ));
        assert_eq!(coordinator.inner().charts.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.queue_depths().await, depths_before);
        assert_eq!(coordinator.queue_depths().await.total(), 0);
        assert_eq!(coordinator.in_flight_count().await, 0);
        assert!(coordinator.cooldown_status().await.active);

        // Unprotected upstreams are unaffected.
        coordinator
            .fetch_top_coins(&ListingsRequest::default(), None)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_during_cooldown_do_not_escalate() {
        let config = CoordinatorConfig::builder()
            .protect(Upstream::CoinGecko, WindowLimit::new(1, Duration::from_secs(60)))
            .build();
        let coordinator = coordinator(config);

        let first = ChartRequest::new("bitcoin", "usd", "1");
        coordinator.fetch_chart_data(&first, None).await.unwrap();

        let second = ChartRequest::new("ethereum", "usd", "1");
        assert!(coordinator.fetch_chart_data(&second, None).await.is_err());
        assert!(coordinator.fetch_chart_data(&second, None).await.is_err());

        let status = coordinator
            .cooldown_status_for(Upstream::CoinGecko)
            .await
            .unwrap();
        assert!(status.active);
        assert_eq!(status.violations, 1);
        assert!(coordinator.cooldown_status_for(Upstream::CoinMarketCap).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cap_propagates_and_resets() {
        let config = CoordinatorConfig::builder().retry(fast_retry(3)).build();
        let coordinator = coordinator(config);
        let invocations = counter();
        let key = RequestKey::from("quotes|ids=1");

        let call = || {
            let invocations = Arc::clone(&invocations);
            coordinator.execute(
                key.clone(),
                RequestPriority::Normal,
                Upstream::CoinMarketCap,
                move || {
                    let invocations = Arc::clone(&invocations);
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Err::<u32, _>(MarketDataError::Timeout)
                    }
                },
            )
        };

        let err = call().await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Upstream(ref e) if matches!(**e, MarketDataError::Timeout)
        ));
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        assert_eq!(coordinator.inner.state.lock().await.retry.attempts(&key), 0);

        // A failed key is not throttled and retries from zero again.
        call().await.unwrap_err();
        assert_eq!(invocations.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let coordinator = coordinator(CoordinatorConfig::default());
        let invocations = counter();
        let counted = Arc::clone(&invocations);

        let err = coordinator
            .execute(
                RequestKey::from("listings"),
                RequestPriority::Normal,
                Upstream::CoinMarketCap,
                move || {
                    let counted = Arc::clone(&counted);
                    async move {
                        counted.fetch_add(1, Ordering::SeqCst);
                        Err::<u32, _>(MarketDataError::MissingCredentials)
                    }
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::Fatal);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_retry_state() {
        let config = CoordinatorConfig::builder().retry(fast_retry(3)).build();
        let coordinator = coordinator(config);
        let invocations = counter();
        let counted = Arc::clone(&invocations);
        let key = RequestKey::from("quotes|ids=52");

        let value = coordinator
            .execute(
                key.clone(),
                RequestPriority::Normal,
                Upstream::CoinMarketCap,
                move || {
                    let counted = Arc::clone(&counted);
                    async move {
                        if counted.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(MarketDataError::InvalidResponse("HTTP 502".into()))
                        } else {
                            Ok(52u32)
                        }
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(value, 52);
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.inner.state.lock().await.retry.attempts(&key), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_rate_limit_enters_cooldown_and_recovers() {
        let config = CoordinatorConfig::builder()
            .protect(Upstream::CoinGecko, WindowLimit::new(10, Duration::from_secs(60)))
            .cooldown(CooldownConfig {
                base: Duration::from_secs(30),
                step: Duration::from_secs(30),
                max: Duration::from_secs(120),
                rapid_repeat: Duration::from_secs(60),
            })
            .retry(RetryConfig {
                max_attempts: 6,
                ..RetryConfig::default()
            })
            .build();
        let coordinator = coordinator(config);
        let invocations = counter();
        let counted = Arc::clone(&invocations);

        let value = coordinator
            .execute(
                RequestKey::from("chart|coin=bitcoin|days=7|vs=usd"),
                RequestPriority::High,
                Upstream::CoinGecko,
                move || {
                    let counted = Arc::clone(&counted);
                    async move {
                        if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(MarketDataError::RateLimitExceeded {
                                retry_after_ms: None,
                            })
                        } else {
                            Ok("chart")
                        }
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(value, "chart");
        // Later attempts were held at the gate instead of reaching the upstream.
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        let status = coordinator.cooldown_status_for(Upstream::CoinGecko).await.unwrap();
        assert!(!status.active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_types_are_casting_error() {
        let coordinator = coordinator(CoordinatorConfig::default());
        let key = RequestKey::from("shared|id=1");

        let numbers = coordinator.execute(
            key.clone(),
            RequestPriority::Normal,
            Upstream::CoinMarketCap,
            || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, MarketDataError>(1u32)
            },
        );
        let strings = coordinator.execute(
            key.clone(),
            RequestPriority::Normal,
            Upstream::CoinMarketCap,
            || async { Ok::<_, MarketDataError>(String::from("one")) },
        );

        let (numbers, strings) = tokio::join!(numbers, strings);
        assert_eq!(numbers.unwrap(), 1);
        assert!(matches!(strings, Err(CoordinatorError::CastingError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_detaches_waiters() {
        let coordinator = coordinator(CoordinatorConfig::default());

        let slow = |tag: &'static str, priority: RequestPriority| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .execute(
                        RequestKey::from(tag),
                        priority,
                        Upstream::CoinMarketCap,
                        || async {
                            tokio::time::sleep(Duration::from_secs(60)).await;
                            Ok::<_, MarketDataError>(())
                        },
                    )
                    .await
            })
        };

        let running = slow("running", RequestPriority::Low);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let queued = slow("queued", RequestPriority::Normal);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = coordinator.status().await;
        assert_eq!(status.in_flight, 2);
        assert_eq!(status.queue_depths.normal, 1);

        coordinator.cancel_all().await;

        assert!(matches!(running.await.unwrap(), Err(CoordinatorError::Cancelled)));
        assert!(matches!(queued.await.unwrap(), Err(CoordinatorError::Cancelled)));

        let status = coordinator.status().await;
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.queue_depths.total(), 0);
        assert_eq!(status.scheduler, SchedulerState::Idle);

        // The coordinator keeps working after a reset.
        coordinator
            .fetch_top_coins(&ListingsRequest::default(), None)
            .await
            .unwrap();
    }
}
