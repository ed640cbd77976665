//! Request coordination for rate-limited market data APIs.
//!
//! Market data screens tend to ask for the same thing many times in quick
//! succession, while upstreams such as CoinGecko enforce strict quotas. This
//! module sits between callers and any [`MarketDataApi`](crate::rest::MarketDataApi)
//! implementation and provides:
//!
//! - **Deduplication**: concurrent calls with the same [`RequestKey`] share one upstream call
//! - **Throttling**: a key cannot be re-issued before its [`RequestPriority`]'s minimum interval
//! - **Rate limiting**: a fixed-size call window per protected [`Upstream`]
//! - **Cooldown**: escalating suspension after repeated quota violations
//! - **Retry with backoff**: exponential, capped, with a longer schedule for quota errors
//! - **Priority scheduling**: High, Normal and Low FIFO queues drained in strict order
//!
//! ## Example
//!
//! ```rust,no_run
//! use market_data_client::coordinator::{CoordinatorConfig, RequestCoordinator, RequestPriority};
//! use market_data_client::rest::{ChartRequest, MarketRestClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = RequestCoordinator::new(MarketRestClient::new(), CoordinatorConfig::default());
//!
//!     let request = ChartRequest::new("bitcoin", "usd", "7");
//!     let chart = coordinator
//!         .fetch_chart_data(&request, Some(RequestPriority::High))
//!         .await?;
//!     println!("{} price points", chart.prices.len());
//!
//!     println!("{:?}", coordinator.status().await);
//!     Ok(())
//! }
//! ```
//!
//! ## Low-Level Components
//!
//! The policy pieces are plain structs driven by an explicit `now`, so they can be
//! used and tested on their own:
//!
//! ```rust
//! use market_data_client::coordinator::{CooldownConfig, CooldownController, UpstreamWindows, Upstream, WindowLimit};
//! use std::collections::HashMap;
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! let now = Instant::now();
//!
//! let mut cooldown = CooldownController::new(CooldownConfig::default());
//! let duration = cooldown.enter_cooldown(now);
//! assert!(cooldown.is_in_cooldown(now + duration / 2));
//!
//! let limits = HashMap::from([(Upstream::CoinGecko, WindowLimit::new(2, Duration::from_secs(60)))]);
//! let mut windows = UpstreamWindows::new(limits);
//! assert!(windows.try_reserve(Upstream::CoinGecko, now).is_ok());
//! ```

mod client;
mod config;
mod cooldown;
mod key;
mod ledger;
mod priority;
mod queue;
mod retry;
mod ttl_cache;
mod window;

pub use client::{CoordinatorStatus, RequestCoordinator};
pub use config::{
    BackoffSchedule, CoordinatorConfig, CoordinatorConfigBuilder, CooldownConfig,
    PriorityTiming, PriorityTimings, RetryConfig, WindowLimit,
};
pub use cooldown::{CooldownController, CooldownStatus};
pub use key::{RequestKey, RequestKeyBuilder};
pub use ledger::{DedupLedger, SharedOutcome};
pub use priority::RequestPriority;
pub use queue::{PriorityQueues, QueueDepths, QueuedRequest, SchedulerState};
pub use retry::RetryState;
pub use ttl_cache::TtlCache;
pub use window::{RateWindow, UpstreamWindows, WindowStatus};

pub use crate::types::Upstream;

/// Default coordination policy constants.
pub mod limits {
    /// Per-priority timing defaults.
    pub mod priority {
        use std::time::Duration;

        /// Minimum re-issue interval for High priority requests.
        pub const HIGH_MIN_REISSUE: Duration = Duration::from_secs(3);
        /// Minimum re-issue interval for Normal priority requests.
        pub const NORMAL_MIN_REISSUE: Duration = Duration::from_secs(10);
        /// Minimum re-issue interval for Low priority requests.
        pub const LOW_MIN_REISSUE: Duration = Duration::from_secs(30);
        /// Absolute floor High priority requests can never bypass.
        pub const HIGH_FLOOR: Duration = Duration::from_secs(1);
        /// Pause after dispatching a High priority request.
        pub const HIGH_SPACING: Duration = Duration::from_millis(100);
        /// Pause after dispatching a Normal priority request.
        pub const NORMAL_SPACING: Duration = Duration::from_millis(500);
        /// Pause after dispatching a Low priority request.
        pub const LOW_SPACING: Duration = Duration::from_secs(1);
    }

    /// CoinGecko quota defaults (free tier allows about 30 calls per minute).
    pub mod coingecko {
        use std::time::Duration;

        /// Maximum successful calls per window.
        pub const MAX_CALLS_PER_WINDOW: u32 = 25;
        /// Window length.
        pub const WINDOW: Duration = Duration::from_secs(60);
    }

    /// Cooldown defaults.
    pub mod cooldown {
        use std::time::Duration;

        /// Cooldown after an isolated violation.
        pub const BASE: Duration = Duration::from_secs(30);
        /// Extra cooldown per consecutive rapid violation.
        pub const STEP: Duration = Duration::from_secs(30);
        /// Upper bound on any cooldown.
        pub const MAX: Duration = Duration::from_secs(300);
        /// Violations closer together than this escalate severity.
        pub const RAPID_REPEAT: Duration = Duration::from_secs(60);
    }

    /// Retry defaults.
    pub mod retry {
        use std::time::Duration;

        /// Retries after the initial attempt.
        pub const MAX_ATTEMPTS: u32 = 3;
        /// First delay for transient failures.
        pub const TRANSIENT_BASE: Duration = Duration::from_secs(1);
        /// Delay cap for transient failures.
        pub const TRANSIENT_CAP: Duration = Duration::from_secs(8);
        /// First delay for quota failures.
        pub const RATE_LIMIT_BASE: Duration = Duration::from_secs(5);
        /// Delay cap for quota failures.
        pub const RATE_LIMIT_CAP: Duration = Duration::from_secs(60);
    }
}
