//! Per-upstream call windows.
//!
//! Each protected upstream gets its own window: a start instant and a count of
//! calls confirmed as successfully sent since then. The window restarts once it
//! has fully elapsed. Failed calls never consume quota, so a burst of failing
//! retries cannot starve later valid calls.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::time::Duration;
//! use tokio::time::Instant;
//! use market_data_client::coordinator::{Upstream, UpstreamWindows, WindowLimit};
//!
//! let now = Instant::now();
//! let mut windows = UpstreamWindows::new(HashMap::from([(
//!     Upstream::CoinGecko,
//!     WindowLimit::new(1, Duration::from_secs(60)),
//! )]));
//!
//! assert!(windows.try_reserve(Upstream::CoinGecko, now).is_ok());
//! windows.record_dispatch(Upstream::CoinGecko, now);
//! assert!(windows.try_reserve(Upstream::CoinGecko, now).is_err());
//!
//! // Unprotected upstreams are never limited.
//! assert!(windows.try_reserve(Upstream::CoinMarketCap, now).is_ok());
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::coordinator::{Upstream, WindowLimit};

/// Call windows for every protected upstream.
#[derive(Debug)]
pub struct UpstreamWindows {
    /// Quota per protected upstream
    limits: HashMap<Upstream, WindowLimit>,
    /// Live windows, created on first use
    windows: HashMap<Upstream, RateWindow>,
}

impl UpstreamWindows {
    /// Create windows for the given protected upstreams.
    pub fn new(limits: HashMap<Upstream, WindowLimit>) -> Self {
        Self {
            limits,
            windows: HashMap::new(),
        }
    }

    /// Whether `upstream` has a quota.
    pub fn is_protected(&self, upstream: Upstream) -> bool {
        self.limits.contains_key(&upstream)
    }

    fn window_mut(&mut self, upstream: Upstream, now: Instant) -> Option<&mut RateWindow> {
        let limit = *self.limits.get(&upstream)?;
        Some(
            self.windows
                .entry(upstream)
                .or_insert_with(|| RateWindow::new(limit, now)),
        )
    }

    /// Check whether a call may be attempted.
    ///
    /// Returns `Err(wait_time)` until the window restarts if the quota is used up.
    /// Does not consume quota; see [`record_dispatch`](Self::record_dispatch).
    pub fn try_reserve(&mut self, upstream: Upstream, now: Instant) -> Result<(), Duration> {
        match self.window_mut(upstream, now) {
            Some(window) => window.try_reserve(now),
            None => Ok(()),
        }
    }

    /// Count a call that was confirmed as successfully sent.
    pub fn record_dispatch(&mut self, upstream: Upstream, now: Instant) {
        if let Some(window) = self.window_mut(upstream, now) {
            window.record_dispatch(now);
        }
    }

    /// Mark the window as exhausted from `now`, pushing its restart a full window out.
    ///
    /// Used when the upstream itself reports a quota violation.
    pub fn saturate(&mut self, upstream: Upstream, now: Instant) {
        if let Some(window) = self.window_mut(upstream, now) {
            window.saturate(now);
        }
    }

    /// Remaining calls in the current window, or `None` for unprotected upstreams.
    pub fn remaining(&mut self, upstream: Upstream, now: Instant) -> Option<u32> {
        self.window_mut(upstream, now).map(|w| w.remaining(now))
    }

    /// Snapshot of every window that has been used.
    pub fn snapshot(&mut self, now: Instant) -> Vec<WindowStatus> {
        let mut statuses: Vec<_> = self
            .windows
            .iter_mut()
            .map(|(upstream, window)| window.status(*upstream, now))
            .collect();
        statuses.sort_by_key(|s| s.upstream);
        statuses
    }
}

/// A single fixed-length call window.
#[derive(Debug, Clone)]
pub struct RateWindow {
    limit: WindowLimit,
    started: Instant,
    count: u32,
}

impl RateWindow {
    /// Create a window starting at `now`.
    pub fn new(limit: WindowLimit, now: Instant) -> Self {
        Self {
            limit,
            started: now,
            count: 0,
        }
    }

    /// Restart the window if it has fully elapsed.
    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.started) >= self.limit.window {
            self.started = now;
            self.count = 0;
        }
    }

    /// Check whether a call may be attempted. `Err(wait_time)` when exhausted.
    pub fn try_reserve(&mut self, now: Instant) -> Result<(), Duration> {
        self.roll(now);
        if self.count >= self.limit.max_calls {
            Err(self.resets_in(now))
        } else {
            Ok(())
        }
    }

    /// Count a successfully sent call.
    pub fn record_dispatch(&mut self, now: Instant) {
        self.roll(now);
        self.count = self.count.saturating_add(1);
    }

    /// Exhaust the window starting at `now`.
    pub fn saturate(&mut self, now: Instant) {
        self.started = now;
        self.count = self.limit.max_calls;
    }

    /// Calls left in the current window.
    pub fn remaining(&mut self, now: Instant) -> u32 {
        self.roll(now);
        self.limit.max_calls.saturating_sub(self.count)
    }

    fn resets_in(&self, now: Instant) -> Duration {
        self.limit
            .window
            .saturating_sub(now.saturating_duration_since(self.started))
    }

    fn status(&mut self, upstream: Upstream, now: Instant) -> WindowStatus {
        self.roll(now);
        WindowStatus {
            upstream,
            count: self.count,
            max_calls: self.limit.max_calls,
            resets_in: self.resets_in(now),
        }
    }
}

/// Point-in-time view of an upstream's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    /// The upstream
    pub upstream: Upstream,
    /// Calls counted in the current window
    pub count: u32,
    /// Quota per window
    pub max_calls: u32,
    /// Time until the window restarts
    pub resets_in: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows(max_calls: u32, window_secs: u64) -> UpstreamWindows {
        UpstreamWindows::new(HashMap::from([(
            Upstream::CoinGecko,
            WindowLimit::new(max_calls, Duration::from_secs(window_secs)),
        )]))
    }

    #[test]
    fn test_window_allows_within_limit() {
        let now = Instant::now();
        let mut windows = windows(2, 60);

        for _ in 0..2 {
            assert!(windows.try_reserve(Upstream::CoinGecko, now).is_ok());
            windows.record_dispatch(Upstream::CoinGecko, now);
        }
        let wait = windows.try_reserve(Upstream::CoinGecko, now).unwrap_err();
        assert_eq!(wait, Duration::from_secs(60));
    }

    #[test]
    fn test_window_resets_after_duration() {
        let now = Instant::now();
        let mut windows = windows(2, 60);

        windows.record_dispatch(Upstream::CoinGecko, now);
        windows.record_dispatch(Upstream::CoinGecko, now + Duration::from_secs(1));
        assert!(windows.try_reserve(Upstream::CoinGecko, now + Duration::from_secs(30)).is_err());

        let later = now + Duration::from_secs(61);
        assert!(windows.try_reserve(Upstream::CoinGecko, later).is_ok());
        assert_eq!(windows.remaining(Upstream::CoinGecko, later), Some(2));
    }

    #[test]
    fn test_failed_attempts_do_not_consume_quota() {
        let now = Instant::now();
        let mut windows = windows(1, 60);

        // Reserving without recording leaves the quota untouched.
        for _ in 0..5 {
            assert!(windows.try_reserve(Upstream::CoinGecko, now).is_ok());
        }
        assert_eq!(windows.remaining(Upstream::CoinGecko, now), Some(1));
    }

    #[test]
    fn test_saturate_extends_window() {
        let now = Instant::now();
        let mut windows = windows(10, 60);

        windows.record_dispatch(Upstream::CoinGecko, now);
        let violation = now + Duration::from_secs(50);
        windows.saturate(Upstream::CoinGecko, violation);

        // Original window would have reset at 60s; the saturated one runs until 110s.
        let wait = windows
            .try_reserve(Upstream::CoinGecko, now + Duration::from_secs(70))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(40));
        assert!(windows.try_reserve(Upstream::CoinGecko, now + Duration::from_secs(110)).is_ok());
    }

    #[test]
    fn test_upstreams_are_independent() {
        let now = Instant::now();
        let mut windows = UpstreamWindows::new(HashMap::from([
            (Upstream::CoinGecko, WindowLimit::new(1, Duration::from_secs(60))),
            (Upstream::CoinMarketCap, WindowLimit::new(1, Duration::from_secs(60))),
        ]));

        windows.record_dispatch(Upstream::CoinGecko, now);
        assert!(windows.try_reserve(Upstream::CoinGecko, now).is_err());
        assert!(windows.try_reserve(Upstream::CoinMarketCap, now).is_ok());
    }

    #[test]
    fn test_unprotected_upstream() {
        let now = Instant::now();
        let mut windows = windows(1, 60);

        assert!(!windows.is_protected(Upstream::CoinMarketCap));
        windows.record_dispatch(Upstream::CoinMarketCap, now);
        assert_eq!(windows.remaining(Upstream::CoinMarketCap, now), None);
        assert!(windows.snapshot(now).is_empty());
    }

    #[test]
    fn test_snapshot() {
        let now = Instant::now();
        let mut windows = windows(3, 60);

        windows.record_dispatch(Upstream::CoinGecko, now);
        let snapshot = windows.snapshot(now + Duration::from_secs(15));
        assert_eq!(
            snapshot,
            vec![WindowStatus {
                upstream: Upstream::CoinGecko,
                count: 1,
                max_calls: 3,
                resets_in: Duration::from_secs(45),
            }]
        );
    }
}
