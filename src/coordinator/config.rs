//! Coordinator configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::coordinator::limits;
use crate::coordinator::{RequestPriority, Upstream};
use crate::error::FailureKind;

/// Timing policy for one priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityTiming {
    /// Minimum interval between two issues of the same key.
    pub min_reissue_interval: Duration,
    /// Pause the scheduler takes after dispatching a request of this tier.
    pub dispatch_spacing: Duration,
}

impl PriorityTiming {
    /// Create a new timing policy.
    pub fn new(min_reissue_interval: Duration, dispatch_spacing: Duration) -> Self {
        Self {
            min_reissue_interval,
            dispatch_spacing,
        }
    }
}

/// Timing policy for all priority tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTimings {
    /// High priority timing.
    pub high: PriorityTiming,
    /// Normal priority timing.
    pub normal: PriorityTiming,
    /// Low priority timing.
    pub low: PriorityTiming,
    /// Absolute re-issue floor for High priority.
    pub high_floor: Duration,
}

impl PriorityTimings {
    /// Get the timing for a priority.
    pub fn get(&self, priority: RequestPriority) -> &PriorityTiming {
        match priority {
            RequestPriority::High => &self.high,
            RequestPriority::Normal => &self.normal,
            RequestPriority::Low => &self.low,
        }
    }

    fn get_mut(&mut self, priority: RequestPriority) -> &mut PriorityTiming {
        match priority {
            RequestPriority::High => &mut self.high,
            RequestPriority::Normal => &mut self.normal,
            RequestPriority::Low => &mut self.low,
        }
    }

    /// Longest re-issue interval of any tier.
    ///
    /// Success timestamps older than this can never throttle anything.
    pub fn longest_reissue_interval(&self) -> Duration {
        RequestPriority::ALL
            .iter()
            .map(|p| self.get(*p).min_reissue_interval)
            .max()
            .unwrap_or_default()
    }
}

impl Default for PriorityTimings {
    fn default() -> Self {
        use limits::priority::*;

        Self {
            high: PriorityTiming::new(HIGH_MIN_REISSUE, HIGH_SPACING),
            normal: PriorityTiming::new(NORMAL_MIN_REISSUE, NORMAL_SPACING),
            low: PriorityTiming::new(LOW_MIN_REISSUE, LOW_SPACING),
            high_floor: HIGH_FLOOR,
        }
    }
}

/// Call quota for a protected upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    /// Maximum successful calls per window.
    pub max_calls: u32,
    /// Window length.
    pub window: Duration,
}

impl WindowLimit {
    /// Create a new window limit.
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self { max_calls, window }
    }
}

/// Cooldown escalation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownConfig {
    /// Cooldown after an isolated violation.
    pub base: Duration,
    /// Extra cooldown per additional rapid violation.
    pub step: Duration,
    /// Upper bound on any cooldown.
    pub max: Duration,
    /// Violations closer together than this escalate severity.
    pub rapid_repeat: Duration,
}

impl CooldownConfig {
    /// Cooldown length for the given consecutive-violation count.
    pub fn duration_for(&self, violations: u32) -> Duration {
        let extra = self.step.saturating_mul(violations.saturating_sub(1));
        self.base.saturating_add(extra).min(self.max)
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base: limits::cooldown::BASE,
            step: limits::cooldown::STEP,
            max: limits::cooldown::MAX,
            rapid_repeat: limits::cooldown::RAPID_REPEAT,
        }
    }
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSchedule {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl BackoffSchedule {
    /// Create a new schedule.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempts + 1`: `min(base * 2^attempts, max)`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        2u32.checked_pow(attempts)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries allowed after the initial attempt.
    pub max_attempts: u32,
    /// Schedule for transient failures.
    pub transient: BackoffSchedule,
    /// Schedule for quota failures.
    pub rate_limit: BackoffSchedule,
}

impl RetryConfig {
    /// Schedule for a failure kind, or `None` when it is not retryable.
    pub fn schedule(&self, kind: FailureKind) -> Option<&BackoffSchedule> {
        match kind {
            FailureKind::RateLimit => Some(&self.rate_limit),
            FailureKind::Transient => Some(&self.transient),
            FailureKind::Fatal => None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        use limits::retry::*;

        Self {
            max_attempts: MAX_ATTEMPTS,
            transient: BackoffSchedule::new(TRANSIENT_BASE, TRANSIENT_CAP),
            rate_limit: BackoffSchedule::new(RATE_LIMIT_BASE, RATE_LIMIT_CAP),
        }
    }
}

/// Configuration for a [`RequestCoordinator`](crate::coordinator::RequestCoordinator).
///
/// Every policy knob lives here so it can be tuned, or shortened in tests,
/// without touching coordination logic.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-priority throttling and pacing.
    pub priorities: PriorityTimings,
    /// Quota windows for protected upstreams. Upstreams without an entry are unlimited.
    pub windows: HashMap<Upstream, WindowLimit>,
    /// Cooldown escalation policy.
    pub cooldown: CooldownConfig,
    /// Retry policy.
    pub retry: RetryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            priorities: PriorityTimings::default(),
            windows: HashMap::from([(
                Upstream::CoinGecko,
                WindowLimit::new(
                    limits::coingecko::MAX_CALLS_PER_WINDOW,
                    limits::coingecko::WINDOW,
                ),
            )]),
            cooldown: CooldownConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a new configuration builder.
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::new()
    }

    /// Whether calls to `upstream` are quota-limited.
    pub fn is_protected(&self, upstream: Upstream) -> bool {
        self.windows.contains_key(&upstream)
    }
}

/// Builder for [`CoordinatorConfig`].
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
        }
    }

    /// Set the timing for one priority tier.
    pub fn priority_timing(mut self, priority: RequestPriority, timing: PriorityTiming) -> Self {
        *self.config.priorities.get_mut(priority) = timing;
        self
    }

    /// Set the minimum re-issue interval for one priority tier.
    pub fn min_reissue_interval(mut self, priority: RequestPriority, interval: Duration) -> Self {
        self.config.priorities.get_mut(priority).min_reissue_interval = interval;
        self
    }

    /// Set the post-dispatch pause for one priority tier.
    pub fn dispatch_spacing(mut self, priority: RequestPriority, spacing: Duration) -> Self {
        self.config.priorities.get_mut(priority).dispatch_spacing = spacing;
        self
    }

    /// Set the absolute High priority re-issue floor.
    pub fn high_floor(mut self, floor: Duration) -> Self {
        self.config.priorities.high_floor = floor;
        self
    }

    /// Protect an upstream with a call window.
    pub fn protect(mut self, upstream: Upstream, limit: WindowLimit) -> Self {
        self.config.windows.insert(upstream, limit);
        self
    }

    /// Remove quota protection from an upstream.
    pub fn unprotect(mut self, upstream: Upstream) -> Self {
        self.config.windows.remove(&upstream);
        self
    }

    /// Set the cooldown policy.
    pub fn cooldown(mut self, cooldown: CooldownConfig) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the maximum number of retries.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> CoordinatorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let schedule = BackoffSchedule::new(Duration::from_secs(1), Duration::from_secs(8));
        let delays: Vec<_> = (0..6).map(|n| schedule.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_backoff_survives_huge_attempts() {
        let schedule = BackoffSchedule::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(schedule.delay_for(200), Duration::from_secs(60));
    }

    #[test]
    fn test_cooldown_duration_escalates_and_caps() {
        let config = CooldownConfig {
            base: Duration::from_secs(30),
            step: Duration::from_secs(30),
            max: Duration::from_secs(100),
            rapid_repeat: Duration::from_secs(60),
        };
        assert_eq!(config.duration_for(1), Duration::from_secs(30));
        assert_eq!(config.duration_for(2), Duration::from_secs(60));
        assert_eq!(config.duration_for(3), Duration::from_secs(90));
        assert_eq!(config.duration_for(4), Duration::from_secs(100));
    }

    #[test]
    fn test_rate_limit_schedule_is_longer() {
        let retry = RetryConfig::default();
        let quota = retry.schedule(FailureKind::RateLimit).unwrap();
        let transient = retry.schedule(FailureKind::Transient).unwrap();
        assert!(quota.delay_for(0) > transient.delay_for(0));
        assert!(retry.schedule(FailureKind::Fatal).is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = CoordinatorConfig::builder()
            .min_reissue_interval(RequestPriority::Low, Duration::from_secs(90))
            .dispatch_spacing(RequestPriority::High, Duration::ZERO)
            .protect(
                Upstream::CoinMarketCap,
                WindowLimit::new(30, Duration::from_secs(60)),
            )
            .max_attempts(5)
            .build();

        assert_eq!(
            config.priorities.low.min_reissue_interval,
            Duration::from_secs(90)
        );
        assert_eq!(config.priorities.high.dispatch_spacing, Duration::ZERO);
        assert!(config.is_protected(Upstream::CoinMarketCap));
        assert!(config.is_protected(Upstream::CoinGecko));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(
            config.priorities.longest_reissue_interval(),
            Duration::from_secs(90)
        );
    }
}
