//! Adaptive cooldown after quota violations.
//!
//! A single isolated violation costs a short pause. Violations that follow each
//! other within the rapid-repeat threshold mean callers are still pressing the
//! upstream too hard, so each one lengthens the next cooldown up to a cap.
//! While a cooldown is active every call to the protected upstream is rejected
//! without consulting its window.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::coordinator::CooldownConfig;

/// Cooldown state for the protected upstream.
#[derive(Debug)]
pub struct CooldownController {
    config: CooldownConfig,
    in_cooldown: bool,
    cooldown_end: Option<Instant>,
    consecutive_violations: u32,
    last_violation: Option<Instant>,
}

impl CooldownController {
    /// Create a controller with no cooldown active.
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            config,
            in_cooldown: false,
            cooldown_end: None,
            consecutive_violations: 0,
            last_violation: None,
        }
    }

    /// Whether calls are currently suspended.
    ///
    /// Once an active cooldown has fully elapsed this clears it and resets the
    /// violation counter, so the next violation starts fresh.
    pub fn is_in_cooldown(&mut self, now: Instant) -> bool {
        if !self.in_cooldown {
            return false;
        }
        match self.cooldown_end {
            Some(end) if now < end => true,
            _ => {
                debug!(
                    violations = self.consecutive_violations,
                    "cooldown elapsed, resetting violation count"
                );
                self.in_cooldown = false;
                self.cooldown_end = None;
                self.consecutive_violations = 0;
                false
            }
        }
    }

    /// Record a violation at `now` and start (or restart) a cooldown.
    ///
    /// Returns the cooldown duration.
    pub fn enter_cooldown(&mut self, now: Instant) -> Duration {
        let rapid = self
            .last_violation
            .is_some_and(|last| now.saturating_duration_since(last) < self.config.rapid_repeat);

        if rapid && self.consecutive_violations > 0 {
            self.consecutive_violations = self.consecutive_violations.saturating_add(1);
        } else {
            self.consecutive_violations = 1;
        }

        let duration = self.config.duration_for(self.consecutive_violations);
        self.in_cooldown = true;
        self.cooldown_end = Some(now + duration);
        self.last_violation = Some(now);

        warn!(
            violations = self.consecutive_violations,
            cooldown_secs = duration.as_secs_f64(),
            "entering rate limit cooldown"
        );
        duration
    }

    /// Time left in the active cooldown, if any.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        if !self.in_cooldown {
            return None;
        }
        self.cooldown_end
            .map(|end| end.saturating_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    /// Current consecutive-violation count.
    pub fn violations(&self) -> u32 {
        self.consecutive_violations
    }

    /// Point-in-time view for UI feedback.
    pub fn status(&mut self, now: Instant) -> CooldownStatus {
        let active = self.is_in_cooldown(now);
        CooldownStatus {
            active,
            remaining: self.remaining(now),
            violations: self.consecutive_violations,
        }
    }
}

/// Cooldown state as reported to callers ("retry in N seconds").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CooldownStatus {
    /// Whether a cooldown is active
    pub active: bool,
    /// Time left in the active cooldown
    pub remaining: Option<Duration>,
    /// Consecutive violation count
    pub violations: u32,
}
