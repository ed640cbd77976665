//! Request priority tiers.

use std::time::Duration;

use crate::coordinator::PriorityTimings;

/// Caller-assigned urgency of a request.
///
/// Priority controls two things: how soon the same key may be re-issued
/// (throttling) and which queue the request waits in before dispatch.
/// Variants are ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RequestPriority {
    /// User-initiated work such as a filter change or opening a detail screen.
    High,
    /// Standard list and quote refreshes.
    #[default]
    Normal,
    /// Background prefetch such as logos.
    Low,
}

impl RequestPriority {
    /// All priorities in dispatch order.
    pub const ALL: [RequestPriority; 3] = [
        RequestPriority::High,
        RequestPriority::Normal,
        RequestPriority::Low,
    ];

    /// Nominal minimum interval between two issues of the same key.
    pub fn min_reissue_interval(self, timings: &PriorityTimings) -> Duration {
        timings.get(self).min_reissue_interval
    }

    /// Interval during which a repeat of the same key is rejected as throttled.
    ///
    /// High priority only honours the absolute floor so user actions stay
    /// responsive; the other tiers honour their full interval.
    pub fn throttle_window(self, timings: &PriorityTimings) -> Duration {
        match self {
            RequestPriority::High => timings.high_floor.min(timings.high.min_reissue_interval),
            _ => self.min_reissue_interval(timings),
        }
    }

    /// Pause the scheduler takes after dispatching a request of this priority.
    pub fn dispatch_spacing(self, timings: &PriorityTimings) -> Duration {
        timings.get(self).dispatch_spacing
    }

    /// Short tag for logs and UI.
    pub fn display_tag(self) -> &'static str {
        match self {
            RequestPriority::High => "HIGH",
            RequestPriority::Normal => "NORMAL",
            RequestPriority::Low => "LOW",
        }
    }
}

impl std::fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_tag())
    }
}
