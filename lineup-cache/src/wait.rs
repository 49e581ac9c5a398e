//! Bounded wait for upstream data.

use std::time::Duration;

/// What the coordinator does next while waiting for upstream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDecision {
    /// Upstream has data: load it.
    Proceed,
    /// Upstream is empty but the fallback set is not: build from it now and
    /// reconcile with upstream later.
    UseFallback,
    /// Poll again after the cooldown.
    Retry { after: Duration },
    /// Out of attempts with no data anywhere: go ready with an empty cache.
    GiveUp,
}

/// Fixed attempt count with a fixed cooldown between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl WaitPolicy {
    pub fn new(max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            max_attempts,
            cooldown,
        }
    }

    /// `attempt` counts polls already made, starting at zero.
    pub fn decide(&self, attempt: u32, upstream_count: usize, fallback_count: usize) -> WaitDecision {
        if upstream_count > 0 {
            WaitDecision::Proceed
        } else if fallback_count > 0 {
            WaitDecision::UseFallback
        } else if attempt + 1 >= self.max_attempts {
            WaitDecision::GiveUp
        } else {
            WaitDecision::Retry {
                after: self.cooldown,
            }
        }
    }
}
