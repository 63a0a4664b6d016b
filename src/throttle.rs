//! Publish throttling: decides which raw fixes are worth transmitting.

use std::time::{Duration, Instant};

use crate::config::Config;
use crate::geo::{Coordinate, distance_km};

/// Reporter-local throttle bookkeeping. Mutated only after a confirmed
/// successful publish.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottleState {
    pub last_sent_position: Option<Coordinate>,
    pub last_sent_at: Option<Instant>,
}

impl ThrottleState {
    /// Record a confirmed publish.
    pub fn mark_sent(&mut self, position: Coordinate, at: Instant) {
        self.last_sent_position = Some(position);
        self.last_sent_at = Some(at);
    }

    /// Forget throttle history, e.g. when a trip ends.
    pub fn clear(&mut self) {
        self.last_sent_position = None;
        self.last_sent_at = None;
    }
}

/// Thresholds for the publish decision.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    pub max_interval: Duration,
    pub min_distance_meters: f64,
}

impl From<&Config> for ThrottlePolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_interval: config.max_interval,
            min_distance_meters: config.min_distance_meters,
        }
    }
}

/// Whether `candidate` is worth publishing.
///
/// Either condition alone suffices: elapsed time keeps a heartbeat flowing
/// while stationary, displacement keeps updates fine-grained while moving.
/// The very first fix always passes (both sides of the state are `None`).
#[must_use]
pub fn should_publish(
    candidate: Coordinate, state: &ThrottleState, now: Instant, policy: &ThrottlePolicy,
) -> bool {
    let time_ok = state
        .last_sent_at
        .is_none_or(|last_sent_at| now.duration_since(last_sent_at) >= policy.max_interval);

    let distance_ok = state.last_sent_position.is_none_or(|last_position| {
        distance_km(last_position, candidate) * 1_000.0 >= policy.min_distance_meters
    });

    time_ok || distance_ok
}
