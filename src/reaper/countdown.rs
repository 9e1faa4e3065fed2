//! Debounced idle countdown driven by workload log markers.

use std::time::{Duration, Instant};

/// Log fragments the workload prints when it goes idle or becomes active.
///
/// These strings are a contract with the container image: the defaults match
/// the messages printed by `itzg/minecraft-server` with autopause enabled and
/// by the server itself when a player joins.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActivityMarkers {
    /// Fragment that starts the countdown.
    pub idle: String,
    /// Fragment that cancels the countdown.
    pub resume: String,
}

/// Default idle marker.
pub const DEFAULT_IDLE_MARKER: &str = "Server empty for";
/// Default resume marker.
pub const DEFAULT_RESUME_MARKER: &str = "joined the game";

impl Default for ActivityMarkers {
    fn default() -> Self {
        Self {
            idle: String::from(DEFAULT_IDLE_MARKER),
            resume: String::from(DEFAULT_RESUME_MARKER),
        }
    }
}

/// Outcome of a single observation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Keep monitoring.
    Continue,
    /// The workload has been idle for at least the shutdown delay.
    Terminate {
        /// Time since the countdown started.
        idle_for: Duration,
    },
}

/// Idle timer state for one monitored workload.
#[derive(Clone, Debug)]
pub struct IdleCountdown {
    markers: ActivityMarkers,
    shutdown_delay: Duration,
    idle_since: Option<Instant>,
}

impl IdleCountdown {
    /// Creates a countdown in the active state.
    #[must_use]
    pub const fn new(markers: ActivityMarkers, shutdown_delay: Duration) -> Self {
        Self {
            markers,
            shutdown_delay,
            idle_since: None,
        }
    }

    /// When the current idle episode started, if one is running.
    #[must_use]
    pub const fn idle_since(&self) -> Option<Instant> {
        self.idle_since
    }

    /// Feeds the latest output window observed at `now`.
    ///
    /// The idle marker only starts a countdown that is not already running.
    /// The resume marker cancels any countdown, and is checked after the idle
    /// marker so a window containing both leaves the timer unset.
    pub fn observe(&mut self, window: &str, now: Instant) -> Verdict {
        if self.idle_since.is_none() && window.contains(&self.markers.idle) {
            self.idle_since = Some(now);
        }
        if window.contains(&self.markers.resume) {
            self.idle_since = None;
        }

        match self.idle_since {
            Some(since) => {
                let idle_for = now.saturating_duration_since(since);
                if idle_for >= self.shutdown_delay {
                    Verdict::Terminate { idle_for }
                } else {
                    Verdict::Continue
                }
            }
            None => Verdict::Continue,
        }
    }
}
