//! In-instance automaton that terminates the instance once its workload has
//! gone idle.
//!
//! The reaper runs as a systemd service installed by the boot script. It first
//! resolves its own instance identity from the metadata service, then ticks:
//! a workload that stopped running terminates the instance immediately, and a
//! workload whose log shows the idle marker without a later resume marker for
//! the full shutdown delay terminates it too. Nothing reports back to the
//! provisioning side.

mod activity;
mod countdown;
mod identity;

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::provider::Provider;

pub use activity::{
    ActivityError, ActivitySource, DEFAULT_DOCKER_BIN, DockerActivitySource, ProbeFuture,
};
pub use countdown::{
    ActivityMarkers, DEFAULT_IDLE_MARKER, DEFAULT_RESUME_MARKER, IdleCountdown, Verdict,
};
pub use identity::{
    IdentityError, IdentitySource, InstanceIdentity, METADATA_URL, MetadataIdentity,
    parse_metadata,
};

/// Timing and detection parameters for a [`Reaper`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReaperConfig {
    /// Delay between two observations.
    pub tick: Duration,
    /// Idle time after which the instance is terminated.
    pub shutdown_delay: Duration,
    /// Upper bound on output lines inspected per tick.
    pub window_lines: usize,
    /// Idle and resume markers.
    pub markers: ActivityMarkers,
    /// Maximum identity resolution attempts.
    pub identity_attempts: u32,
    /// Delay before the second identity attempt; doubles afterwards.
    pub identity_backoff: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(30),
            shutdown_delay: Duration::from_secs(300),
            window_lines: 200,
            markers: ActivityMarkers::default(),
            identity_attempts: 5,
            identity_backoff: Duration::from_secs(2),
        }
    }
}

/// Why the reaper requested termination.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownReason {
    /// The workload process stopped running.
    WorkloadExited,
    /// The workload stayed idle for the shutdown delay.
    IdleTimeout {
        /// Observed idle time.
        idle_for: Duration,
    },
}

/// Errors that stop the reaper before it can monitor anything.
#[derive(Debug, Error)]
pub enum ReaperError {
    /// The metadata service never yielded an identity.
    #[error("failed to resolve instance identity after {attempts} attempts: {source}")]
    IdentityResolutionFailed {
        /// Attempts made.
        attempts: u32,
        /// Last resolution error.
        #[source]
        source: IdentityError,
    },
}

/// Monitors one workload and terminates the hosting instance.
#[derive(Debug)]
pub struct Reaper<P, A, I, C = TokioClock> {
    provider: P,
    activity: A,
    identity: I,
    clock: C,
    config: ReaperConfig,
}

impl<P, A, I> Reaper<P, A, I, TokioClock>
where
    P: Provider,
    A: ActivitySource,
    I: IdentitySource,
{
    /// Creates a reaper driven by the Tokio clock.
    #[must_use]
    pub const fn new(provider: P, activity: A, identity: I, config: ReaperConfig) -> Self {
        Self {
            provider,
            activity,
            identity,
            clock: TokioClock,
            config,
        }
    }
}

impl<P, A, I, C> Reaper<P, A, I, C>
where
    P: Provider,
    A: ActivitySource,
    I: IdentitySource,
    C: Clock,
{
    /// Replaces the clock.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Reaper<P, A, I, C2> {
        Reaper {
            provider: self.provider,
            activity: self.activity,
            identity: self.identity,
            clock,
            config: self.config,
        }
    }

    /// Resolves identity and monitors the workload until it should go.
    ///
    /// Termination is requested once and its outcome only logged: the
    /// instance disappearing under the reaper is the expected result, and a
    /// failed request is left to manual cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`ReaperError::IdentityResolutionFailed`] when the metadata
    /// service does not answer within the configured attempts. No
    /// termination is requested in that case.
    pub async fn run(&self) -> Result<ShutdownReason, ReaperError> {
        let identity = self.resolve_identity().await?;
        info!(instance_id = %identity.id, "monitoring workload");

        let reason = self.monitor().await;
        self.terminate(&identity, reason).await;
        Ok(reason)
    }

    async fn resolve_identity(&self) -> Result<InstanceIdentity, ReaperError> {
        let attempts = self.config.identity_attempts.max(1);
        let mut backoff = self.config.identity_backoff;
        let mut attempt = 1;
        loop {
            match self.identity.resolve().await {
                Ok(identity) => return Ok(identity),
                Err(err) if attempt >= attempts => {
                    error!(attempts, error = %err, "giving up on instance identity");
                    return Err(ReaperError::IdentityResolutionFailed {
                        attempts,
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(attempt, error = %err, "instance identity unavailable, retrying");
                    self.clock.sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }

    async fn monitor(&self) -> ShutdownReason {
        let mut countdown =
            IdleCountdown::new(self.config.markers.clone(), self.config.shutdown_delay);
        let mut last_read = self.clock.now().checked_sub(self.config.tick);
        loop {
            if let Some(reason) = self.tick(&mut countdown, &mut last_read).await {
                return reason;
            }
            self.clock.sleep(self.config.tick).await;
        }
    }

    /// Each window holds only output printed since the previous successful
    /// read, so a marker is acted on once and never lingers.
    async fn tick(
        &self,
        countdown: &mut IdleCountdown,
        last_read: &mut Option<Instant>,
    ) -> Option<ShutdownReason> {
        match self.activity.is_running().await {
            Ok(true) => {}
            Ok(false) => {
                info!("workload is no longer running");
                return Some(ShutdownReason::WorkloadExited);
            }
            Err(err) => {
                warn!(error = %err, "workload probe failed, skipping tick");
                return None;
            }
        }

        let now = self.clock.now();
        let since = last_read.map_or(self.config.tick, |at| now.saturating_duration_since(at));
        let window = match self
            .activity
            .recent_output(since, self.config.window_lines)
            .await
        {
            Ok(window) => {
                *last_read = Some(now);
                window
            }
            Err(err) => {
                warn!(error = %err, "failed to read workload output, skipping tick");
                return None;
            }
        };

        let was_idle = countdown.idle_since().is_some();
        let verdict = countdown.observe(&window, now);
        match (was_idle, countdown.idle_since().is_some()) {
            (false, true) => info!(
                delay_secs = self.config.shutdown_delay.as_secs(),
                "workload idle, shutdown countdown started"
            ),
            (true, false) => info!("workload active again, countdown cancelled"),
            _ => debug!(idle = was_idle, "tick"),
        }

        match verdict {
            Verdict::Terminate { idle_for } => Some(ShutdownReason::IdleTimeout { idle_for }),
            Verdict::Continue => None,
        }
    }

    async fn terminate(&self, identity: &InstanceIdentity, reason: ShutdownReason) {
        info!(instance_id = %identity.id, ?reason, "requesting self-termination");
        match self.provider.terminate(&identity.id).await {
            Ok(()) => info!(instance_id = %identity.id, "termination requested"),
            Err(err) => error!(
                instance_id = %identity.id,
                error = %err,
                "self-termination failed; instance must be removed manually"
            ),
        }
    }
}

#[cfg(test)]
mod tests;
