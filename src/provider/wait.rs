//! Bounded readiness polling.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::{InstanceDetails, InstanceId, InstanceState, Provider};
use crate::clock::Clock;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval and hard ceiling for a readiness wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between two `describe` calls.
    pub interval: Duration,
    /// Maximum total time spent waiting.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout: WAIT_TIMEOUT,
        }
    }
}

/// Errors raised while waiting for an instance to run.
#[derive(Debug, Error)]
pub enum WaitError<E>
where
    E: std::error::Error + 'static,
{
    /// The ceiling elapsed before the platform reported `running`.
    #[error("instance {instance_id} not running after {}s", waited.as_secs())]
    Timeout {
        /// Instance being waited on.
        instance_id: InstanceId,
        /// Time spent waiting.
        waited: Duration,
    },
    /// A `describe` call failed.
    #[error("failed to poll instance state: {0}")]
    Provider(#[source] E),
}

/// Polls `provider` until `id` reports [`InstanceState::Running`].
///
/// An instance the platform does not list yet is treated as still pending.
/// The wait never exceeds `policy.timeout` of clock time: a `describe` call
/// still outstanding at the deadline is abandoned.
///
/// # Errors
///
/// Returns [`WaitError::Timeout`] when the ceiling elapses and
/// [`WaitError::Provider`] when a poll fails.
pub async fn wait_until_running<P, C>(
    provider: &P,
    clock: &C,
    id: &InstanceId,
    policy: PollPolicy,
) -> Result<InstanceDetails, WaitError<P::Error>>
where
    P: Provider + ?Sized,
    C: Clock + ?Sized,
{
    let started = clock.now();
    let deadline = started + policy.timeout;

    loop {
        let remaining = deadline.saturating_duration_since(clock.now());
        let polled = tokio::select! {
            biased;
            described = provider.describe(id) => described.map_err(WaitError::Provider)?,
            () = clock.sleep(remaining) => {
                warn!(instance_id = %id, "state poll still outstanding at the deadline");
                return Err(WaitError::Timeout {
                    instance_id: id.clone(),
                    waited: clock.now().saturating_duration_since(started),
                });
            }
        };
        match polled {
            Some(details) if details.state == InstanceState::Running => return Ok(details),
            Some(details) => debug!(instance_id = %id, state = %details.state, "instance not running yet"),
            None => debug!(instance_id = %id, "instance not visible yet"),
        }

        let now = clock.now();
        if now >= deadline {
            return Err(WaitError::Timeout {
                instance_id: id.clone(),
                waited: now.saturating_duration_since(started),
            });
        }
        clock.sleep(policy.interval.min(deadline - now)).await;
    }
}
