//! Fixed-interval polling used to wait for remote processing to finish.
//!
//! The loop is strictly sequential: one probe in flight at a time, a fixed
//! delay between probes and a hard attempt bound. There is no backoff.

use std::{future::Future, time::Duration};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: usize,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: usize) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 10)
    }
}

/// What a single probe observed.
#[derive(Debug)]
pub enum Probe<T> {
    Ready(T),
    Pending,
    Failed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempts: usize },
    Failed { attempt: usize },
    Exhausted { attempts: usize },
}

/// Runs `probe` until it reports `Ready` or `Failed`, or until the policy's
/// attempt bound is spent. Probe errors abort the loop immediately.
///
/// `probe` receives the 1-based attempt number. The delay is applied between
/// attempts only, never after the last one.
pub async fn poll_until<T, E, F, Fut>(policy: PollPolicy, mut probe: F) -> Result<PollOutcome<T>, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Probe<T>, E>>,
{
    for attempt in 1..=policy.max_attempts {
        match probe(attempt).await? {
            Probe::Ready(value) => {
                return Ok(PollOutcome::Ready {
                    value,
                    attempts: attempt,
                });
            }
            Probe::Failed => return Ok(PollOutcome::Failed { attempt }),
            Probe::Pending => {
                debug!(attempt, max_attempts = policy.max_attempts, "poll pending");
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Ok(PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    })
}
