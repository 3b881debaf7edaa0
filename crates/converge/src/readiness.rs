//! Connection readiness gate
//!
//! A freshly created server needs boot time before it accepts SSH. The
//! gate probes the host until a connection succeeds or the timeout would
//! be exceeded.

use crate::context::{CancelFlag, ProgressCallback, Transport};
use crate::error::{Error, Result};
use crate::types::ConnectionTarget;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

/// Polling policy for the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    /// Give up once this much time has passed
    pub timeout: Duration,
    /// Delay after the first failed probe
    pub interval: Duration,
    /// Multiplier applied to the delay after each failed probe; 1.0 polls at a fixed rate
    pub backoff_factor: f64,
    /// Upper bound for the delay
    pub max_interval: Duration,
}

impl ReadinessPolicy {
    /// Fixed-interval polling
    pub fn fixed(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            backoff_factor: 1.0,
            max_interval: interval,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let secs = self.interval.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_interval.as_secs_f64()).max(0.0))
    }
}

/// Timeouts for hosts created in this run versus hosts that already existed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Used when an upstream server was created in this run
    pub fresh: ReadinessPolicy,
    /// Used otherwise; a zero timeout skips the gate
    pub settled: ReadinessPolicy,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            fresh: ReadinessPolicy {
                timeout: Duration::from_secs(300),
                interval: Duration::from_secs(2),
                backoff_factor: 1.5,
                max_interval: Duration::from_secs(15),
            },
            settled: ReadinessPolicy::fixed(Duration::from_secs(30), Duration::from_secs(2)),
        }
    }
}

/// Blocks until a host accepts connections
pub struct ReadinessGate<'a> {
    transport: &'a dyn Transport,
    cancel: &'a CancelFlag,
    progress: &'a dyn ProgressCallback,
}

impl<'a> ReadinessGate<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        cancel: &'a CancelFlag,
        progress: &'a dyn ProgressCallback,
    ) -> Self {
        Self {
            transport,
            cancel,
            progress,
        }
    }

    /// Probe until the host is reachable
    ///
    /// Returns the time spent waiting. Fails with `UnreachableHost` when the
    /// next probe would start after the timeout.
    pub fn wait(&self, target: &ConnectionTarget, policy: &ReadinessPolicy) -> Result<Duration> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            self.cancel.check()?;

            let last_error = match self.transport.probe(target) {
                Ok(()) => {
                    let waited = started.elapsed();
                    log::info!("{} reachable after {:?}", target, waited);
                    return Ok(waited);
                }
                Err(e) => e.message,
            };

            attempt += 1;
            let elapsed = started.elapsed();
            let delay = policy.delay_after(attempt - 1);
            log::debug!(
                "Probe {} of {} failed after {:?}: {}",
                attempt,
                target,
                elapsed,
                last_error
            );
            self.progress.on_wait(&target.host, attempt, elapsed);

            if elapsed + delay > policy.timeout {
                return Err(Error::UnreachableHost {
                    host: target.host.clone(),
                    waited: elapsed,
                    last_error,
                });
            }

            thread::sleep(delay);
        }
    }
}
