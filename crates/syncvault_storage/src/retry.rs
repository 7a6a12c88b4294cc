//! Retry policy and a retrying transfer port wrapper.

use crate::error::{TransferError, TransferResult};
use crate::port::TransferPort;
use crate::remote_file::{RemoteFile, RemoteFileDescriptor, RemoteFileKind};
use rand::Rng;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Creates a policy with `max_attempts` attempts and default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Creates a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let mut nanos = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        if self.jitter && nanos > 0.0 {
            nanos += nanos * 0.25 * rand::thread_rng().gen::<f64>();
        }
        let capped = nanos.min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(capped.round() as u64).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Wraps a port so every operation is retried under a [`RetryPolicy`].
///
/// Between attempts the session is dropped and re-established. Only
/// [retryable](TransferError::is_retryable) errors are retried; others are
/// returned immediately. When the budget runs out the last error is wrapped
/// in [`TransferError::RetriesExhausted`].
#[derive(Debug)]
pub struct RetryingTransfer<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: TransferPort> RetryingTransfer<T> {
    /// Wraps `inner` with `policy`.
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped port.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn run<R>(
        &self,
        operation: &'static str,
        remote: &str,
        mut f: impl FnMut(&T) -> TransferResult<R>,
    ) -> TransferResult<R> {
        let mut attempt = 1;
        loop {
            let err = match f(&self.inner) {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if attempt >= self.policy.max_attempts {
                warn!(operation, remote, attempts = attempt, error = %err, "giving up");
                return Err(TransferError::RetriesExhausted {
                    operation,
                    remote: remote.to_string(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            debug!(operation, remote, attempt, ?delay, error = %err, "retrying");
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            attempt += 1;

            if let Err(err) = self.inner.disconnect() {
                debug!(operation, remote, error = %err, "disconnect failed");
            }
            if let Err(err) = self.inner.connect() {
                if !err.is_retryable() {
                    return Err(err);
                }
                debug!(operation, remote, error = %err, "reconnect failed");
            }
        }
    }
}

impl<T: TransferPort> TransferPort for RetryingTransfer<T> {
    fn connect(&self) -> TransferResult<()> {
        self.run("connect", "", |inner| inner.connect())
    }

    fn disconnect(&self) -> TransferResult<()> {
        self.inner.disconnect()
    }

    fn init(&self, create_if_missing: bool) -> TransferResult<()> {
        self.run("init", "", |inner| inner.init(create_if_missing))
    }

    fn upload(&self, data: &[u8], remote: &RemoteFile) -> TransferResult<()> {
        self.run("upload", &remote.path(), |inner| inner.upload(data, remote))
    }

    fn download(&self, remote: &RemoteFile, local: &Path) -> TransferResult<()> {
        self.run("download", &remote.path(), |inner| inner.download(remote, local))
    }

    fn delete(&self, remote: &RemoteFile) -> TransferResult<bool> {
        self.run("delete", &remote.path(), |inner| inner.delete(remote))
    }

    fn list(&self, kind: RemoteFileKind) -> TransferResult<BTreeMap<String, RemoteFileDescriptor>> {
        self.run("list", kind.label(), |inner| inner.list(kind))
    }
}
