//! Retry with exponential backoff.
//!
//! [`Cx::retry`] re-issues a failing `call` effect, sleeping through a
//! `delay` effect between attempts. Backoff is deterministic: the runtime on
//! a virtual clock replays the same schedule every run.
//!
//! # Cancellation Handling
//!
//! Both the call and the sleep are effects, so a cancelled task stops at
//! whichever one it is parked on and never starts another attempt.

use std::time::Duration;

use serde_json::Value;

use crate::cx::Cx;
use crate::effect::Callable;
use crate::error::{Error, Recoverability, Result};
use crate::tracing_compat::debug;

/// Policy for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Caps exponential growth.
    pub max_delay: Duration,
    /// Backoff multiplier, at least 1.0.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    ///
    /// Defaults:
    /// - 3 attempts
    /// - 100ms initial delay
    /// - 30s max delay
    /// - 2.0 multiplier
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Sets the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Fixed delay between attempts.
    #[must_use]
    pub fn fixed_delay(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Retries with no delay.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed_delay(Duration::ZERO, max_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay before retry number `attempt` (1 = first retry).
///
/// ```text
/// delay = min(initial_delay * multiplier^(attempt - 1), max_delay)
/// ```
#[must_use]
#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn calculate_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exponent = attempt.saturating_sub(1).min(64) as i32;
    let base = policy.initial_delay.as_nanos() as f64 * policy.multiplier.powi(exponent);
    let capped = base.min(policy.max_delay.as_nanos() as f64);
    Duration::from_nanos(capped as u64)
}

/// Cancellation and permanent failures end the retry loop.
fn worth_retrying(err: &Error) -> bool {
    if err.is_cancelled() {
        return false;
    }
    let class = err.cause().map_or(err.recoverability(), Error::recoverability);
    !matches!(class, Recoverability::Permanent)
}

impl Cx {
    /// Calls `callable`, retrying failures according to `policy`.
    ///
    /// Returns the first success, or the last error once attempts run out or
    /// the error is not worth retrying.
    pub async fn retry(
        &self,
        policy: &RetryPolicy,
        callable: Callable,
        args: Vec<Value>,
    ) -> Result<Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.call(callable.clone(), args.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= policy.max_attempts || !worth_retrying(&err) {
                return Err(err);
            }
            let delay = calculate_delay(policy, attempt);
            debug!(
                task = %self.id(),
                callable = callable.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying call"
            );
            if !delay.is_zero() {
                self.sleep(delay).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::CancelReason;

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(50));
        assert_eq!(calculate_delay(&policy, 0), Duration::ZERO);
        assert_eq!(calculate_delay(&policy, 1), Duration::from_millis(10));
        assert_eq!(calculate_delay(&policy, 2), Duration::from_millis(20));
        assert_eq!(calculate_delay(&policy, 3), Duration::from_millis(40));
        assert_eq!(calculate_delay(&policy, 4), Duration::from_millis(50));
        assert_eq!(calculate_delay(&policy, 40), Duration::from_millis(50));
    }

    #[test]
    fn fixed_and_immediate_policies() {
        let fixed = RetryPolicy::fixed_delay(Duration::from_millis(5), 0);
        assert_eq!(fixed.max_attempts, 1);
        assert_eq!(calculate_delay(&fixed, 3), Duration::from_millis(5));
        assert_eq!(calculate_delay(&RetryPolicy::immediate(2), 1), Duration::ZERO);
    }

    #[test]
    fn retry_classification() {
        assert!(worth_retrying(&Error::user("flaky")));
        assert!(worth_retrying(&Error::effect_resolution(
            "fetch",
            Error::new(ErrorKind::ChannelFull)
        )));
        assert!(!worth_retrying(&Error::effect_resolution(
            "fetch",
            Error::invalid_argument("bad input")
        )));
        assert!(!worth_retrying(&Error::cancelled(&CancelReason::race_lost())));
    }
}
