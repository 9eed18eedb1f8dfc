//! Re-capture until the page settles or attempts run out.

use crate::{Error, Result};
use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    attempts: NonZeroU32,
    wait: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            attempts: NonZeroU32::MIN,
            wait: Duration::from_millis(1000),
        }
    }
}

impl PollOptions {
    pub fn new(attempts: u32, wait_ms: u64) -> Result<Self> {
        let attempts = NonZeroU32::new(attempts)
            .ok_or_else(|| Error::Configuration("attempts must be at least 1".to_string()))?;
        if wait_ms == 0 {
            return Err(Error::Configuration("wait must be a positive number of milliseconds".to_string()));
        }
        Ok(Self {
            attempts,
            wait: Duration::from_millis(wait_ms),
        })
    }

    /// One attempt, no waiting.
    pub fn once() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.get()
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<T> {
    pub value: T,
    /// Attempts consumed, including the final one.
    pub attempts: u32,
}

/// Run `attempt` until `should_retry` is false for its value or the budget is
/// spent, sleeping `options.wait()` between attempts. An `Err` from `attempt`
/// ends polling immediately.
pub fn poll<T, F, R>(options: PollOptions, mut attempt: F, should_retry: R) -> Result<Polled<T>>
where
    F: FnMut(u32) -> Result<T>,
    R: Fn(&T) -> bool,
{
    let budget = options.attempts();
    let mut used = 0;
    loop {
        used += 1;
        let value = attempt(used)?;
        if used >= budget || !should_retry(&value) {
            return Ok(Polled { value, attempts: used });
        }
        debug!(attempt = used, budget, wait_ms = options.wait.as_millis() as u64, "diff detected, retrying");
        thread::sleep(options.wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_attempts_or_wait_is_rejected() {
        assert!(matches!(PollOptions::new(0, 10), Err(Error::Configuration(_))));
        assert!(matches!(PollOptions::new(1, 0), Err(Error::Configuration(_))));
        let defaults = PollOptions::default();
        assert_eq!(defaults.attempts(), 1);
        assert_eq!(defaults.wait(), Duration::from_millis(1000));
    }

    #[test]
    fn stops_at_first_settled_value() {
        let options = PollOptions::new(3, 10).unwrap();
        let script = ["diff", "diff", "same", "same"];
        let mut calls = 0;
        let polled = poll(
            options,
            |n| {
                calls += 1;
                Ok(script[(n - 1) as usize])
            },
            |v| *v == "diff",
        )
        .unwrap();
        assert_eq!(polled.value, "same");
        assert_eq!(polled.attempts, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausted_budget_returns_last_value() {
        let options = PollOptions::new(2, 1).unwrap();
        let polled = poll(options, |n| Ok(n), |_| true).unwrap();
        assert_eq!(polled, Polled { value: 2, attempts: 2 });
    }

    #[test]
    fn errors_are_not_retried() {
        let options = PollOptions::new(5, 1).unwrap();
        let mut calls = 0;
        let result: Result<Polled<()>> = poll(
            options,
            |_| {
                calls += 1;
                Err(Error::Capture("boom".to_string()))
            },
            |_| true,
        );
        assert!(matches!(result, Err(Error::Capture(_))));
        assert_eq!(calls, 1);
    }
}
