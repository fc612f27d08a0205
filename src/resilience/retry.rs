//! Bounded retry for transient storage failures.
//!
//! # Design Decisions
//! - The caller supplies an explicit classification predicate; only errors
//!   it deems transient are retried
//! - Fixed short delay between attempts; logical conflicts must be handled
//!   by the operation itself and never reach this helper as transient

use std::thread;
use std::time::Duration;

/// Retry policy: attempt bound plus a fixed inter-attempt delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Run `op` up to `policy.attempts` times, sleeping `policy.delay` between
/// attempts, retrying only when `is_transient` approves the error. The last
/// error is returned once the bound is exhausted.
pub fn retry_transient<T, E, F, P>(
    policy: RetryPolicy,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            // The last attempt returns its error as-is, transient or not.
            Err(err) if is_transient(&err) && attempt < attempts => {
                tracing::debug!(attempt, "transient store failure, retrying");
                attempt += 1;
                thread::sleep(policy.delay);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum Fault {
        Transient,
        Terminal,
    }

    fn quick() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(0))
    }

    #[test]
    fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(quick(), |e| *e == Fault::Transient, || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Fault::Transient)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(quick(), |e| *e == Fault::Transient, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Fault::Terminal)
        });
        assert_eq!(result, Err(Fault::Terminal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exhaustion_stops_at_the_bound_with_the_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(quick(), |e| *e == Fault::Transient, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Fault::Transient)
        });
        assert_eq!(result, Err(Fault::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
