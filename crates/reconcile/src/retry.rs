//! Retry logic with exponential backoff for transient backend errors.
//!
//! The engine itself never retries a task. Provider wrappers call
//! [`with_retry`] around individual API calls instead.

use crate::context::CancelToken;
use crate::types::RetryConfig;
use std::fmt::Display;
use std::thread;
use std::time::{Duration, Instant};

/// Granularity at which a backoff sleep notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Errors that know whether another attempt may succeed.
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::Error {
    fn is_retryable(&self) -> bool {
        crate::Error::is_retryable(self)
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called before sleeping ahead of the next attempt.
    ///
    /// `attempt` is 1-indexed.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &dyn Display, delay_secs: f64);
}

/// Callback that logs retries at warn level.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &dyn Display, delay_secs: f64) {
        log::warn!("attempt {attempt}/{max_attempts} failed: {error}; retrying in {delay_secs:.1}s");
    }
}

/// Execute an operation with retry logic.
///
/// Retries only errors that report themselves retryable, sleeping with
/// exponential backoff between attempts. Returns the last error once
/// `config.max_attempts` is exhausted.
pub fn with_retry<T, E, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    operation: F,
) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Result<T, E>,
{
    with_retry_cancellable(config, callback, &CancelToken::new(), operation)
}

/// Like [`with_retry`], but gives up as soon as `cancel` fires.
///
/// A cancelled backoff returns the error of the last attempt without
/// trying again.
pub fn with_retry_cancellable<T, E, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    cancel: &CancelToken,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt + 1 >= config.max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, config.max_attempts, &e, delay.as_secs_f64());
                }
                if !sleep_unless_cancelled(delay, cancel) {
                    log::debug!("retry abandoned after attempt {}: cancelled", attempt + 1);
                    return Err(e);
                }
                attempt += 1;
            }
        }
    }
}

/// Sleep for `delay` in short slices. Returns false if cancelled first.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::cell::Cell;
    use std::time::Duration;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    fn transient() -> Error {
        Error::Backend {
            message: "503 Service Unavailable".into(),
            retryable: true,
        }
    }

    #[test]
    fn test_success_first_try() {
        let result = with_retry(&RetryConfig::no_retry(), None, || Ok::<_, Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_non_retryable_error() {
        let attempts = Cell::new(0);
        let result: Result<(), Error> = with_retry(&fast(), None, || {
            attempts.set(attempts.get() + 1);
            Err(Error::RequiredField("Name"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_eventual_success() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast(), None, || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 2 { Err(transient()) } else { Ok(42) }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct Counting(Cell<u32>);
        impl RetryCallback for Counting {
            fn on_retry(&self, _: u32, _: u32, _: &dyn Display, _: f64) {
                self.0.set(self.0.get() + 1);
            }
        }

        let callback = Counting(Cell::new(0));
        let result: Result<(), Error> = with_retry(&fast(), Some(&callback), || Err(transient()));
        assert!(result.is_err());
        assert_eq!(callback.0.get(), 2);
    }

    #[test]
    fn test_cancelled_backoff_stops_retrying() {
        let slow = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        };
        let cancel = CancelToken::new();
        let attempts = Cell::new(0);
        let started = Instant::now();

        let result: Result<(), Error> = with_retry_cancellable(&slow, None, &cancel, || {
            attempts.set(attempts.get() + 1);
            cancel.cancel();
            Err(transient())
        });

        assert!(matches!(result, Err(Error::Backend { .. })));
        assert_eq!(attempts.get(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_uncancelled_backoff_completes() {
        let cancel = CancelToken::new();
        let attempts = Cell::new(0);
        let result = with_retry_cancellable(&fast(), None, &cancel, || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 1 { Err(transient()) } else { Ok("up") }
        });
        assert_eq!(result.unwrap(), "up");
        assert_eq!(attempts.get(), 2);
    }
}
