//! Deadline-bounded execution of blocking work.
//!
//! Landmark backends and asset stores are blocking calls supplied by the
//! host. [`run_with_timeout`] races such a call against a timer: the work
//! runs on a helper thread and the caller waits on a channel with
//! `recv_timeout`. When the timer wins, the caller moves on and whatever
//! the helper eventually produces is dropped with the channel.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Why deadline-bounded work produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    /// The work did not finish before the deadline.
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),

    /// The helper thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    /// The work panicked before sending its result.
    #[error("worker thread panicked")]
    Panicked,
}

/// Run `work` on a helper thread and wait at most `timeout` for it.
///
/// # Errors
///
/// Returns [`TimeoutError::Elapsed`] when the deadline passes first,
/// [`TimeoutError::Panicked`] when `work` unwinds, and
/// [`TimeoutError::Spawn`] when no thread could be created.
pub fn run_with_timeout<T, F>(timeout: Duration, work: F) -> Result<T, TimeoutError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("lashview-deadline".to_string())
        .spawn(move || {
            // The receiver is gone once the deadline has passed.
            let _ = tx.send(work());
        })
        .map_err(|e| TimeoutError::Spawn(e.to_string()))?;

    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(TimeoutError::Elapsed(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(TimeoutError::Panicked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_work_returns_value() {
        let result = run_with_timeout(Duration::from_secs(5), || 40 + 2);
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn slow_work_times_out() {
        let result = run_with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            1
        });
        assert_eq!(result, Err(TimeoutError::Elapsed(Duration::from_millis(20))));
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_work_is_reported() {
        let result: Result<u8, _> = run_with_timeout(Duration::from_secs(5), || {
            panic!("backend exploded");
        });
        assert_eq!(result, Err(TimeoutError::Panicked));
    }

    #[test]
    fn elapsed_display_names_duration() {
        let err = TimeoutError::Elapsed(Duration::from_millis(250));
        assert_eq!(err.to_string(), "operation timed out after 250ms");
    }
}
