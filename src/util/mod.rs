//! Utility module
//!
//! Wait primitives shared by the polling state machines, and duration and
//! wall-clock helpers.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Result, TimestampWord};

/// Converts a duration to whole milliseconds, saturating
pub fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Timestamp-counter value for the current wall-clock time
pub fn wall_clock_timestamp(clock_hz: u64) -> Result<TimestampWord> {
    TimestampWord::from_datetime(Utc::now(), clock_hz)
}

/// Sleeps for `duration` unless `cancel` fires first
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Result of a bounded polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Whether the condition was observed before the timeout
    pub satisfied: bool,
    /// Number of times the condition was checked
    pub attempts: u32,
}

/// Checks `condition` every `interval` until it holds or `timeout` has elapsed.
///
/// Each attempt sleeps first and then checks, so the first check happens one
/// interval after the call. Errors from `condition` end the loop unchanged.
pub async fn poll_until<F>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut condition: F,
) -> Result<PollOutcome>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    let mut attempts = 0;

    loop {
        sleep_or_cancel(interval, cancel).await?;
        attempts += 1;

        if condition()? {
            return Ok(PollOutcome { satisfied: true, attempts });
        }
        if start.elapsed() >= timeout {
            return Ok(PollOutcome { satisfied: false, attempts });
        }
    }
}
