// src/hardware/poll.rs - Bounded retry-with-delay
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Result of [`poll_until`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Recovered(T),
    TimedOut,
}

/// Sleeps `interval`, then runs `probe`, until the probe yields a value or
/// `limit` has elapsed. Without a limit it keeps polling forever. Probe errors
/// end the poll immediately.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    limit: Option<Duration>,
    mut probe: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    loop {
        tokio::time::sleep(interval).await;
        if let Some(value) = probe().await? {
            return Ok(PollOutcome::Recovered(value));
        }
        if let Some(limit) = limit {
            if started.elapsed() >= limit {
                return Ok(PollOutcome::TimedOut);
            }
        }
    }
}
