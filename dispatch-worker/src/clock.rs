//! Time source for the dispatch loop.
//!
//! Every wait in the loop and in delivery retries goes through a [`Clock`], so
//! tests can run hours of simulated pacing instantly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for `duration`. Dropping the future cancels the wait.
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated clock: `sleep` returns immediately and moves `now` forward.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    slept: Vec<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                now: start,
                slept: Vec::new(),
            })),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: chrono::Duration) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.now += by;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.slept.clone()
    }

    /// Sum of all requested sleeps.
    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.now
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.slept.push(duration);
        let step = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        state.now += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_now() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(5)).await;
        clock.sleep(Duration::from_secs(10)).await;

        assert_eq!(clock.now(), start + chrono::Duration::seconds(15));
        assert_eq!(clock.total_slept(), Duration::from_secs(15));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn test_manual_clock_advance_is_not_a_sleep() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(clock.now(), start + chrono::Duration::hours(2));
        assert!(clock.sleeps().is_empty());
    }
}
