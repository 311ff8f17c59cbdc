use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::sync::Mutex;

/// The engine's only source of "now".
///
/// All times are business-local wall-clock times. Injecting the clock keeps
/// cut-off windows and age-of-majority boundaries deterministic under test.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Waits until `deadline`. Returns immediately if it has already passed.
    async fn sleep_until(&self, deadline: NaiveDateTime);
}

/// Reads the host's local time and sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    async fn sleep_until(&self, deadline: NaiveDateTime) {
        let remaining = deadline - self.now();
        if let Ok(duration) = remaining.to_std() {
            tracing::debug!(%deadline, wait_secs = duration.as_secs(), "Sleeping until deadline.");
            tokio::time::sleep(duration).await;
        }
    }
}

/// A clock that only moves when told to.
///
/// `sleep_until` jumps straight to the deadline (never backwards), so a
/// full business day of retries runs in microseconds.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, to: NaiveDateTime) {
        *self.lock() = to;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NaiveDateTime> {
        // The guarded value is a plain timestamp; a poisoned lock still holds a valid one.
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.lock()
    }

    async fn sleep_until(&self, deadline: NaiveDateTime) {
        let mut now = self.lock();
        if deadline > *now {
            *now = deadline;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn manual_clock_jumps_forward_to_deadlines() {
        let clock = ManualClock::new(at(9, 0));
        clock.sleep_until(at(13, 0)).await;
        assert_eq!(clock.now(), at(13, 0));
    }

    #[tokio::test]
    async fn manual_clock_never_moves_backwards() {
        let clock = ManualClock::new(at(14, 0));
        clock.sleep_until(at(13, 0)).await;
        assert_eq!(clock.now(), at(14, 0));
        assert_eq!(clock.today(), at(0, 0).date());
    }

    #[test]
    fn manual_clock_can_be_set_and_advanced() {
        let clock = ManualClock::new(at(9, 0));
        clock.advance(chrono::Duration::minutes(90));
        assert_eq!(clock.now(), at(10, 30));
        clock.set(at(8, 0));
        assert_eq!(clock.now(), at(8, 0));
    }
}
