//! Clocks and Quota Windows

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;

/// Default free-tier window (7 days)
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Source of the current time
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Span over which consumed credits are counted before they expire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaWindow {
    length: TimeDelta,
}

impl QuotaWindow {
    /// Create a window; the length must be a positive duration
    pub fn new(length: Duration) -> Option<Self> {
        let length = TimeDelta::from_std(length).ok()?;
        if length <= TimeDelta::zero() {
            return None;
        }
        Some(Self { length })
    }

    pub fn length(&self) -> TimeDelta {
        self.length
    }

    /// Earliest instant whose events still count at `now`
    pub fn start_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.length
    }

    /// Instant at which a window opened at `start` resets
    pub fn reset_after(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + self.length
    }

    /// Whether a window opened at `start` is still open at `now`
    pub fn is_open(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now < self.reset_after(start)
    }
}

impl Default for QuotaWindow {
    fn default() -> Self {
        Self {
            length: TimeDelta::days(7),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_rejects_zero() {
        assert!(QuotaWindow::new(Duration::ZERO).is_none());
        assert!(QuotaWindow::new(Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_default_window_is_seven_days() {
        assert_eq!(QuotaWindow::default().length(), TimeDelta::days(7));
        assert_eq!(
            QuotaWindow::new(DEFAULT_WINDOW).unwrap(),
            QuotaWindow::default()
        );
    }

    #[test]
    fn test_window_arithmetic() {
        let window = QuotaWindow::default();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(window.reset_after(t0), t0 + TimeDelta::days(7));
        assert_eq!(window.start_before(t0 + TimeDelta::days(7)), t0);
        assert!(window.is_open(t0, t0 + TimeDelta::days(6)));
        assert!(!window.is_open(t0, t0 + TimeDelta::days(7)));
    }

    #[test]
    fn test_manual_clock() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(t0);
        clock.advance(TimeDelta::hours(2));
        assert_eq!(clock.now(), t0 + TimeDelta::hours(2));
        clock.set(t0);
        assert_eq!(clock.now(), t0);
    }
}
