//! Fixed-period rate limiter for throttled scans.

use std::time::Duration;

/// Elapses once per `period`, measured on the caller's clock.
///
/// Behaves like a ticker with a one-slot buffer: ticks fall on
/// `armed_at + k * period`, missed ticks are coalesced into one, and the
/// next tick after a consumed one is the first grid point past `now`.
#[derive(Debug, Clone)]
pub struct Throttle {
    period: Duration,
    next_due: Option<Duration>,
}

impl Throttle {
    /// Creates a disarmed throttle.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
        }
    }

    /// Starts ticking; the first tick is due one period after `now`.
    pub fn arm(&mut self, now: Duration) {
        self.next_due = Some(now + self.period);
    }

    pub fn disarm(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Consumes a tick if one is due. A disarmed throttle never elapses.
    pub fn ready(&mut self, now: Duration) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }

        let period_ns = self.period.as_nanos();
        if period_ns > 0 {
            let behind = (now - due).as_nanos() / period_ns;
            let step = (behind + 1) * period_ns;
            self.next_due = Some(due + Duration::from_nanos(step as u64));
        }
        true
    }
}
