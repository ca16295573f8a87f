use std::time::{Duration, Instant};

/// A fixed-period deadline that fires at most once per poll.
///
/// When the caller is late by less than a period the next deadline stays on
/// the starting grid, so drift does not accumulate. When it is late by more
/// than a whole period the grid is re-anchored at `now + period` instead of
/// firing repeatedly to catch up.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    next_deadline: Instant,
}

impl Cadence {
    /// First deadline is one period after `start`.
    pub fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next_deadline: start + period,
        }
    }

    /// Fires immediately on the first poll at or after `start`.
    pub fn starting_now(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next_deadline: start,
        }
    }

    /// Returns true if the deadline has passed, and moves it forward.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_deadline {
            return false;
        }

        self.next_deadline += self.period;
        if now >= self.next_deadline {
            self.next_deadline = now + self.period;
        }
        true
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
