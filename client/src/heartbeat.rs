//! Client input heartbeat
//!
//! The client does not send input when it changes; it sends its whole control
//! snapshot on a fixed cadence, whether or not anything changed. That keeps
//! the server's liveness check fed and makes a lost datagram harmless, since
//! the next heartbeat carries the same intent.

use shared::{Cadence, ControlSnapshot};
use std::time::{Duration, Instant};

pub struct HeartbeatAggregator {
    cadence: Cadence,
    snapshot: ControlSnapshot,
}

impl HeartbeatAggregator {
    /// The first heartbeat is due immediately.
    pub fn new(period: Duration, start: Instant) -> Self {
        Self {
            cadence: Cadence::starting_now(period, start),
            snapshot: ControlSnapshot::default(),
        }
    }

    /// Folds the latest input into the pending snapshot.
    ///
    /// Continuous fields take the latest value. Fire flags stay set until the
    /// next heartbeat goes out, so a press shorter than the heartbeat period
    /// still reaches the server.
    pub fn update(&mut self, latest: ControlSnapshot) {
        let primary_fire = self.snapshot.primary_fire || latest.primary_fire;
        let secondary_fire = self.snapshot.secondary_fire || latest.secondary_fire;

        self.snapshot = ControlSnapshot {
            primary_fire,
            secondary_fire,
            ..latest
        };
    }

    /// Returns the snapshot to send if a heartbeat is due.
    ///
    /// While `input_suppressed` the heartbeat still goes out, but with every
    /// action flag cleared.
    pub fn poll(&mut self, now: Instant, input_suppressed: bool) -> Option<ControlSnapshot> {
        if !self.cadence.poll(now) {
            return None;
        }

        let mut outgoing = self.snapshot;
        if input_suppressed {
            outgoing.clear_flags();
        }
        self.snapshot.clear_one_shots();

        Some(outgoing)
    }

    pub fn pending(&self) -> &ControlSnapshot {
        &self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const PERIOD: Duration = Duration::from_millis(100);

    fn fire() -> ControlSnapshot {
        ControlSnapshot {
            target_x: 5,
            target_y: 6,
            unit_move: true,
            primary_fire: true,
            secondary_fire: false,
        }
    }

    #[test]
    fn test_first_heartbeat_is_immediate() {
        let start = Instant::now();
        let mut heartbeat = HeartbeatAggregator::new(PERIOD, start);

        assert!(heartbeat.poll(start, false).is_some());
        assert!(heartbeat.poll(start + Duration::from_millis(50), false).is_none());
        assert!(heartbeat.poll(start + PERIOD, false).is_some());
    }

    #[test]
    fn test_one_shots_latch_until_sent() {
        let start = Instant::now();
        let mut heartbeat = HeartbeatAggregator::new(PERIOD, start);
        heartbeat.poll(start, false);

        heartbeat.update(fire());
        heartbeat.update(ControlSnapshot {
            target_x: 9,
            ..ControlSnapshot::default()
        });
        assert!(heartbeat.pending().primary_fire);
        assert_eq!(heartbeat.pending().target_x, 9);
        assert!(!heartbeat.pending().unit_move);

        let sent = heartbeat.poll(start + PERIOD, false).unwrap();
        assert!(sent.primary_fire);
        assert!(!heartbeat.pending().primary_fire);

        let sent = heartbeat.poll(start + PERIOD * 2, false).unwrap();
        assert!(!sent.primary_fire);
        assert_eq!(sent.target_x, 9);
    }

    #[test]
    fn test_suppressed_input_clears_actions() {
        let start = Instant::now();
        let mut heartbeat = HeartbeatAggregator::new(PERIOD, start);

        heartbeat.update(fire());
        let sent = heartbeat.poll(start, true).unwrap();

        assert!(!sent.has_actions());
        assert_eq!((sent.target_x, sent.target_y), (5, 6));
        // The press is consumed, not deferred to the next heartbeat
        assert!(!heartbeat.pending().primary_fire);
        assert!(heartbeat.pending().unit_move);
    }

    #[test]
    fn test_liveness_over_long_run() {
        let start = Instant::now();
        let mut heartbeat = HeartbeatAggregator::new(PERIOD, start);

        let duration = Duration::from_secs(10);
        let mut sent = 0u64;
        let mut now = start;
        while now <= start + duration {
            if heartbeat.poll(now, now.duration_since(start).as_secs() % 2 == 0).is_some() {
                sent += 1;
            }
            now += Duration::from_millis(7);
        }

        let expected = duration.as_secs_f64() / PERIOD.as_secs_f64();
        assert_approx_eq!(sent as f64, expected, 1.5);
    }
}
