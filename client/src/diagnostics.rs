//! Client-side latency and desync bookkeeping

use log::{info, warn};
use shared::DesyncNotice;

/// What the client knows about how far behind the server it is.
///
/// The server's current id is never sent on its own. The client estimates it
/// as the highest id it has evidence for: ticks received but not yet applied,
/// and the ids carried by control letters.
#[derive(Debug, Clone)]
pub struct ClientDiagnostics {
    last_applied: u64,
    server_estimate: u64,
    last_desync_tick: Option<u64>,
    desync_reports: u32,
    lag_warning_ticks: i64,
    lagging: bool,
}

impl ClientDiagnostics {
    pub fn new(lag_warning_ticks: i64) -> Self {
        Self {
            last_applied: 0,
            server_estimate: 0,
            last_desync_tick: None,
            desync_reports: 0,
            lag_warning_ticks,
            lagging: false,
        }
    }

    /// Starts a new session at `baseline`, keeping the desync history.
    pub fn reset(&mut self, baseline: u64) {
        self.last_applied = baseline;
        self.server_estimate = baseline;
        self.lagging = false;
    }

    /// Records a server id seen on a control letter.
    pub fn observe_server_id(&mut self, sequence_id: u64) {
        self.server_estimate = self.server_estimate.max(sequence_id);
    }

    /// Updates the estimate after a frame; `backlog` counts ticks received
    /// but not yet applied.
    pub fn observe_frame(&mut self, last_applied: u64, backlog: usize) {
        self.last_applied = last_applied;
        self.observe_server_id(last_applied + backlog as u64);

        let latency = self.current_latency_ticks();
        if latency > self.lag_warning_ticks && !self.lagging {
            warn!("Lagging {} ticks behind the server", latency);
            self.lagging = true;
        } else if latency <= self.lag_warning_ticks && self.lagging {
            info!("Caught up with the server");
            self.lagging = false;
        }
    }

    pub fn record_desync(&mut self, sequence_id: u64, notice: &DesyncNotice) {
        warn!(
            "Desync at tick {}: server {} vs ours {}",
            sequence_id, notice.server_checksum, notice.client_checksum
        );
        self.desync_reports += 1;
        self.last_desync_tick = Some(
            self.last_desync_tick
                .map_or(sequence_id, |tick| tick.max(sequence_id)),
        );
    }

    /// Ticks between the estimated server id and the last applied one.
    pub fn current_latency_ticks(&self) -> i64 {
        self.server_estimate as i64 - self.last_applied as i64
    }

    pub fn last_desync_tick(&self) -> Option<u64> {
        self.last_desync_tick
    }

    pub fn desync_reports(&self) -> u32 {
        self.desync_reports
    }

    pub fn is_lagging(&self) -> bool {
        self.lagging
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::SyncChecksum;

    #[test]
    fn test_latency_from_backlog() {
        let mut diagnostics = ClientDiagnostics::new(10);
        diagnostics.reset(40);

        diagnostics.observe_frame(42, 3);
        assert_eq!(diagnostics.current_latency_ticks(), 3);

        // The estimate never moves backwards
        diagnostics.observe_frame(44, 0);
        assert_eq!(diagnostics.current_latency_ticks(), 1);
    }

    #[test]
    fn test_control_letters_raise_estimate() {
        let mut diagnostics = ClientDiagnostics::new(10);
        diagnostics.reset(0);
        diagnostics.observe_server_id(7);
        diagnostics.observe_frame(2, 0);
        assert_eq!(diagnostics.current_latency_ticks(), 5);
    }

    #[test]
    fn test_lag_flag_toggles() {
        let mut diagnostics = ClientDiagnostics::new(10);
        diagnostics.reset(0);

        diagnostics.observe_frame(0, 11);
        assert!(diagnostics.is_lagging());

        diagnostics.observe_frame(5, 0);
        assert!(!diagnostics.is_lagging());
    }

    #[test]
    fn test_desync_keeps_latest_tick() {
        let mut diagnostics = ClientDiagnostics::new(10);
        let notice = DesyncNotice {
            server_checksum: SyncChecksum::new(0x7F),
            client_checksum: SyncChecksum::new(0x80),
        };

        diagnostics.record_desync(41, &notice);
        diagnostics.record_desync(39, &notice);
        assert_eq!(diagnostics.last_desync_tick(), Some(41));
        assert_eq!(diagnostics.desync_reports(), 2);

        diagnostics.reset(100);
        assert_eq!(diagnostics.last_desync_tick(), Some(41));
    }
}
