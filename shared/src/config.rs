//! Timing and capacity constants shared by server and client.
//!
//! These are fixed for a session and never negotiated over the wire; both
//! peers must be started with the same `tick_period` and
//! `sub_steps_per_tick`. The binaries expose every field as a command line
//! flag.

use crate::error::ConfigError;
use std::time::Duration;

/// Server tick duration.
pub const TICK_PERIOD: Duration = Duration::from_millis(100);
/// Client sub-steps per tick.
pub const SUB_STEPS_PER_TICK: u32 = 10;
/// Upper bound on sub-steps performed in a single rendered frame.
pub const MAX_SLICES_PER_FRAME: u32 = 10;
/// Cadence of the client's input heartbeat.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(100);
/// Number of server checksums kept for desync comparison.
pub const HISTORY_WINDOW: usize = 256;
/// Number of early letters a client may hold while waiting for a late one.
pub const REORDER_WINDOW: usize = 8;
/// Silence after which the server drops a peer.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(5);
/// Latency (in ticks) above which the client warns about lag.
pub const LAG_WARNING_TICKS: i64 = 10;

/// Protocol version sent in the client hello.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockstepConfig {
    pub tick_period: Duration,
    pub sub_steps_per_tick: u32,
    pub max_slices_per_frame: u32,
    pub heartbeat_period: Duration,
    pub history_window: usize,
    pub reorder_window: usize,
    pub peer_timeout: Duration,
    pub lag_warning_ticks: i64,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            tick_period: TICK_PERIOD,
            sub_steps_per_tick: SUB_STEPS_PER_TICK,
            max_slices_per_frame: MAX_SLICES_PER_FRAME,
            heartbeat_period: HEARTBEAT_PERIOD,
            history_window: HISTORY_WINDOW,
            reorder_window: REORDER_WINDOW,
            peer_timeout: PEER_TIMEOUT,
            lag_warning_ticks: LAG_WARNING_TICKS,
        }
    }
}

impl LockstepConfig {
    /// Rejects values that would stall or divide by zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::Zero("tick_period"));
        }
        if self.sub_steps_per_tick == 0 {
            return Err(ConfigError::Zero("sub_steps_per_tick"));
        }
        if self.max_slices_per_frame == 0 {
            return Err(ConfigError::Zero("max_slices_per_frame"));
        }
        if self.heartbeat_period.is_zero() {
            return Err(ConfigError::Zero("heartbeat_period"));
        }
        if self.history_window == 0 {
            return Err(ConfigError::Zero("history_window"));
        }
        if self.reorder_window == 0 {
            return Err(ConfigError::Zero("reorder_window"));
        }
        Ok(())
    }

    /// Ticks per second.
    pub fn tick_rate(&self) -> f64 {
        1.0 / self.tick_period.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = LockstepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sub_steps_per_tick, 10);
        assert_eq!(config.max_slices_per_frame, 10);
        assert_approx_eq!(config.tick_rate(), 10.0, 1e-9);
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = LockstepConfig {
            tick_period: Duration::ZERO,
            ..LockstepConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("tick_period")));

        let config = LockstepConfig {
            sub_steps_per_tick: 0,
            ..LockstepConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero("sub_steps_per_tick"))
        );

        let config = LockstepConfig {
            reorder_window: 0,
            ..LockstepConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("reorder_window")));
    }
}
