use serde::{Deserialize, Serialize};

/// The local player's input intent, re-sent on every heartbeat.
///
/// `target_x`, `target_y` and `unit_move` are continuous: they describe a
/// held state and survive a send. The fire flags are one-shot: they describe
/// a press and are cleared once transmitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSnapshot {
    pub target_x: i32,
    pub target_y: i32,
    pub unit_move: bool,
    pub primary_fire: bool,
    pub secondary_fire: bool,
}

impl ControlSnapshot {
    /// Clears every action flag, keeping only the cursor target.
    ///
    /// Used when local UI owns the input (a menu is open) but the heartbeat
    /// must still go out.
    pub fn clear_flags(&mut self) {
        self.unit_move = false;
        self.primary_fire = false;
        self.secondary_fire = false;
    }

    /// Clears the one-shot flags after a send.
    pub fn clear_one_shots(&mut self) {
        self.primary_fire = false;
        self.secondary_fire = false;
    }

    pub fn has_actions(&self) -> bool {
        self.unit_move || self.primary_fire || self.secondary_fire
    }
}
