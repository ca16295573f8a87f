//! Boundaries between the lockstep core and the game it synchronizes.
//!
//! The core never looks inside a payload or a snapshot. It only decides
//! *when* each of these calls happens and in which order.

use crate::controls::ControlSnapshot;
use crate::error::WorldError;

/// A replica of the simulation that replays the server's tick stream.
pub trait LockstepWorld {
    /// Applies the payload of tick `tick_index`. Called exactly once per
    /// tick, in strict id order, on the first sub-step of that tick.
    fn apply_tick(&mut self, payload: &[u8], tick_index: u64) -> Result<(), WorldError>;

    /// Performs sub-step `slice` (of `slices_per_tick`) of the current tick.
    fn advance_slice(&mut self, slice: u32, slices_per_tick: u32);

    /// Bytes that must be identical on every peer after the same tick.
    fn sync_state(&self) -> Vec<u8>;

    /// Replaces the whole replica with a server snapshot.
    fn restore(&mut self, snapshot: &[u8]) -> Result<(), WorldError>;
}

/// The server's authoritative simulation.
pub trait TickSource {
    /// Advances the authoritative world by one tick and returns the payload
    /// replicas need to reproduce it.
    fn advance_one_tick(&mut self, tick_index: u64) -> Result<Vec<u8>, WorldError>;

    /// Same contract as [`LockstepWorld::sync_state`], taken right after
    /// [`TickSource::advance_one_tick`].
    fn sync_state(&self) -> Vec<u8>;

    /// Full state as of the last advanced tick, for late joiners.
    fn snapshot(&mut self) -> Result<Vec<u8>, WorldError>;

    fn join(&mut self, team_id: u32);

    fn leave(&mut self, team_id: u32);

    /// Latest input for a team; replaces anything submitted before.
    fn submit_controls(&mut self, team_id: u32, controls: ControlSnapshot);
}

/// Where the heartbeat reads the player's intent from.
pub trait ControlSource {
    fn current_control_snapshot(&mut self) -> ControlSnapshot;

    /// True while local UI (a menu, an overlay) owns the input.
    fn input_suppressed(&self) -> bool {
        false
    }
}
