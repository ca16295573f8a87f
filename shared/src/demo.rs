//! A tiny deterministic arena used as the game-logic collaborator by the
//! bundled binaries and the tests.
//!
//! Everything is integer arithmetic over ordered maps, so two replicas fed
//! the same tick stream stay bit-identical. Each unit moves on exactly one
//! sub-step per tick, which gives the client's sliced stepping real work to
//! spread across frames.

use crate::controls::ControlSnapshot;
use crate::error::WorldError;
use crate::world::{LockstepWorld, TickSource};
use bincode::{deserialize, serialize};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ARENA_SIZE: i32 = 1024;
pub const UNIT_SPEED: i32 = 6;
const HIT_CHANCE_PERCENT: u32 = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub x: i32,
    pub y: i32,
    pub target_x: i32,
    pub target_y: i32,
    pub moving: bool,
    pub shots: u32,
    pub hits: u32,
}

impl Unit {
    fn spawn(team_id: u32) -> Self {
        let x = (team_id as i32 * 211) % ARENA_SIZE;
        let y = (team_id as i32 * 97) % ARENA_SIZE;
        Self {
            x,
            y,
            target_x: x,
            target_y: y,
            moving: false,
            shots: 0,
            hits: 0,
        }
    }

    fn step(&mut self) {
        if !self.moving {
            return;
        }
        self.x += (self.target_x - self.x).clamp(-UNIT_SPEED, UNIT_SPEED);
        self.y += (self.target_y - self.y).clamp(-UNIT_SPEED, UNIT_SPEED);
        if self.x == self.target_x && self.y == self.target_y {
            self.moving = false;
        }
    }
}

/// Everything that happened on the server during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickCommands {
    pub joins: Vec<u32>,
    pub leaves: Vec<u32>,
    pub controls: Vec<(u32, ControlSnapshot)>,
}

impl TickCommands {
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.leaves.is_empty() && self.controls.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoWorld {
    seed: u64,
    tick: u64,
    sync_draw: u32,
    units: BTreeMap<u32, Unit>,
}

impl DemoWorld {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn unit(&self, team_id: u32) -> Option<&Unit> {
        self.units.get(&team_id)
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn snapshot(&self) -> Result<Vec<u8>, WorldError> {
        serialize(self).map_err(|e| WorldError {
            tick: self.tick,
            reason: format!("snapshot failed: {}", e),
        })
    }

    /// Mutable access for tests that need to fake a diverged replica.
    pub fn unit_mut(&mut self, team_id: u32) -> Option<&mut Unit> {
        self.units.get_mut(&team_id)
    }

    fn apply_commands(&mut self, commands: TickCommands, tick_index: u64) {
        for team_id in commands.joins {
            self.units.entry(team_id).or_insert_with(|| Unit::spawn(team_id));
        }
        for team_id in commands.leaves {
            self.units.remove(&team_id);
        }

        // The shared draw for this tick: identical on every peer that has
        // applied the same commands to the same state.
        let mut rng = StdRng::seed_from_u64(self.seed ^ tick_index.wrapping_mul(0x9E37_79B9_7F4A_7C15));

        for (team_id, controls) in commands.controls {
            let Some(unit) = self.units.get_mut(&team_id) else {
                continue;
            };

            unit.target_x = controls.target_x.clamp(0, ARENA_SIZE);
            unit.target_y = controls.target_y.clamp(0, ARENA_SIZE);
            unit.moving = controls.unit_move;

            if controls.primary_fire {
                unit.shots += 1;
                if rng.gen_range(0..100) < HIT_CHANCE_PERCENT {
                    unit.hits += 1;
                }
            }
        }

        self.sync_draw = rng.gen();
        self.tick = tick_index;
    }
}

impl LockstepWorld for DemoWorld {
    fn apply_tick(&mut self, payload: &[u8], tick_index: u64) -> Result<(), WorldError> {
        if tick_index != self.tick + 1 {
            return Err(WorldError {
                tick: tick_index,
                reason: format!("world is at tick {}", self.tick),
            });
        }

        let commands: TickCommands = deserialize(payload).map_err(|e| WorldError {
            tick: tick_index,
            reason: e.to_string(),
        })?;
        self.apply_commands(commands, tick_index);
        Ok(())
    }

    fn advance_slice(&mut self, slice: u32, slices_per_tick: u32) {
        let slices = slices_per_tick.max(1) as usize;
        for (index, unit) in self.units.values_mut().enumerate() {
            if index % slices == slice as usize {
                unit.step();
            }
        }
    }

    fn sync_state(&self) -> Vec<u8> {
        let mut state = Vec::with_capacity(12 + self.units.len() * 28);
        state.extend_from_slice(&self.tick.to_le_bytes());
        state.extend_from_slice(&self.sync_draw.to_le_bytes());
        for (team_id, unit) in &self.units {
            state.extend_from_slice(&team_id.to_le_bytes());
            state.extend_from_slice(&unit.x.to_le_bytes());
            state.extend_from_slice(&unit.y.to_le_bytes());
            state.extend_from_slice(&unit.target_x.to_le_bytes());
            state.extend_from_slice(&unit.target_y.to_le_bytes());
            state.extend_from_slice(&unit.shots.to_le_bytes());
            state.extend_from_slice(&unit.hits.to_le_bytes());
        }
        state
    }

    fn restore(&mut self, snapshot: &[u8]) -> Result<(), WorldError> {
        *self = deserialize(snapshot).map_err(|e| WorldError {
            tick: self.tick,
            reason: format!("bad snapshot: {}", e),
        })?;
        Ok(())
    }
}

/// Server side of the arena: collects commands between ticks and replays
/// them into its own [`DemoWorld`].
#[derive(Debug)]
pub struct DemoAuthority {
    world: DemoWorld,
    pending: TickCommands,
    slices_per_tick: u32,
    slices_outstanding: bool,
}

impl DemoAuthority {
    pub fn new(seed: u64, slices_per_tick: u32) -> Self {
        Self {
            world: DemoWorld::new(seed),
            pending: TickCommands::default(),
            slices_per_tick,
            slices_outstanding: false,
        }
    }

    pub fn world(&self) -> &DemoWorld {
        &self.world
    }

    // The server runs a tick's sub-steps lazily, right before the next tick
    // is applied, so that `sync_state` after `advance_one_tick` observes the
    // same point in the tick as a client that has just applied it.
    fn finish_outstanding_slices(&mut self) {
        if self.slices_outstanding {
            for slice in 0..self.slices_per_tick {
                self.world.advance_slice(slice, self.slices_per_tick);
            }
            self.slices_outstanding = false;
        }
    }
}

impl TickSource for DemoAuthority {
    fn advance_one_tick(&mut self, tick_index: u64) -> Result<Vec<u8>, WorldError> {
        self.finish_outstanding_slices();

        let commands = std::mem::take(&mut self.pending);
        let payload = serialize(&commands).map_err(|e| WorldError {
            tick: tick_index,
            reason: e.to_string(),
        })?;
        self.world.apply_tick(&payload, tick_index)?;
        self.slices_outstanding = true;
        Ok(payload)
    }

    fn sync_state(&self) -> Vec<u8> {
        self.world.sync_state()
    }

    fn snapshot(&mut self) -> Result<Vec<u8>, WorldError> {
        self.finish_outstanding_slices();
        self.world.snapshot()
    }

    fn join(&mut self, team_id: u32) {
        self.pending.leaves.retain(|id| *id != team_id);
        self.pending.joins.push(team_id);
    }

    fn leave(&mut self, team_id: u32) {
        self.pending.joins.retain(|id| *id != team_id);
        self.pending.controls.retain(|(id, _)| *id != team_id);
        self.pending.leaves.push(team_id);
    }

    fn submit_controls(&mut self, team_id: u32, controls: ControlSnapshot) {
        match self.pending.controls.iter_mut().find(|(id, _)| *id == team_id) {
            Some((_, existing)) => *existing = controls,
            None => self.pending.controls.push((team_id, controls)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::SyncChecksum;

    const SLICES: u32 = 4;

    fn walk_to(x: i32, y: i32) -> ControlSnapshot {
        ControlSnapshot {
            target_x: x,
            target_y: y,
            unit_move: true,
            primary_fire: true,
            secondary_fire: false,
        }
    }

    fn replay(replica: &mut DemoWorld, payload: &[u8], tick: u64) -> SyncChecksum {
        replica.apply_tick(payload, tick).unwrap();
        let checksum = SyncChecksum::of_state(&replica.sync_state());
        for slice in 0..SLICES {
            replica.advance_slice(slice, SLICES);
        }
        checksum
    }

    #[test]
    fn test_replica_tracks_authority() {
        let mut authority = DemoAuthority::new(7, SLICES);
        let mut replica = DemoWorld::default();
        replica.restore(&authority.snapshot().unwrap()).unwrap();

        authority.join(1);
        authority.join(2);

        for tick in 1..=50u64 {
            if tick % 5 == 0 {
                authority.submit_controls(1, walk_to(tick as i32 * 3, 500));
                authority.submit_controls(2, walk_to(900, tick as i32));
            }

            let payload = authority.advance_one_tick(tick).unwrap();
            let server = SyncChecksum::of_state(&authority.sync_state());
            let client = replay(&mut replica, &payload, tick);
            assert_eq!(server, client, "diverged at tick {}", tick);
        }

        assert_eq!(replica.unit_count(), 2);
        assert_eq!(replica.tick(), 50);
        assert!(replica.unit(1).unwrap().shots > 0);
    }

    #[test]
    fn test_late_join_from_snapshot() {
        let mut authority = DemoAuthority::new(11, SLICES);
        authority.join(1);
        for tick in 1..=20u64 {
            authority.submit_controls(1, walk_to(300, 300));
            authority.advance_one_tick(tick).unwrap();
        }

        let mut replica = DemoWorld::default();
        replica.restore(&authority.snapshot().unwrap()).unwrap();
        assert_eq!(replica.tick(), 20);

        authority.join(2);
        for tick in 21..=30u64 {
            let payload = authority.advance_one_tick(tick).unwrap();
            let server = SyncChecksum::of_state(&authority.sync_state());
            assert_eq!(server, replay(&mut replica, &payload, tick));
        }
        assert_eq!(replica.unit_count(), 2);
    }

    #[test]
    fn test_perturbed_replica_diverges() {
        let mut authority = DemoAuthority::new(3, SLICES);
        let mut replica = DemoWorld::default();
        replica.restore(&authority.snapshot().unwrap()).unwrap();
        authority.join(1);

        let payload = authority.advance_one_tick(1).unwrap();
        replay(&mut replica, &payload, 1);
        replica.unit_mut(1).unwrap().x ^= 1;

        let payload = authority.advance_one_tick(2).unwrap();
        replica.apply_tick(&payload, 2).unwrap();

        assert_ne!(authority.sync_state(), replica.sync_state());
    }

    #[test]
    fn test_out_of_order_tick_rejected() {
        let mut authority = DemoAuthority::new(1, SLICES);
        let payload = authority.advance_one_tick(1).unwrap();

        let mut replica = DemoWorld::default();
        let err = replica.apply_tick(&payload, 2).unwrap_err();
        assert_eq!(err.tick, 2);
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let mut replica = DemoWorld::default();
        assert!(replica.apply_tick(&[0xFF, 0xFF, 0xFF], 1).is_err());
    }

    #[test]
    fn test_latest_controls_win() {
        let mut authority = DemoAuthority::new(5, SLICES);
        authority.join(1);
        authority.advance_one_tick(1).unwrap();

        authority.submit_controls(1, walk_to(10, 10));
        authority.submit_controls(1, walk_to(800, 800));
        authority.advance_one_tick(2).unwrap();

        let unit = authority.world().unit(1).unwrap();
        assert_eq!((unit.target_x, unit.target_y), (800, 800));
        assert_eq!(unit.shots, 1);
    }

    #[test]
    fn test_units_walk_one_step_per_tick() {
        let mut authority = DemoAuthority::new(5, SLICES);
        authority.join(1);
        authority.advance_one_tick(1).unwrap();
        let start = authority.world().unit(1).unwrap().clone();

        authority.submit_controls(1, walk_to(start.x + 100, start.y));
        authority.advance_one_tick(2).unwrap();
        authority.advance_one_tick(3).unwrap();

        // Tick 2's sub-steps have run, tick 3's are still outstanding.
        let unit = authority.world().unit(1).unwrap();
        assert_eq!(unit.x, start.x + UNIT_SPEED);
    }
}
