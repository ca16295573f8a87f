//! Headless input source for the bundled client binary
//!
//! There is no window to read keys from, so the client drives its unit with
//! a small scripted player: it wanders between random points of the arena,
//! fires now and then, and occasionally "opens a menu" during which its
//! input is suppressed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::demo::ARENA_SIZE;
use shared::{ControlSnapshot, ControlSource};

const RETARGET_CHANCE_PERCENT: u32 = 2;
const FIRE_CHANCE_PERCENT: u32 = 5;
const MENU_CHANCE_PERCENT: u32 = 1;
const MENU_SAMPLES: u32 = 30;

pub struct ScriptedInput {
    rng: StdRng,
    target: (i32, i32),
    moving: bool,
    menu_samples_left: u32,
}

impl ScriptedInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            target: (ARENA_SIZE / 2, ARENA_SIZE / 2),
            moving: false,
            menu_samples_left: 0,
        }
    }
}

impl ControlSource for ScriptedInput {
    fn current_control_snapshot(&mut self) -> ControlSnapshot {
        if self.menu_samples_left > 0 {
            self.menu_samples_left -= 1;
        } else if self.rng.gen_range(0..100) < MENU_CHANCE_PERCENT {
            self.menu_samples_left = MENU_SAMPLES;
        }

        if self.rng.gen_range(0..100) < RETARGET_CHANCE_PERCENT {
            self.target = (
                self.rng.gen_range(0..=ARENA_SIZE),
                self.rng.gen_range(0..=ARENA_SIZE),
            );
            self.moving = true;
        }

        ControlSnapshot {
            target_x: self.target.0,
            target_y: self.target.1,
            unit_move: self.moving,
            primary_fire: self.rng.gen_range(0..100) < FIRE_CHANCE_PERCENT,
            secondary_fire: false,
        }
    }

    fn input_suppressed(&self) -> bool {
        self.menu_samples_left > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_script() {
        let mut a = ScriptedInput::new(99);
        let mut b = ScriptedInput::new(99);

        for _ in 0..500 {
            assert_eq!(a.current_control_snapshot(), b.current_control_snapshot());
            assert_eq!(a.input_suppressed(), b.input_suppressed());
        }
    }

    #[test]
    fn test_targets_stay_in_arena() {
        let mut input = ScriptedInput::new(3);
        let mut moved = false;

        for _ in 0..2000 {
            let controls = input.current_control_snapshot();
            assert!((0..=ARENA_SIZE).contains(&controls.target_x));
            assert!((0..=ARENA_SIZE).contains(&controls.target_y));
            moved |= controls.unit_move;
        }
        assert!(moved);
    }

    #[test]
    fn test_menu_opens_and_closes() {
        let mut input = ScriptedInput::new(17);
        assert!(!input.input_suppressed());

        let mut suppressed = 0;
        for _ in 0..5000 {
            input.current_control_snapshot();
            if input.input_suppressed() {
                suppressed += 1;
            }
        }
        assert!(suppressed > 0);
        assert!(suppressed < 5000);
    }
}
