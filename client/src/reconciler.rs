//! Catch-up reconciler: turns elapsed wall-clock time into sub-steps
//!
//! The client runs the world a fraction of a tick at a time. On every
//! rendered frame the reconciler works out how many sub-steps ("slices") the
//! clock says should have happened since the session started, subtracts the
//! ones already done, and performs at most `max_slices_per_frame` of the
//! difference. The first slice of each tick pops the next letter from the
//! tick inbox and applies it; a tick is never applied until the previous one
//! has finished all of its slices.
//!
//! Letters may arrive slightly out of order. Up to `reorder_window` of them
//! are held back until the missing one turns up. Anything that cannot be
//! explained by small reordering is a [`ProtocolError`] and ends the session.

use log::{debug, warn};
use shared::{
    Envelope, LockstepConfig, LockstepError, LockstepWorld, ProtocolError, QueueConsumer,
    SyncChecksum,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Where the replica is inside the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// The last applied tick has run all of its slices.
    Idle,
    /// `n` slices of the last applied tick have run, `0 < n < sub_steps`.
    Stepping(u32),
}

/// What one call to [`CatchUpReconciler::frame`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub slices_advanced: u32,
    pub ticks_applied: u32,
    /// Checksum of every tick applied in this frame, to be sent as `Sync`.
    pub checksums: Vec<(u64, SyncChecksum)>,
}

pub struct CatchUpReconciler<W> {
    world: W,
    state: StepState,

    // Clock anchor: the session started at `session_start` with tick
    // `baseline` fully applied.
    session_start: Instant,
    baseline: u64,
    last_applied: u64,

    tick_period: Duration,
    sub_steps: u32,
    max_slices_per_frame: u32,

    reorder_window: usize,
    held: BTreeMap<u64, Envelope>,
}

impl<W: LockstepWorld> CatchUpReconciler<W> {
    /// Starts reconciling a world that already reflects tick `baseline`.
    pub fn new(world: W, config: &LockstepConfig, baseline: u64, session_start: Instant) -> Self {
        Self {
            world,
            state: StepState::Idle,
            session_start,
            baseline,
            last_applied: baseline,
            tick_period: config.tick_period,
            sub_steps: config.sub_steps_per_tick.max(1),
            max_slices_per_frame: config.max_slices_per_frame,
            reorder_window: config.reorder_window,
            held: BTreeMap::new(),
        }
    }

    /// Advances the replica for one rendered frame.
    pub fn frame(
        &mut self,
        now: Instant,
        inbox: &mut QueueConsumer<Envelope>,
    ) -> Result<FrameReport, LockstepError> {
        let budget = self.slices_behind(now).min(self.max_slices_per_frame as u64);
        let mut report = FrameReport::default();

        for _ in 0..budget {
            let slice = match self.state {
                StepState::Stepping(slice) => slice,
                StepState::Idle => {
                    let Some(letter) = self.next_letter(inbox)? else {
                        // Nothing to apply yet; the debt carries to a later frame.
                        break;
                    };
                    let checksum = self.apply(letter)?;
                    report.ticks_applied += 1;
                    report.checksums.push((self.last_applied, checksum));
                    0
                }
            };

            self.world.advance_slice(slice, self.sub_steps);
            report.slices_advanced += 1;

            self.state = if slice + 1 < self.sub_steps {
                StepState::Stepping(slice + 1)
            } else {
                StepState::Idle
            };
        }

        Ok(report)
    }

    fn apply(&mut self, letter: Envelope) -> Result<SyncChecksum, LockstepError> {
        let tick_index = letter.sequence_id();
        self.world.apply_tick(letter.payload(), tick_index)?;
        self.last_applied = tick_index;

        let checksum = SyncChecksum::of_state(&self.world.sync_state());
        debug!("Applied tick {} (sync {})", tick_index, checksum);
        Ok(checksum)
    }

    /// Returns the letter for `last_applied + 1` if it has arrived.
    fn next_letter(
        &mut self,
        inbox: &mut QueueConsumer<Envelope>,
    ) -> Result<Option<Envelope>, ProtocolError> {
        let expected = self.last_applied + 1;

        loop {
            if let Some(letter) = self.held.remove(&expected) {
                return Ok(Some(letter));
            }
            if self.held.len() >= self.reorder_window {
                return Err(ProtocolError::Gap {
                    expected,
                    buffered: self.held.len(),
                });
            }

            let Some(letter) = inbox.try_pop() else {
                return Ok(None);
            };
            if !letter.is_sequenced() {
                warn!("Ignoring {:?} letter in the tick inbox", letter.kind());
                continue;
            }

            let received = letter.sequence_id();
            if received < expected || self.held.contains_key(&received) {
                return Err(ProtocolError::Duplicate { expected, received });
            }
            if received > expected + self.reorder_window as u64 {
                return Err(ProtocolError::BeyondWindow {
                    expected,
                    received,
                    window: self.reorder_window,
                });
            }
            if received == expected {
                return Ok(Some(letter));
            }

            debug!("Holding letter {} while waiting for {}", received, expected);
            self.held.insert(received, letter);
        }
    }

    /// Slices the clock is ahead of the replica, before the per-frame cap.
    pub fn slices_behind(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.session_start).as_nanos();
        let period = self.tick_period.as_nanos().max(1);
        let target = elapsed * self.sub_steps as u128 / period;

        target.saturating_sub(self.slices_done()).min(u64::MAX as u128) as u64
    }

    fn slices_done(&self) -> u128 {
        let whole_ticks = (self.last_applied - self.baseline) as u128 * self.sub_steps as u128;
        match self.state {
            StepState::Idle => whole_ticks,
            StepState::Stepping(slice) => whole_ticks - (self.sub_steps - slice) as u128,
        }
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn baseline(&self) -> u64 {
        self.baseline
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Letters received ahead of a missing one.
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn into_world(self) -> W {
        self.world
    }
}
