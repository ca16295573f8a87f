//! Fixed-rate tick scheduler for the authoritative simulation

use log::debug;
use shared::{
    Cadence, DesyncDetector, Envelope, LockstepConfig, Sequencer, SyncChecksum, SyncVerdict,
    TickSource, WorldError,
};
use std::time::Instant;

/// One advanced tick, ready for the outbox
#[derive(Debug, Clone)]
pub struct AdvancedTick {
    pub envelope: Envelope,
    pub checksum: SyncChecksum,
}

/// Owns everything that must only ever be mutated from the simulation loop:
/// the tick deadline, the sequencer, the world and the server's own checksum
/// history.
pub struct TickScheduler<W> {
    cadence: Cadence,
    sequencer: Sequencer,
    world: W,
    detector: DesyncDetector,
}

impl<W: TickSource> TickScheduler<W> {
    /// The first tick is due one period after `start`.
    pub fn new(world: W, config: &LockstepConfig, start: Instant) -> Self {
        Self::with_sequencer(world, config, start, Sequencer::new())
    }

    pub fn with_sequencer(
        world: W,
        config: &LockstepConfig,
        start: Instant,
        sequencer: Sequencer,
    ) -> Self {
        Self {
            cadence: Cadence::new(config.tick_period, start),
            sequencer,
            world,
            detector: DesyncDetector::new(config.history_window),
        }
    }

    /// Advances exactly one tick if the deadline has passed.
    ///
    /// Never advances more than one tick per call: a caller that was late by
    /// several periods gets a single tick and a re-anchored deadline.
    pub fn poll(&mut self, now: Instant) -> Result<Option<AdvancedTick>, WorldError> {
        if !self.cadence.poll(now) {
            return Ok(None);
        }
        self.advance().map(Some)
    }

    fn advance(&mut self) -> Result<AdvancedTick, WorldError> {
        let tick_index = self.sequencer.current() + 1;
        let payload = self.world.advance_one_tick(tick_index)?;

        // The id is only consumed once the world has actually moved, so a
        // failed tick never leaves a hole in the sent stream.
        let sequence_id = self.sequencer.next_id();
        debug_assert_eq!(sequence_id, tick_index);

        let checksum = SyncChecksum::of_state(&self.world.sync_state());
        self.detector.record(sequence_id, checksum);
        debug!(
            "Tick {}: {} byte payload, sync {}",
            sequence_id,
            payload.len(),
            checksum
        );

        Ok(AdvancedTick {
            envelope: Envelope::world_update(sequence_id, payload),
            checksum,
        })
    }

    /// Compares a client's checksum with the one recorded for the same tick.
    pub fn verify(&mut self, sequence_id: u64, remote: SyncChecksum) -> SyncVerdict {
        self.detector.verify(sequence_id, remote)
    }

    pub fn current(&self) -> u64 {
        self.sequencer.current()
    }

    pub fn last_desync_tick(&self) -> Option<u64> {
        self.detector.last_desync_tick()
    }

    pub fn next_deadline(&self) -> Instant {
        self.cadence.next_deadline()
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }
}
