//! Per-tick sync checksums and the server-side desync detector.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// One byte summarising the simulation state right after a tick is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncChecksum(u8);

impl SyncChecksum {
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// FNV-1a over the sync state, xor-folded down to a byte.
    pub fn of_state(state: &[u8]) -> Self {
        let mut hash = FNV_OFFSET_BASIS;
        for byte in state {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }

        hash ^= hash >> 32;
        hash ^= hash >> 16;
        hash ^= hash >> 8;
        Self(hash as u8)
    }
}

impl fmt::Display for SyncChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Outcome of comparing a peer's checksum with the local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncVerdict {
    Match,
    Mismatch {
        local: SyncChecksum,
        remote: SyncChecksum,
    },
    /// Never recorded, or already rotated out of the history.
    Unknown,
}

/// Rolling history of the local peer's checksums, indexed by sequence id.
#[derive(Debug, Clone)]
pub struct DesyncDetector {
    history: VecDeque<(u64, SyncChecksum)>,
    window: usize,
    last_desync: Option<u64>,
    mismatches: u64,
}

impl DesyncDetector {
    pub fn new(window: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(window),
            window: window.max(1),
            last_desync: None,
            mismatches: 0,
        }
    }

    /// Records the local checksum for a tick. Ids arrive in increasing order.
    pub fn record(&mut self, sequence_id: u64, checksum: SyncChecksum) {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back((sequence_id, checksum));
    }

    pub fn recorded(&self, sequence_id: u64) -> Option<SyncChecksum> {
        self.history
            .binary_search_by_key(&sequence_id, |(id, _)| *id)
            .ok()
            .map(|index| self.history[index].1)
    }

    /// Compares a remote checksum against the local record for the same tick.
    ///
    /// A mismatch is logged and remembered but never treated as fatal.
    pub fn verify(&mut self, sequence_id: u64, remote: SyncChecksum) -> SyncVerdict {
        match self.recorded(sequence_id) {
            None => SyncVerdict::Unknown,
            Some(local) if local == remote => SyncVerdict::Match,
            Some(local) => {
                warn!(
                    "Desync at tick {}: local {} remote {}",
                    sequence_id, local, remote
                );
                self.mismatches += 1;
                self.last_desync = Some(self.last_desync.map_or(sequence_id, |t| t.max(sequence_id)));
                SyncVerdict::Mismatch { local, remote }
            }
        }
    }

    pub fn last_desync_tick(&self) -> Option<u64> {
        self.last_desync
    }

    pub fn mismatch_count(&self) -> u64 {
        self.mismatches
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
