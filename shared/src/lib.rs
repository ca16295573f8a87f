//! Protocol pieces used by both the server and the client: the letter
//! envelope, the transport queue, sequencing, sync checksums and the traits
//! through which the lockstep core drives the game.

pub mod cadence;
pub mod checksum;
pub mod config;
pub mod controls;
pub mod demo;
pub mod envelope;
pub mod error;
pub mod queue;
pub mod sequencer;
pub mod world;

pub use cadence::Cadence;
pub use checksum::{DesyncDetector, SyncChecksum, SyncVerdict};
pub use config::LockstepConfig;
pub use controls::ControlSnapshot;
pub use envelope::{ClientHello, DesyncNotice, Envelope, LetterKind, TeamAssignment, Welcome};
pub use error::{
    CodecError, ConfigError, LockstepError, ProtocolError, QueueClosed, Result, WorldError,
};
pub use queue::{QueueConsumer, QueueProducer, TransportQueue};
pub use sequencer::Sequencer;
pub use world::{ControlSource, LockstepWorld, TickSource};

/// Largest datagram either side will read.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;
