//! Error types for the lockstep protocol.

use crate::envelope::LetterKind;
use thiserror::Error;

/// Result type alias using [`LockstepError`].
pub type Result<T> = std::result::Result<T, LockstepError>;

/// Violations of the strict in-order delivery contract.
///
/// Every variant is fatal to the current session: the client must drop its
/// replica and resynchronize from a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// An id at or below the last applied one, or one already buffered.
    #[error("duplicate letter {received} (expected {expected})")]
    Duplicate { expected: u64, received: u64 },

    /// An id too far ahead to be explained by reordering.
    #[error("letter {received} is beyond the reorder window (expected {expected}, window {window})")]
    BeyondWindow {
        expected: u64,
        received: u64,
        window: usize,
    },

    /// The reorder window filled up without the next expected id.
    #[error("letter {expected} is missing ({buffered} later letters buffered)")]
    Gap { expected: u64, buffered: usize },
}

/// Wire encoding failures. The offending datagram is dropped.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("expected a {expected:?} letter, got {actual:?}")]
    UnexpectedKind {
        expected: LetterKind,
        actual: LetterKind,
    },

    #[error("malformed {kind:?} payload: {reason}")]
    Malformed { kind: LetterKind, reason: String },
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Raised by a game-logic collaborator that cannot apply a tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("world rejected tick {tick}: {reason}")]
pub struct WorldError {
    pub tick: u64,
    pub reason: String,
}

/// The consuming half of a transport queue has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transport queue closed")]
pub struct QueueClosed;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum LockstepError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Queue(#[from] QueueClosed),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl LockstepError {
    /// Whether the session has to be torn down and resynchronized.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LockstepError::Protocol(_) | LockstepError::World(_) | LockstepError::Queue(_)
        )
    }
}
