//! The transport unit ("letter") exchanged between server and client.
//!
//! Every datagram carries exactly one [`Envelope`]: a sequence id, a kind tag
//! and an opaque payload. Only `WorldUpdate` letters form the ordered tick
//! stream; the other kinds are control letters whose sequence id is
//! informational (the server's current id, or the client's last applied id
//! acting as an acknowledgement).

use crate::checksum::SyncChecksum;
use crate::controls::ControlSnapshot;
use crate::error::CodecError;
use bincode::{deserialize, serialize};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LetterKind {
    Hello,
    Goodbye,
    TeamAssign,
    WorldUpdate,
    IAmAlive,
    Sync,
    DesyncReport,
}

/// Immutable letter. `sender` is stamped by the receive path and never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    sequence_id: u64,
    kind: LetterKind,
    payload: Vec<u8>,
    #[serde(skip)]
    sender: Option<SocketAddr>,
}

/// Client greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHello {
    pub client_version: u32,
}

/// Server answer to a hello. The envelope's sequence id is the baseline: the
/// first tick the client will receive is `baseline + 1`, and `snapshot` is the
/// world as it stands right before that tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub client_id: u32,
    pub team_id: u32,
    pub snapshot: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAssignment {
    pub client_id: u32,
    pub team_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesyncNotice {
    pub server_checksum: SyncChecksum,
    pub client_checksum: SyncChecksum,
}

impl Envelope {
    pub fn new(sequence_id: u64, kind: LetterKind, payload: Vec<u8>) -> Self {
        Self {
            sequence_id,
            kind,
            payload,
            sender: None,
        }
    }

    fn with_body<T: Serialize>(
        sequence_id: u64,
        kind: LetterKind,
        body: &T,
    ) -> Result<Self, CodecError> {
        Ok(Self::new(sequence_id, kind, serialize(body)?))
    }

    pub fn client_hello(client_version: u32) -> Result<Self, CodecError> {
        Self::with_body(0, LetterKind::Hello, &ClientHello { client_version })
    }

    pub fn welcome(baseline: u64, welcome: &Welcome) -> Result<Self, CodecError> {
        Self::with_body(baseline, LetterKind::Hello, welcome)
    }

    pub fn team_assign(sequence_id: u64, assignment: TeamAssignment) -> Result<Self, CodecError> {
        Self::with_body(sequence_id, LetterKind::TeamAssign, &assignment)
    }

    pub fn goodbye(sequence_id: u64, reason: &str) -> Self {
        Self::new(sequence_id, LetterKind::Goodbye, reason.as_bytes().to_vec())
    }

    pub fn world_update(sequence_id: u64, payload: Vec<u8>) -> Self {
        Self::new(sequence_id, LetterKind::WorldUpdate, payload)
    }

    pub fn i_am_alive(last_applied: u64, controls: &ControlSnapshot) -> Result<Self, CodecError> {
        Self::with_body(last_applied, LetterKind::IAmAlive, controls)
    }

    pub fn sync(sequence_id: u64, checksum: SyncChecksum) -> Self {
        Self::new(sequence_id, LetterKind::Sync, vec![checksum.value()])
    }

    pub fn desync_report(sequence_id: u64, notice: DesyncNotice) -> Result<Self, CodecError> {
        Self::with_body(sequence_id, LetterKind::DesyncReport, &notice)
    }

    /// Returns a copy stamped with the address it arrived from.
    pub fn with_sender(self, sender: SocketAddr) -> Self {
        Self {
            sender: Some(sender),
            ..self
        }
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn kind(&self) -> LetterKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn sender(&self) -> Option<SocketAddr> {
        self.sender
    }

    /// Whether this letter belongs to the ordered tick stream.
    pub fn is_sequenced(&self) -> bool {
        self.kind == LetterKind::WorldUpdate
    }

    /// Decodes the payload of a control letter of the given kind.
    pub fn body<T: DeserializeOwned>(&self, expected: LetterKind) -> Result<T, CodecError> {
        self.expect_kind(expected)?;
        Ok(deserialize(&self.payload)?)
    }

    pub fn sync_checksum(&self) -> Result<SyncChecksum, CodecError> {
        self.expect_kind(LetterKind::Sync)?;
        match self.payload.as_slice() {
            [value] => Ok(SyncChecksum::new(*value)),
            other => Err(CodecError::Malformed {
                kind: LetterKind::Sync,
                reason: format!("expected 1 byte, got {}", other.len()),
            }),
        }
    }

    pub fn goodbye_reason(&self) -> Result<String, CodecError> {
        self.expect_kind(LetterKind::Goodbye)?;
        Ok(String::from_utf8_lossy(&self.payload).into_owned())
    }

    fn expect_kind(&self, expected: LetterKind) -> Result<(), CodecError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(CodecError::UnexpectedKind {
                expected,
                actual: self.kind,
            })
        }
    }

    /// Wire encoding.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(deserialize(bytes)?)
    }
}
