//! Wire-shaped types exchanged between devices: the three message variants
//! and the chunk/protocol headers they carry.

use serde::{Deserialize, Serialize};

use crate::firmware::ChunkPayload;

pub type DeviceId = usize;
pub type DeviceType = u32;
pub type FwType = u32;
pub type Version = u32;
pub type ChunkId = usize;

/// Identifies a single chunk of a specific firmware type and version -
/// the key used by every seen/request dedup store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub fw_type: FwType,
    pub version: Version,
    pub chunk_id: ChunkId,
}

/// Header shared by every message variant: who sent it, and the shape of
/// the firmware image it concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proto {
    pub from_device: DeviceId,
    pub chunk_size: usize,
    pub chunks: usize,
    pub fw_size: usize,
}

impl Proto {
    /// Returns a copy of this header as if resent from `from_device` -
    /// used when a device relabels an inbound message with the neighbor
    /// that actually forwarded it.
    pub fn with_from_device(self, from_device: DeviceId) -> Self {
        Self {
            from_device,
            ..self
        }
    }
}

/// One of the three protocol messages exchanged between devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Message {
    /// A device advertises that it holds a given chunk.
    Announce { proto: Proto, dsc: ChunkDescriptor },
    /// A device asks for a given chunk.
    Request { proto: Proto, dsc: ChunkDescriptor },
    /// A device delivers a chunk's payload.
    Data {
        proto: Proto,
        dsc: ChunkDescriptor,
        data: ChunkPayload,
    },
}

impl Message {
    pub fn proto(&self) -> &Proto {
        match self {
            Message::Announce { proto, .. }
            | Message::Request { proto, .. }
            | Message::Data { proto, .. } => proto,
        }
    }

    pub fn dsc(&self) -> &ChunkDescriptor {
        match self {
            Message::Announce { dsc, .. } | Message::Request { dsc, .. } | Message::Data { dsc, .. } => {
                dsc
            }
        }
    }

    /// Returns a copy of this message with its header's `from_device`
    /// replaced, preserving the rest of the message unchanged.
    pub fn with_from_device(&self, from_device: DeviceId) -> Self {
        let mut m = self.clone();
        match &mut m {
            Message::Announce { proto, .. }
            | Message::Request { proto, .. }
            | Message::Data { proto, .. } => *proto = proto.with_from_device(from_device),
        }
        m
    }
}
