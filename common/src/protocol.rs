//! Packet framing for the ingest socket.
//!
//! Every packet starts with a fixed 13-byte header:
//!
//! ```text
//! +------+----------------+-------------+
//! | kind | timestamp (BE) | length (BE) |
//! |  u8  |      u64       |     u32     |
//! +------+----------------+-------------+
//! ```
//!
//! followed by `length` payload bytes.

use crate::{Command, ProjectorError};

/// Size of the fixed packet header in bytes
pub const PACKET_HEADER_LEN: usize = 13;

/// Largest payload accepted in a single packet (16 MiB)
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Packet payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// JSON-encoded [`Command`]
    Control,
    /// One encoded access unit
    AccessUnit,
}

impl PacketKind {
    fn to_byte(self) -> u8 {
        match self {
            Self::Control => b'C',
            Self::AccessUnit => b'V',
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'C' => Some(Self::Control),
            b'V' => Some(Self::AccessUnit),
            _ => None,
        }
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    /// Producer timestamp in microseconds (zero for control packets)
    pub timestamp: u64,
    /// Payload length in bytes
    pub len: u32,
}

impl PacketHeader {
    /// Parse a header, rejecting unknown kinds and oversized payloads
    pub fn parse(bytes: &[u8; PACKET_HEADER_LEN]) -> Result<Self, ProjectorError> {
        let kind = PacketKind::from_byte(bytes[0]).ok_or_else(|| {
            ProjectorError::Ipc(format!("Unknown packet kind: 0x{:02x}", bytes[0]))
        })?;

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[1..9]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[9..13]);

        let len = u32::from_be_bytes(len);
        if len > MAX_PAYLOAD_LEN {
            return Err(ProjectorError::Ipc(format!(
                "Packet payload too large: {} bytes (max {})",
                len, MAX_PAYLOAD_LEN
            )));
        }

        Ok(Self {
            kind,
            timestamp: u64::from_be_bytes(timestamp),
            len,
        })
    }

    /// Encode the header into its wire form
    pub fn encode(&self) -> [u8; PACKET_HEADER_LEN] {
        let mut out = [0u8; PACKET_HEADER_LEN];
        out[0] = self.kind.to_byte();
        out[1..9].copy_from_slice(&self.timestamp.to_be_bytes());
        out[9..13].copy_from_slice(&self.len.to_be_bytes());
        out
    }
}

fn encode_packet(kind: PacketKind, timestamp: u64, payload: &[u8]) -> Vec<u8> {
    let header = PacketHeader {
        kind,
        timestamp,
        len: payload.len() as u32,
    };

    let mut packet = Vec::with_capacity(PACKET_HEADER_LEN + payload.len());
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(payload);
    packet
}

/// Encode a control command packet
pub fn encode_command(command: &Command) -> Result<Vec<u8>, ProjectorError> {
    let payload = serde_json::to_vec(command)?;
    Ok(encode_packet(PacketKind::Control, 0, &payload))
}

/// Encode an access-unit packet
pub fn encode_access_unit(timestamp: u64, data: &[u8]) -> Vec<u8> {
    encode_packet(PacketKind::AccessUnit, timestamp, data)
}

/// Decode a control packet payload
pub fn decode_command(payload: &[u8]) -> Result<Command, ProjectorError> {
    Ok(serde_json::from_slice(payload)?)
}
