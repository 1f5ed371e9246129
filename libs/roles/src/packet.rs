//! Framing of the packets exchanged by committee members.
//!
//! Every packet starts with a 16 byte header `u32 size | u32 type | u64 deadline`,
//! where `size` covers the header itself.
use crate::{chain::Timestamp, codec::Reader};
use anyhow::Context as _;
use std::fmt;

/// Size of the packet header.
pub const PACKET_HEADER_SIZE: usize = 16;

/// Packet types consumed by the voting protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum PacketType {
    /// A block proposed for the current round.
    PushProposedBlock = 13,
    /// A prevote.
    PushPrevoteMessages = 14,
    /// A precommit.
    PushPrecommitMessages = 15,
    /// A block cosigned by the committee.
    PullConfirmedBlock = 16,
    /// A DBRB install message.
    DbrbInstallMessage = 554,
}

impl PacketType {
    /// Name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PushProposedBlock => "push_proposed_block",
            Self::PushPrevoteMessages => "push_prevote_messages",
            Self::PushPrecommitMessages => "push_precommit_messages",
            Self::PullConfirmedBlock => "pull_confirmed_block",
            Self::DbrbInstallMessage => "dbrb_install_message",
        }
    }
}

impl TryFrom<u32> for PacketType {
    type Error = anyhow::Error;

    fn try_from(v: u32) -> anyhow::Result<Self> {
        Ok(match v {
            13 => Self::PushProposedBlock,
            14 => Self::PushPrevoteMessages,
            15 => Self::PushPrecommitMessages,
            16 => Self::PullConfirmedBlock,
            554 => Self::DbrbInstallMessage,
            v => anyhow::bail!("unknown packet type {v}"),
        })
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Packet header. `size` is as declared by the sender and is not trusted:
/// handlers check it against the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Declared packet size, header included.
    pub size: u32,
    /// Raw packet type.
    pub packet_type: u32,
    /// Time after which the packet is stale.
    pub deadline: Timestamp,
}

/// A packet: header and payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Header.
    pub header: PacketHeader,
    /// Payload.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Builds a packet with a correctly declared size.
    pub fn new(packet_type: PacketType, deadline: Timestamp, payload: Vec<u8>) -> anyhow::Result<Self> {
        let size = u32::try_from(PACKET_HEADER_SIZE + payload.len()).context("packet too large")?;
        Ok(Self {
            header: PacketHeader {
                size,
                packet_type: packet_type as u32,
                deadline,
            },
            payload,
        })
    }

    /// Parsed packet type.
    pub fn packet_type(&self) -> anyhow::Result<PacketType> {
        self.header.packet_type.try_into()
    }

    /// Whether the declared size matches the actual one.
    pub fn is_size_consistent(&self) -> bool {
        usize::try_from(self.header.size).is_ok_and(|size| size == PACKET_HEADER_SIZE + self.payload.len())
    }

    /// Encodes the packet. The declared size is written as is.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.size.to_le_bytes());
        buf.extend_from_slice(&self.header.packet_type.to_le_bytes());
        buf.extend_from_slice(&self.header.deadline.0.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Splits `bytes` into header and payload. Everything after the header is payload;
    /// the declared size is not checked.
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut r = Reader::new(bytes);
        let header = PacketHeader {
            size: r.read_u32()?,
            packet_type: r.read_u32()?,
            deadline: Timestamp(r.read_u64()?),
        };
        let payload = r.read_bytes(r.remaining())?.to_vec();
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let packet = Packet::new(PacketType::PushPrevoteMessages, Timestamp(7), vec![1, 2, 3]).unwrap();
        assert!(packet.is_size_consistent());
        let encoded = packet.encode();
        assert_eq!(encoded.len(), 19);
        assert_eq!(&encoded[..4], &19u32.to_le_bytes());
        assert_eq!(&encoded[4..8], &14u32.to_le_bytes());
        assert_eq!(packet, Packet::decode(&encoded).unwrap());
        assert_eq!(packet.packet_type().unwrap(), PacketType::PushPrevoteMessages);
        assert!(Packet::decode(&encoded[..10]).is_err());
    }

    #[test]
    fn inconsistent_size_is_detected() {
        let mut packet = Packet::new(PacketType::PushProposedBlock, Timestamp(0), vec![0; 8]).unwrap();
        packet.header.size += 1;
        assert!(!packet.is_size_consistent());
        packet.header.size = 0;
        assert!(!packet.is_size_consistent());
    }
}
