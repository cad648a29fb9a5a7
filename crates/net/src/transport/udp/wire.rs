use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5445_5448;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32, ack: u32, ack_bitfield: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
            ack,
            ack_bitfield,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

/// Wrap-aware sequence comparison.
#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

/// One peer message in flight: the message kind and payload plus the
/// delivery class and per-stream sequence the receiver needs to apply
/// sequencing, deduplication and ordering.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Envelope {
    pub kind: u16,
    pub delivery: u8,
    pub channel: u8,
    pub stream_seq: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketBody {
    ConnectionRequest {
        session: String,
        client_salt: u64,
    },
    ConnectionChallenge {
        server_salt: u64,
        challenge: u64,
    },
    ChallengeResponse {
        combined_salt: u64,
        approval: String,
    },
    ConnectionAccepted {
        connection_id: u64,
    },
    ConnectionDenied {
        reason: String,
    },
    Messages(Vec<Envelope>),
    Ping {
        timestamp_ms: u64,
    },
    Pong {
        timestamp_ms: u64,
    },
    Disconnect,
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub body: PacketBody,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Packet {
    pub fn new(header: PacketHeader, body: PacketBody) -> Self {
        Self { header, body }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison_wraps() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_packet_roundtrip() {
        let packet = Packet::new(
            PacketHeader::new(5, 4, 0b11),
            PacketBody::Messages(vec![Envelope {
                kind: 9,
                delivery: 4,
                channel: 0,
                stream_seq: 17,
                payload: vec![1, 2, 3],
            }]),
        );

        let bytes = packet.serialize().unwrap();
        let decoded = Packet::deserialize(&bytes).unwrap();
        assert_eq!(decoded.header, packet.header);
        match decoded.body {
            PacketBody::Messages(envs) => {
                assert_eq!(envs.len(), 1);
                assert_eq!(envs[0].kind, 9);
                assert_eq!(envs[0].stream_seq, 17);
                assert_eq!(envs[0].payload, vec![1, 2, 3]);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(Packet::deserialize(&[0xAB; 16]).is_err());
    }

    #[test]
    fn test_header_validation() {
        let mut header = PacketHeader::new(1, 0, 0);
        assert!(header.is_valid());
        header.magic = 0xDEAD_BEEF;
        assert!(!header.is_valid());
    }
}
