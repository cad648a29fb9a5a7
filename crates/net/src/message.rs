use log::warn;

use crate::error::CodecError;

/// Identifies a remote endpoint within a session. The server hands out ids
/// starting at 1; from a client's point of view the server is always
/// [`SERVER_CONNECTION_ID`].
pub type ConnectionId = u64;

pub const SERVER_CONNECTION_ID: ConnectionId = 0;

/// Wire tag carried ahead of every message payload. The numeric values are
/// part of the wire format and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    None = 0,
    ConnectionApproval = 1,
    Connected = 2,
    Disconnected = 3,
    ActorReplication = 4,
    /// Reserved tag. Nothing sends it; both peers ignore it on receipt.
    PlayerCreation = 5,
    ActorCreation = 6,
    PlayerActorRequest = 7,
    PropertyReplication = 8,
    RemoteMethodCall = 9,
    ActorDestruction = 10,
    ServerTravel = 11,
    ClientDisconnected = 12,
    Chat = 13,
}

impl MessageKind {
    pub fn from_wire(tag: u16) -> Result<Self, CodecError> {
        Ok(match tag {
            0 => Self::None,
            1 => Self::ConnectionApproval,
            2 => Self::Connected,
            3 => Self::Disconnected,
            4 => Self::ActorReplication,
            5 => Self::PlayerCreation,
            6 => Self::ActorCreation,
            7 => Self::PlayerActorRequest,
            8 => Self::PropertyReplication,
            9 => Self::RemoteMethodCall,
            10 => Self::ActorDestruction,
            11 => Self::ServerTravel,
            12 => Self::ClientDisconnected,
            13 => Self::Chat,
            other => return Err(CodecError::UnknownKind(other)),
        })
    }

    pub fn wire_tag(self) -> u16 {
        self as u16
    }
}

/// How a message travels once it reaches a real transport. The loopback
/// transport delivers everything in order regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Delivery {
    /// Fire and forget.
    Unreliable = 0,
    /// Fire and forget, but late arrivals on the channel are dropped.
    UnreliableSequenced = 1,
    /// Retransmitted until acknowledged; arrival order is unconstrained.
    ReliableUnordered = 2,
    /// Retransmitted until acknowledged; late arrivals are dropped.
    ReliableSequenced = 3,
    /// Retransmitted until acknowledged and delivered in send order.
    ReliableOrdered = 4,
}

impl Delivery {
    pub fn from_wire(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Unreliable,
            1 => Self::UnreliableSequenced,
            2 => Self::ReliableUnordered,
            3 => Self::ReliableSequenced,
            4 => Self::ReliableOrdered,
            _ => return None,
        })
    }

    pub fn wire_tag(self) -> u8 {
        self as u8
    }

    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            Self::ReliableUnordered | Self::ReliableSequenced | Self::ReliableOrdered
        )
    }
}

/// A message under construction. Fields are appended little-endian in call
/// order; the reader on the far side must consume them in the same order.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    kind: MessageKind,
    buf: Vec<u8>,
}

impl OutgoingMessage {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            buf: Vec::new(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Writes a u16 length prefix followed by the UTF-8 bytes. Strings longer
    /// than a u16 can express are truncated at a character boundary.
    pub fn write_str(&mut self, value: &str) {
        let mut bytes = value.as_bytes();
        if bytes.len() > usize::from(u16::MAX) {
            let mut end = usize::from(u16::MAX);
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            warn!("truncating {} byte string field to {end} bytes", bytes.len());
            bytes = &bytes[..end];
        }
        self.buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(bytes);
    }
}

/// A received message plus its read cursor. Reads consume fields in the
/// order the sender wrote them and fail instead of panicking when the
/// payload is shorter than expected.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    kind: MessageKind,
    sender: ConnectionId,
    payload: Vec<u8>,
    cursor: usize,
}

impl IncomingMessage {
    pub fn new(kind: MessageKind, sender: ConnectionId, payload: Vec<u8>) -> Self {
        Self {
            kind,
            sender,
            payload,
            cursor: 0,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn sender(&self) -> ConnectionId {
        self.sender
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.cursor + N;
        let slice = self
            .payload
            .get(self.cursor..end)
            .ok_or(CodecError::ReadPastEnd)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.cursor = end;
        Ok(out)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take::<4>()?))
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take::<2>()?))
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.take::<4>()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.take::<1>()?[0] != 0)
    }

    pub fn read_str(&mut self) -> Result<String, CodecError> {
        let len = usize::from(self.read_u16()?);
        let end = self.cursor + len;
        let bytes = self
            .payload
            .get(self.cursor..end)
            .ok_or(CodecError::ReadPastEnd)?;
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidString)?;
        self.cursor = end;
        Ok(text.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(out: OutgoingMessage) -> IncomingMessage {
        IncomingMessage::new(out.kind(), 7, out.into_payload())
    }

    #[test]
    fn test_primitive_roundtrip() {
        let mut out = OutgoingMessage::new(MessageKind::Chat);
        out.write_i32(-123_456);
        out.write_f32(2.5);
        out.write_u8(200);
        out.write_u16(60_000);
        out.write_bool(true);
        out.write_bool(false);
        out.write_str("héllo");

        let mut msg = roundtrip(out);
        assert_eq!(msg.kind(), MessageKind::Chat);
        assert_eq!(msg.sender(), 7);
        assert_eq!(msg.read_i32().unwrap(), -123_456);
        assert_eq!(msg.read_f32().unwrap(), 2.5);
        assert_eq!(msg.read_u8().unwrap(), 200);
        assert_eq!(msg.read_u16().unwrap(), 60_000);
        assert!(msg.read_bool().unwrap());
        assert!(!msg.read_bool().unwrap());
        assert_eq!(msg.read_str().unwrap(), "héllo");
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_short_payload_errors_instead_of_panicking() {
        let mut msg = IncomingMessage::new(MessageKind::ActorReplication, 1, vec![1, 2]);
        assert_eq!(msg.read_i32(), Err(CodecError::ReadPastEnd));
        // The failed read must not consume anything.
        assert_eq!(msg.remaining(), 2);
        assert_eq!(msg.read_u16().unwrap(), u16::from_le_bytes([1, 2]));
    }

    #[test]
    fn test_string_with_invalid_utf8() {
        let mut msg = IncomingMessage::new(MessageKind::Chat, 1, vec![2, 0, 0xFF, 0xFE]);
        assert_eq!(msg.read_str(), Err(CodecError::InvalidString));
    }

    #[test]
    fn test_string_length_past_end() {
        let mut msg = IncomingMessage::new(MessageKind::Chat, 1, vec![10, 0, b'a']);
        assert_eq!(msg.read_str(), Err(CodecError::ReadPastEnd));
    }

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(MessageKind::ActorReplication.wire_tag(), 4);
        assert_eq!(MessageKind::Chat.wire_tag(), 13);
        assert_eq!(
            MessageKind::from_wire(9).unwrap(),
            MessageKind::RemoteMethodCall
        );
        assert_eq!(MessageKind::from_wire(99), Err(CodecError::UnknownKind(99)));
    }

    #[test]
    fn test_delivery_tags_are_stable() {
        for tag in 0..=4 {
            assert_eq!(Delivery::from_wire(tag).unwrap().wire_tag(), tag);
        }
        assert!(Delivery::from_wire(5).is_none());
        assert!(Delivery::ReliableSequenced.is_reliable());
        assert!(!Delivery::UnreliableSequenced.is_reliable());
    }
}
