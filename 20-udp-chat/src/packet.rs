//! Frame codec for chat datagrams.
//!
//! Every datagram carries exactly one frame, laid out as ASCII header fields
//! separated by single spaces:
//!
//! ```text
//! <type> <sequence_number> <checksum> <payload...>
//! ```
//!
//! The checksum is a CRC-32 over the serialized `"<type> <sequence_number> "`
//! prefix followed by the raw payload bytes. Decoding does not fail on a
//! checksum mismatch; it reports `checksum_valid = false` and leaves the drop
//! decision to the caller. Bytes that cannot be split into header fields are a
//! [`FrameError`].
//!
//! No I/O happens here.

use std::fmt;

use thiserror::Error;

/// Largest datagram either side will send or read.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

const SEPARATOR: u8 = b' ';

/// Frame type carried in the first header field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Join,
    List,
    Msg,
    Disconnect,
    Error,
    ForwardMessage,
    ResponseUsersList,
    /// A well-formed type token this protocol does not define.
    Unknown(String),
}

impl PacketKind {
    pub fn as_str(&self) -> &str {
        match self {
            PacketKind::Join => "join",
            PacketKind::List => "list",
            PacketKind::Msg => "msg",
            PacketKind::Disconnect => "disconnect",
            PacketKind::Error => "error",
            PacketKind::ForwardMessage => "forward_message",
            PacketKind::ResponseUsersList => "response_users_list",
            PacketKind::Unknown(token) => token,
        }
    }

    fn from_token(token: &str) -> Self {
        match token {
            "join" => PacketKind::Join,
            "list" => PacketKind::List,
            "msg" => PacketKind::Msg,
            "disconnect" => PacketKind::Disconnect,
            "error" => PacketKind::Error,
            "forward_message" => PacketKind::ForwardMessage,
            "response_users_list" => PacketKind::ResponseUsersList,
            other => PacketKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One application frame, minus its checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: PacketKind, seq: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            seq,
            payload: payload.into(),
        }
    }

    /// Serialise this packet, computing its checksum.
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.kind, self.seq, &self.payload)
    }
}

/// Result of splitting a datagram into a [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub packet: Packet,
    /// Checksum as transmitted.
    pub checksum: u32,
    /// Whether the recomputed checksum matches [`Decoded::checksum`].
    pub checksum_valid: bool,
}

impl Decoded {
    /// The packet, if it survived transit intact.
    pub fn into_valid(self) -> Option<Packet> {
        self.checksum_valid.then_some(self.packet)
    }
}

/// A datagram that cannot be split into header fields.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame type field is empty")]
    EmptyType,
    #[error("frame type field is not valid UTF-8")]
    InvalidType,
    #[error("frame ends after {0} of 3 header fields")]
    MissingFields(usize),
    #[error("sequence number is not a decimal u32")]
    InvalidSequence,
    #[error("checksum field is not a decimal u32")]
    InvalidChecksum,
}

/// Serialise a frame into a newly allocated buffer.
///
/// The separator after the checksum is always written, so an empty payload
/// leaves a trailing space.
pub fn encode(kind: &PacketKind, seq: u32, payload: &[u8]) -> Vec<u8> {
    let header = format!("{kind} {seq} ");
    let checksum = checksum(header.as_bytes(), payload).to_string();

    let mut buf = Vec::with_capacity(header.len() + checksum.len() + 1 + payload.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(checksum.as_bytes());
    buf.push(SEPARATOR);
    buf.extend_from_slice(payload);
    buf
}

/// Parse a datagram into its fields and verify the checksum.
///
/// A frame that stops right after the checksum field is accepted with an
/// empty payload.
pub fn decode(bytes: &[u8]) -> Result<Decoded, FrameError> {
    let mut fields = bytes.splitn(4, |&b| b == SEPARATOR);

    let kind_raw = fields
        .next()
        .filter(|field| !field.is_empty())
        .ok_or(FrameError::EmptyType)?;
    let seq_raw = fields.next().ok_or(FrameError::MissingFields(1))?;
    let checksum_raw = fields.next().ok_or(FrameError::MissingFields(2))?;
    let payload = fields.next().unwrap_or_default();

    let kind = std::str::from_utf8(kind_raw).map_err(|_| FrameError::InvalidType)?;
    let seq = parse_decimal(seq_raw).ok_or(FrameError::InvalidSequence)?;
    let transmitted = parse_decimal(checksum_raw).ok_or(FrameError::InvalidChecksum)?;

    // Covers "<type> <seq> " exactly as received.
    let header = &bytes[..kind_raw.len() + seq_raw.len() + 2];
    let checksum_valid = checksum(header, payload) == transmitted;

    Ok(Decoded {
        packet: Packet {
            kind: PacketKind::from_token(kind),
            seq,
            payload: payload.to_vec(),
        },
        checksum: transmitted,
        checksum_valid,
    })
}

fn checksum(header: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    hasher.finalize()
}

fn parse_decimal(raw: &[u8]) -> Option<u32> {
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(raw).ok()?.parse().ok()
}
