use std::str;

use thiserror::Error;

use crate::packet::{Packet, PacketKind};

/// Requests a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Join { username: String },
    ListRequest,
    SendMessage { recipients: Vec<String>, text: String },
    Disconnect { username: String },
}

/// Traffic the server sends to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    UserList { usernames: Vec<String> },
    Forward { sender: String, text: String },
    Error { code: Option<ErrorCode>, reason: String },
}

/// Machine-readable prefix of an `error` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ServerFull,
    UsernameUnavailable,
    AddressInUse,
    UnknownMessage,
    MalformedMessage,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ServerFull => "err_server_full",
            ErrorCode::UsernameUnavailable => "err_username_unavailable",
            ErrorCode::AddressInUse => "err_address_in_use",
            ErrorCode::UnknownMessage => "err_unknown_message",
            ErrorCode::MalformedMessage => "err_malformed_message",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "err_server_full" => Some(ErrorCode::ServerFull),
            "err_username_unavailable" => Some(ErrorCode::UsernameUnavailable),
            "err_address_in_use" => Some(ErrorCode::AddressInUse),
            "err_unknown_message" => Some(ErrorCode::UnknownMessage),
            "err_malformed_message" => Some(ErrorCode::MalformedMessage),
            _ => None,
        }
    }

    /// Short text shown to the user.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::ServerFull => "server full",
            ErrorCode::UsernameUnavailable => "username not available",
            ErrorCode::AddressInUse => "address already joined under another username",
            ErrorCode::UnknownMessage => "unknown message type",
            ErrorCode::MalformedMessage => "server could not parse the request",
        }
    }

    /// Errors after which the server will never route traffic to this client.
    pub fn is_session_fatal(self) -> bool {
        matches!(self, ErrorCode::ServerFull | ErrorCode::UsernameUnavailable)
    }
}

/// A checksum-valid packet whose payload does not fit its variant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("unexpected message type '{0}'")]
    UnexpectedKind(String),
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("invalid user count '{0}'")]
    InvalidCount(String),
    #[error("expected {expected} usernames, found {found}")]
    CountMismatch { expected: usize, found: usize },
    #[error("invalid username '{0}'")]
    InvalidUsername(String),
}

/// Usernames are single non-empty words.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

impl ClientMessage {
    pub fn kind(&self) -> PacketKind {
        match self {
            ClientMessage::Join { .. } => PacketKind::Join,
            ClientMessage::ListRequest => PacketKind::List,
            ClientMessage::SendMessage { .. } => PacketKind::Msg,
            ClientMessage::Disconnect { .. } => PacketKind::Disconnect,
        }
    }

    pub fn to_packet(&self, seq: u32) -> Packet {
        let payload = match self {
            ClientMessage::Join { username } | ClientMessage::Disconnect { username } => {
                username.clone()
            }
            ClientMessage::ListRequest => String::new(),
            ClientMessage::SendMessage { recipients, text } => {
                let mut fields = Vec::with_capacity(recipients.len() + 2);
                fields.push(recipients.len().to_string());
                fields.extend(recipients.iter().cloned());
                fields.push(text.clone());
                fields.join(" ")
            }
        };
        Packet::new(self.kind(), seq, payload)
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, MessageError> {
        match packet.kind {
            PacketKind::Join => Ok(ClientMessage::Join {
                username: parse_username(payload_str(packet)?)?,
            }),
            PacketKind::List => Ok(ClientMessage::ListRequest),
            PacketKind::Msg => {
                let (recipients, text) = parse_counted_names(payload_str(packet)?)?;
                Ok(ClientMessage::SendMessage {
                    recipients,
                    text: text.to_string(),
                })
            }
            PacketKind::Disconnect => Ok(ClientMessage::Disconnect {
                username: parse_username(payload_str(packet)?)?,
            }),
            ref other => Err(MessageError::UnexpectedKind(other.to_string())),
        }
    }
}

impl ServerMessage {
    /// Error reply carrying the code's stock description.
    pub fn error(code: ErrorCode) -> Self {
        ServerMessage::Error {
            code: Some(code),
            reason: code.description().to_string(),
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            ServerMessage::UserList { .. } => PacketKind::ResponseUsersList,
            ServerMessage::Forward { .. } => PacketKind::ForwardMessage,
            ServerMessage::Error { .. } => PacketKind::Error,
        }
    }

    pub fn to_packet(&self, seq: u32) -> Packet {
        let payload = match self {
            ServerMessage::UserList { usernames } => {
                let mut fields = Vec::with_capacity(usernames.len() + 1);
                fields.push(usernames.len().to_string());
                fields.extend(usernames.iter().cloned());
                fields.join(" ")
            }
            ServerMessage::Forward { sender, text } => format!("{sender} {text}"),
            ServerMessage::Error {
                code: Some(code),
                reason,
            } => format!("{} {reason}", code.as_str()),
            ServerMessage::Error { code: None, reason } => reason.clone(),
        };
        Packet::new(self.kind(), seq, payload)
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, MessageError> {
        match packet.kind {
            PacketKind::ResponseUsersList => {
                let (usernames, _) = parse_counted_names(payload_str(packet)?)?;
                Ok(ServerMessage::UserList { usernames })
            }
            PacketKind::ForwardMessage => {
                let (sender, text) = split_field(payload_str(packet)?);
                Ok(ServerMessage::Forward {
                    sender: parse_username(sender)?,
                    text: text.to_string(),
                })
            }
            PacketKind::Error => {
                let payload = payload_str(packet)?;
                let (token, rest) = split_field(payload);
                Ok(match ErrorCode::from_token(token) {
                    Some(code) => ServerMessage::Error {
                        code: Some(code),
                        reason: rest.to_string(),
                    },
                    None => ServerMessage::Error {
                        code: None,
                        reason: payload.to_string(),
                    },
                })
            }
            ref other => Err(MessageError::UnexpectedKind(other.to_string())),
        }
    }
}

fn payload_str(packet: &Packet) -> Result<&str, MessageError> {
    str::from_utf8(&packet.payload).map_err(|_| MessageError::InvalidUtf8)
}

/// Splits off the first space-delimited field; the remainder is kept verbatim.
fn split_field(input: &str) -> (&str, &str) {
    input.split_once(' ').unwrap_or((input, ""))
}

fn parse_username(raw: &str) -> Result<String, MessageError> {
    if raw.is_empty() {
        return Err(MessageError::MissingField("username"));
    }
    if !is_valid_username(raw) {
        return Err(MessageError::InvalidUsername(raw.to_string()));
    }
    Ok(raw.to_string())
}

/// Parses `<count> <name1> ... <nameN> <rest>`.
fn parse_counted_names(payload: &str) -> Result<(Vec<String>, &str), MessageError> {
    let (count_raw, mut rest) = split_field(payload);
    if count_raw.is_empty() {
        return Err(MessageError::MissingField("user count"));
    }
    let expected: usize = count_raw
        .parse()
        .map_err(|_| MessageError::InvalidCount(count_raw.to_string()))?;

    // The count comes off the wire; grow as names are actually found.
    let mut names = Vec::new();
    for found in 0..expected {
        let (name, tail) = split_field(rest);
        if name.is_empty() {
            return Err(MessageError::CountMismatch { expected, found });
        }
        names.push(parse_username(name)?);
        rest = tail;
    }

    Ok((names, rest))
}
