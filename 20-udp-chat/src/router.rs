//! Request dispatch for the chat server.
//!
//! The router owns the [`Registry`] and turns each inbound datagram into zero
//! or more outbound packets. It performs no I/O: the server loop feeds it one
//! datagram at a time and transmits whatever it returns, so every registry
//! mutation happens on a single execution path.
//!
//! Failures never escape a single datagram. Corrupt or unsplittable frames,
//! requests from addresses that never joined and unknown recipients are
//! dropped with a log line; protocol violations get exactly one `error` reply.

use std::collections::HashSet;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::message::{ClientMessage, ErrorCode, MessageError, ServerMessage};
use crate::packet::{self, Packet};
use crate::registry::{JoinError, Joined, Registry};

/// A packet the server should send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: SocketAddr,
    pub packet: Packet,
}

#[derive(Debug, Default)]
pub struct Router {
    registry: Registry,
    next_seq: u32,
}

impl Router {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            next_seq: 0,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decodes, validates and dispatches one datagram received from `from`.
    pub fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> Vec<Outbound> {
        let decoded = match packet::decode(bytes) {
            Ok(decoded) => decoded,
            Err(error) => {
                debug!(peer = %from, %error, "dropping malformed frame");
                return Vec::new();
            }
        };

        let seq = decoded.packet.seq;
        match decoded.into_valid() {
            Some(packet) => self.handle_packet(&packet, from),
            None => {
                debug!(peer = %from, seq, "dropping frame with invalid checksum");
                Vec::new()
            }
        }
    }

    /// Dispatches a packet whose checksum has already been verified.
    pub fn handle_packet(&mut self, packet: &Packet, from: SocketAddr) -> Vec<Outbound> {
        match ClientMessage::from_packet(packet) {
            Ok(message) => self.dispatch(message, from),
            Err(MessageError::UnexpectedKind(kind)) => {
                warn!(peer = %from, %kind, "unknown message type");
                vec![self.reply(from, ServerMessage::error(ErrorCode::UnknownMessage))]
            }
            Err(error) => {
                warn!(peer = %from, kind = %packet.kind, %error, "malformed request");
                let reply = ServerMessage::Error {
                    code: Some(ErrorCode::MalformedMessage),
                    reason: error.to_string(),
                };
                vec![self.reply(from, reply)]
            }
        }
    }

    fn dispatch(&mut self, message: ClientMessage, from: SocketAddr) -> Vec<Outbound> {
        match message {
            ClientMessage::Join { username } => self.handle_join(&username, from),
            ClientMessage::ListRequest => self.handle_list(from),
            ClientMessage::SendMessage { recipients, text } => {
                self.handle_send(&recipients, &text, from)
            }
            ClientMessage::Disconnect { username } => {
                self.handle_disconnect(&username, from);
                Vec::new()
            }
        }
    }

    fn handle_join(&mut self, username: &str, from: SocketAddr) -> Vec<Outbound> {
        let error = match self.registry.try_join(username, from) {
            Ok(Joined::New) => {
                info!(peer = %from, username, "user joined");
                return Vec::new();
            }
            Ok(Joined::Existing) => {
                debug!(peer = %from, username, "repeated join ignored");
                return Vec::new();
            }
            Err(error) => error,
        };

        warn!(peer = %from, username, %error, "join rejected");
        let code = match error {
            JoinError::ServerFull { .. } => ErrorCode::ServerFull,
            JoinError::UsernameTaken(_) => ErrorCode::UsernameUnavailable,
            JoinError::AddressInUse { .. } => ErrorCode::AddressInUse,
        };
        let reply = ServerMessage::Error {
            code: Some(code),
            reason: error.to_string(),
        };
        vec![self.reply(from, reply)]
    }

    fn handle_list(&mut self, from: SocketAddr) -> Vec<Outbound> {
        if self.registry.lookup_by_address(from).is_none() {
            debug!(peer = %from, "list request from unjoined address");
            return Vec::new();
        }

        let usernames = self.registry.list_usernames();
        vec![self.reply(from, ServerMessage::UserList { usernames })]
    }

    fn handle_send(
        &mut self,
        recipients: &[String],
        text: &str,
        from: SocketAddr,
    ) -> Vec<Outbound> {
        let Some(sender) = self.registry.lookup_by_address(from) else {
            debug!(peer = %from, "message from unjoined address");
            return Vec::new();
        };
        let sender = sender.username.clone();

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if !seen.insert(recipient.as_str()) {
                continue;
            }
            match self.registry.lookup_by_username(recipient) {
                Some(session) => targets.push(session.addr),
                None => info!(sender = %sender, %recipient, "recipient not found"),
            }
        }

        debug!(sender = %sender, recipients = targets.len(), "forwarding message");
        let forward = ServerMessage::Forward {
            sender,
            text: text.to_string(),
        };
        targets
            .into_iter()
            .map(|to| self.reply(to, forward.clone()))
            .collect()
    }

    fn handle_disconnect(&mut self, username: &str, from: SocketAddr) {
        match self.registry.remove(username) {
            Some(session) if session.addr != from => {
                warn!(
                    peer = %from,
                    username,
                    owner = %session.addr,
                    "user disconnected by another address"
                );
            }
            Some(_) => info!(peer = %from, username, "user left"),
            None => debug!(peer = %from, username, "disconnect for unknown user"),
        }
    }

    fn reply(&mut self, to: SocketAddr, message: ServerMessage) -> Outbound {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        Outbound {
            to,
            packet: message.to_packet(seq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn send(router: &mut Router, from: SocketAddr, message: ClientMessage) -> Vec<Outbound> {
        router.handle_datagram(&message.to_packet(0).encode(), from)
    }

    fn join(router: &mut Router, username: &str, from: SocketAddr) {
        let replies = send(
            router,
            from,
            ClientMessage::Join {
                username: username.into(),
            },
        );
        assert!(replies.is_empty(), "join of {username} was rejected: {replies:?}");
    }

    fn server_message(outbound: &Outbound) -> ServerMessage {
        ServerMessage::from_packet(&outbound.packet).expect("router emits valid messages")
    }

    fn error_code(outbound: &Outbound) -> Option<ErrorCode> {
        match server_message(outbound) {
            ServerMessage::Error { code, .. } => code,
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[test]
    fn message_is_forwarded_only_to_joined_recipients() {
        let mut router = Router::default();
        join(&mut router, "alice", addr(1));
        join(&mut router, "bob", addr(2));

        let replies = send(
            &mut router,
            addr(1),
            ClientMessage::SendMessage {
                recipients: vec!["bob".into(), "carol".into()],
                text: "hi there".into(),
            },
        );

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].to, addr(2));
        assert_eq!(replies[0].packet.kind, PacketKind::ForwardMessage);
        assert_eq!(replies[0].packet.payload, b"alice hi there");
    }

    #[test]
    fn recipient_named_twice_gets_one_copy() {
        let mut router = Router::default();
        join(&mut router, "alice", addr(1));
        join(&mut router, "bob", addr(2));

        let replies = send(
            &mut router,
            addr(1),
            ClientMessage::SendMessage {
                recipients: vec!["bob".into(), "bob".into()],
                text: "once".into(),
            },
        );
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn sender_can_message_itself() {
        let mut router = Router::default();
        join(&mut router, "alice", addr(1));

        let replies = send(
            &mut router,
            addr(1),
            ClientMessage::SendMessage {
                recipients: vec!["alice".into()],
                text: "note to self".into(),
            },
        );
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].to, addr(1));
    }

    #[test]
    fn list_is_sorted() {
        let mut router = Router::default();
        join(&mut router, "carol", addr(1));
        join(&mut router, "alice", addr(2));
        join(&mut router, "bob", addr(3));

        let replies = send(&mut router, addr(1), ClientMessage::ListRequest);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].to, addr(1));
        assert_eq!(replies[0].packet.kind, PacketKind::ResponseUsersList);
        assert_eq!(replies[0].packet.payload, b"3 alice bob carol");
    }

    #[test]
    fn requests_from_unjoined_addresses_are_dropped() {
        let mut router = Router::default();
        join(&mut router, "bob", addr(2));

        assert!(send(&mut router, addr(9), ClientMessage::ListRequest).is_empty());
        let replies = send(
            &mut router,
            addr(9),
            ClientMessage::SendMessage {
                recipients: vec!["bob".into()],
                text: "spoof".into(),
            },
        );
        assert!(replies.is_empty());
    }

    #[test]
    fn join_rejections_reply_with_error() {
        let mut router = Router::new(Registry::with_capacity(2));
        join(&mut router, "alice", addr(1));

        let duplicate = send(
            &mut router,
            addr(2),
            ClientMessage::Join {
                username: "alice".into(),
            },
        );
        assert_eq!(duplicate.len(), 1);
        assert_eq!(duplicate[0].to, addr(2));
        assert_eq!(error_code(&duplicate[0]), Some(ErrorCode::UsernameUnavailable));

        join(&mut router, "bob", addr(3));
        let full = send(
            &mut router,
            addr(4),
            ClientMessage::Join {
                username: "carol".into(),
            },
        );
        assert_eq!(full.len(), 1);
        assert_eq!(error_code(&full[0]), Some(ErrorCode::ServerFull));
        assert_eq!(router.registry().len(), 2);
    }

    #[test]
    fn rejected_joiner_receives_no_forwards() {
        let mut router = Router::new(Registry::with_capacity(1));
        join(&mut router, "alice", addr(1));
        let replies = send(
            &mut router,
            addr(2),
            ClientMessage::Join {
                username: "bob".into(),
            },
        );
        assert_eq!(error_code(&replies[0]), Some(ErrorCode::ServerFull));

        let replies = send(
            &mut router,
            addr(1),
            ClientMessage::SendMessage {
                recipients: vec!["bob".into()],
                text: "hello?".into(),
            },
        );
        assert!(replies.is_empty());
    }

    #[test]
    fn disconnect_of_unknown_user_is_a_no_op() {
        let mut router = Router::default();
        join(&mut router, "alice", addr(1));

        let replies = send(
            &mut router,
            addr(1),
            ClientMessage::Disconnect {
                username: "ghost".into(),
            },
        );
        assert!(replies.is_empty());
        assert_eq!(router.registry().list_usernames(), vec!["alice"]);
    }

    #[test]
    fn disconnect_frees_name_and_address() {
        let mut router = Router::default();
        join(&mut router, "alice", addr(1));

        for _ in 0..2 {
            let replies = send(
                &mut router,
                addr(1),
                ClientMessage::Disconnect {
                    username: "alice".into(),
                },
            );
            assert!(replies.is_empty());
        }
        assert!(router.registry().is_empty());
        assert!(send(&mut router, addr(1), ClientMessage::ListRequest).is_empty());
        join(&mut router, "alice", addr(5));
    }

    #[test]
    fn tampered_checksum_has_no_effect() {
        let mut router = Router::default();
        let decoded = packet::decode(
            &ClientMessage::Join {
                username: "alice".into(),
            }
            .to_packet(0)
            .encode(),
        )
        .expect("well-formed frame");
        let forged = format!("join 0 {} alice", decoded.checksum ^ 0xdead_beef);

        let replies = router.handle_datagram(forged.as_bytes(), addr(1));
        assert!(replies.is_empty());
        assert!(router.registry().is_empty());
    }

    #[test]
    fn malformed_frames_are_dropped_silently() {
        let mut router = Router::default();
        assert!(router.handle_datagram(b"", addr(1)).is_empty());
        assert!(router.handle_datagram(b"join", addr(1)).is_empty());
        assert!(router.handle_datagram(b"join x y alice", addr(1)).is_empty());
        assert!(router.registry().is_empty());
    }

    #[test]
    fn unknown_type_gets_error_reply() {
        let mut router = Router::default();
        let bytes = packet::encode(&PacketKind::Unknown("shout".into()), 0, b"hey");

        let replies = router.handle_datagram(&bytes, addr(1));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].to, addr(1));
        assert_eq!(
            server_message(&replies[0]),
            ServerMessage::error(ErrorCode::UnknownMessage)
        );
    }

    #[test]
    fn server_originated_type_is_treated_as_unknown() {
        let mut router = Router::default();
        let bytes = packet::encode(&PacketKind::ForwardMessage, 0, b"alice hi");
        let replies = router.handle_datagram(&bytes, addr(1));
        assert_eq!(error_code(&replies[0]), Some(ErrorCode::UnknownMessage));
    }

    #[test]
    fn malformed_payload_gets_error_reply() {
        let mut router = Router::default();
        join(&mut router, "alice", addr(1));

        let bytes = packet::encode(&PacketKind::Msg, 0, b"3 bob hi");
        let replies = router.handle_datagram(&bytes, addr(1));
        assert_eq!(replies.len(), 1);
        assert_eq!(error_code(&replies[0]), Some(ErrorCode::MalformedMessage));
    }

    #[test]
    fn reply_sequence_numbers_increase() {
        let mut router = Router::default();
        join(&mut router, "alice", addr(1));

        let first = send(&mut router, addr(1), ClientMessage::ListRequest);
        let second = send(&mut router, addr(1), ClientMessage::ListRequest);
        assert_eq!(second[0].packet.seq, first[0].packet.seq + 1);
    }
}
