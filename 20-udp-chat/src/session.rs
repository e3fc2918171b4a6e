//! Client half of the chat protocol.
//!
//! A [`ClientSession`] owns the UDP socket. Requests go out from whichever task
//! holds the session, while a spawned receive task decodes server traffic into
//! [`ClientEvent`]s. Both paths share one cancellation signal: the session
//! raises it on [`ClientSession::close`], and the receive task raises it when
//! the server rejects the join, which ends the whole session rather than just
//! the receive path.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use tokio::{
    net::UdpSocket,
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    message::{ClientMessage, ServerMessage, is_valid_username},
    packet::{self, MAX_DATAGRAM_SIZE},
};

/// Server traffic as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    UserList(Vec<String>),
    Message { sender: String, text: String },
    /// Informational error; the session continues.
    Error { reason: String },
    /// The session is over.
    Disconnected { reason: String },
}

impl ClientEvent {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientEvent::Disconnected { .. })
    }
}

impl From<ServerMessage> for ClientEvent {
    fn from(message: ServerMessage) -> Self {
        match message {
            ServerMessage::UserList { usernames } => ClientEvent::UserList(usernames),
            ServerMessage::Forward { sender, text } => ClientEvent::Message { sender, text },
            ServerMessage::Error {
                code: Some(code), ..
            } if code.is_session_fatal() => ClientEvent::Disconnected {
                reason: code.description().to_string(),
            },
            ServerMessage::Error {
                code: Some(code),
                reason,
            } if reason.is_empty() => ClientEvent::Error {
                reason: code.description().to_string(),
            },
            ServerMessage::Error { reason, .. } => ClientEvent::Error { reason },
        }
    }
}

pub struct ClientSession {
    username: String,
    socket: Arc<UdpSocket>,
    next_seq: u32,
    shutdown: Arc<watch::Sender<bool>>,
    receiver: JoinHandle<()>,
}

impl ClientSession {
    /// Binds a local socket connected to `server` and starts the receive task.
    ///
    /// Nothing is sent until [`ClientSession::join`].
    pub async fn connect(
        username: impl Into<String>,
        server: SocketAddr,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let username = username.into();
        if !is_valid_username(&username) {
            bail!("invalid username '{username}': must be a single word");
        }

        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .context("failed to bind client socket")?;
        socket
            .connect(server)
            .await
            .with_context(|| format!("failed to connect to {server}"))?;
        let socket = Arc::new(socket);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            shutdown_rx,
            Arc::clone(&shutdown),
            events_tx,
        ));

        let session = Self {
            username,
            socket,
            next_seq: 0,
            shutdown,
            receiver,
        };
        Ok((session, events_rx))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The shared cancellation signal; it turns `true` once either path has
    /// ended the session.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Announces this user to the server. Acceptance is silent; rejection
    /// arrives later as a [`ClientEvent::Disconnected`].
    pub async fn join(&mut self) -> Result<()> {
        let username = self.username.clone();
        self.send(ClientMessage::Join { username }).await
    }

    pub async fn request_list(&mut self) -> Result<()> {
        self.send(ClientMessage::ListRequest).await
    }

    /// Sends `text` to each of `recipients`. Invalid usernames are rejected
    /// here, before anything reaches the server.
    pub async fn send_message(&mut self, recipients: &[String], text: &str) -> Result<()> {
        if let Some(bad) = recipients.iter().find(|name| !is_valid_username(name)) {
            bail!("invalid recipient '{bad}'");
        }
        self.send(ClientMessage::SendMessage {
            recipients: recipients.to_vec(),
            text: text.to_string(),
        })
        .await
    }

    /// Tells the server this user is leaving, then closes the session.
    pub async fn disconnect(mut self) -> Result<()> {
        let username = self.username.clone();
        let sent = self.send(ClientMessage::Disconnect { username }).await;
        self.close().await;
        sent
    }

    /// Stops the receive task and releases the socket without notifying the
    /// server.
    pub async fn close(mut self) {
        self.shutdown.send_replace(true);
        if let Err(error) = (&mut self.receiver).await {
            warn!(?error, "receive task failed");
        }
        // The receive task has dropped its socket clone; ours goes with `self`.
    }

    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        let bytes = message.to_packet(self.next_seq).encode();
        if bytes.len() > MAX_DATAGRAM_SIZE {
            bail!(
                "{} request is {} bytes, larger than the {MAX_DATAGRAM_SIZE} byte limit",
                message.kind(),
                bytes.len()
            );
        }

        self.next_seq = self.next_seq.wrapping_add(1);
        self.socket
            .send(&bytes)
            .await
            .with_context(|| format!("failed to send {} request", message.kind()))?;
        Ok(())
    }
}

impl Drop for ClientSession {
    /// Stops the receive task of a session that was never closed, which
    /// releases its socket handle and ends the event stream.
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown: Arc<watch::Sender<bool>>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = select! {
            // The signal only ever moves to `true`.
            _ = shutdown_rx.changed() => break,
            received = socket.recv(&mut buf) => received,
        };

        let event = match received {
            Ok(len) => match interpret(&buf[..len]) {
                Some(event) => event,
                None => continue,
            },
            Err(error) if error.kind() == io::ErrorKind::ConnectionRefused => {
                warn!("server unreachable");
                continue;
            }
            Err(error) => ClientEvent::Disconnected {
                reason: format!("receive failed: {error}"),
            },
        };

        let fatal = event.is_fatal();
        if events.send(event).is_err() {
            debug!("event consumer gone");
            break;
        }
        if fatal {
            shutdown.send_replace(true);
            break;
        }
    }
    debug!("receive loop stopped");
}

/// Turns one datagram from the server into an event, dropping anything that
/// is corrupt or not addressed to clients.
fn interpret(bytes: &[u8]) -> Option<ClientEvent> {
    let decoded = match packet::decode(bytes) {
        Ok(decoded) => decoded,
        Err(error) => {
            debug!(%error, "dropping malformed frame");
            return None;
        }
    };
    let Some(packet) = decoded.into_valid() else {
        debug!("dropping frame with invalid checksum");
        return None;
    };

    match ServerMessage::from_packet(&packet) {
        Ok(message) => Some(ClientEvent::from(message)),
        Err(error) => {
            debug!(kind = %packet.kind, %error, "ignoring unexpected server frame");
            None
        }
    }
}
