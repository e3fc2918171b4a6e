//! Multi-user chat over UDP with a small framed text protocol.
//!
//! See `README.md` for usage and the wire format. Each module focuses on a
//! concrete responsibility:
//!
//! - [`packet`] frames datagrams and validates their CRC-32 checksum.
//! - [`message`] gives each frame type a typed payload with explicit decoding.
//! - [`registry`] tracks joined users by name and by address.
//! - [`router`] turns one inbound datagram into the packets the server sends.
//! - [`server`] owns the server socket and runs the receive loop.
//! - [`session`] is the client side: requests out, events in on a second task.
//! - [`console`] parses terminal commands and renders server events.
//! - [`client`] drives a session from stdin for a terminal user.
//! - [`cli`] parses the command-line interface for server and client modes.
//!
//! Delivery is best-effort. Corrupt frames are dropped on both sides and
//! nothing is retransmitted.

pub mod cli;
pub mod client;
pub mod console;
pub mod message;
pub mod packet;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
