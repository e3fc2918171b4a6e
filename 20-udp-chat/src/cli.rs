use clap::{Args, Parser, Subcommand};

use crate::registry::DEFAULT_CAPACITY;

pub const DEFAULT_PORT: u16 = 15000;
pub const DEFAULT_WINDOW: u32 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server on a UDP socket.
    Server(ServerArgs),
    /// Join a chat server and chat from this terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// The server port. Use 0 for an ephemeral port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The address to bind to.
    #[arg(short, long, default_value = "0.0.0.0")]
    pub address: String,

    /// The window size. Accepted but unused: delivery is best-effort.
    #[arg(short, long, default_value_t = DEFAULT_WINDOW)]
    pub window: u32,

    /// Maximum number of users joined at once.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub max_clients: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// The username of the client.
    #[arg(short, long)]
    pub user: String,

    /// The server port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The server ip or hostname.
    #[arg(short, long, default_value = "localhost")]
    pub address: String,

    /// The window size. Accepted but unused: delivery is best-effort.
    #[arg(short, long, default_value_t = DEFAULT_WINDOW)]
    pub window: u32,
}
