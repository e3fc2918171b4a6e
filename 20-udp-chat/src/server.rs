use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{net::UdpSocket, select};
use tracing::{info, warn};

use crate::{
    packet::MAX_DATAGRAM_SIZE,
    registry::Registry,
    router::{Outbound, Router},
};

pub struct Server {
    socket: UdpSocket,
    router: Router,
}

impl Server {
    /// Serves on an already bound socket, admitting at most `capacity` users.
    pub fn new(socket: UdpSocket, capacity: usize) -> Self {
        Self {
            socket,
            router: Router::new(Registry::with_capacity(capacity)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handles datagrams one at a time until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { socket, mut router } = self;
        tokio::pin!(shutdown);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received = select! {
                _ = &mut shutdown => {
                    handle_shutdown(&router);
                    break;
                }
                received = socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, peer)) => {
                    let outbound = router.handle_datagram(&buf[..len], peer);
                    send_all(&socket, outbound).await;
                }
                // Typically an ICMP error surfaced by a previous send.
                Err(err) => warn!(error = ?err, "failed to receive datagram"),
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_shutdown(router: &Router) {
    info!(sessions = router.registry().len(), "server shutting down");
}

async fn send_all(socket: &UdpSocket, outbound: Vec<Outbound>) {
    for Outbound { to, packet } in outbound {
        if let Err(err) = socket.send_to(&packet.encode(), to).await {
            warn!(peer = %to, kind = %packet.kind, error = ?err, "failed to send packet");
        }
    }
}
