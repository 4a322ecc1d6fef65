//! The server's receive loop.
//!
//! One socket, one loop. Each authenticated request resolves to a tunnel
//! port, is persisted, and gets a background task that repeats the response
//! datagram along the retry schedule. The loop itself never sleeps on a
//! response; the task registry keeps at most one sender alive per identity.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use ssh_reverse_mux_protocol as protocol;
use ssh_reverse_mux_store::{ident_key, IdentStore};

use crate::alloc::resolve_port;
use crate::cli::PortRange;
use crate::error::Result;

pub struct MuxServer {
    socket: Arc<UdpSocket>,
    secret: Vec<u8>,
    store: IdentStore,
    range: PortRange,
    ssh_port: u16,
    delays: Vec<Duration>,
    responses: HashMap<Vec<u8>, JoinHandle<()>>,
}

impl MuxServer {
    pub async fn bind(
        addr: SocketAddr,
        secret: Vec<u8>,
        store: IdentStore,
        range: PortRange,
        ssh_port: u16,
        delays: Vec<Duration>,
    ) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!(
            addr = %socket.local_addr()?,
            range = %range,
            "mux server listening"
        );
        Ok(Self {
            socket,
            secret,
            store,
            range,
            ssh_port,
            delays,
            responses: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve requests until `shutdown` resolves, then wait for every
    /// in-flight response task to finish its remaining repeats.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; protocol::MAX_REQUEST_LEN + 1];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => self.handle_datagram(&buf[..len], peer).await,
                    Err(e) => warn!("receive failed: {e}"),
                },
                _ = &mut shutdown => break,
            }
        }

        let pending = self.responses.len();
        if pending > 0 {
            debug!(pending, "waiting for in-flight responses");
        }
        for (_, task) in self.responses.drain() {
            let _ = task.await;
        }
        info!("mux server stopped");
        Ok(())
    }

    async fn handle_datagram(&mut self, data: &[u8], peer: SocketAddr) {
        let Some(ident) = protocol::parse_request(&self.secret, data) else {
            debug!(%peer, len = data.len(), "dropping unauthenticated datagram");
            return;
        };

        if let Some(task) = self.responses.get(&ident) {
            if !task.is_finished() {
                debug!(%peer, "response already in flight, dropping duplicate request");
                return;
            }
            // Join the finished sender before scheduling a fresh one.
            if let Some(task) = self.responses.remove(&ident) {
                let _ = task.await;
            }
        }

        let key = ident_key(&ident);
        let Some((tun_port, fresh)) = resolve_port(&self.store, &self.range, &key) else {
            warn!(%peer, ident = %key, "tunnel port range exhausted, dropping request");
            return;
        };

        if fresh {
            // The binding must be durable before the first response leaves.
            if let Err(e) = self.store.insert(&key, tun_port) {
                error!(ident = %key, "failed to persist assignment: {e}");
                return;
            }
            info!(%peer, ident = %key, tun_port, "assigned tunnel port");
        } else {
            debug!(%peer, ident = %key, tun_port, "reusing stored tunnel port");
        }

        let response = match protocol::build_response(&self.secret, &ident, tun_port, self.ssh_port)
        {
            Ok(response) => response,
            Err(e) => {
                error!(ident = %key, "failed to build response: {e}");
                return;
            }
        };

        let task = tokio::spawn(send_repeats(
            self.socket.clone(),
            response,
            peer,
            self.delays.clone(),
        ));
        self.responses.insert(ident, task);
    }
}

/// Repeat `response` towards `peer`, sleeping each schedule delay before
/// its send. The first delay is zero, so the first copy leaves immediately.
async fn send_repeats(
    socket: Arc<UdpSocket>,
    response: Vec<u8>,
    peer: SocketAddr,
    delays: Vec<Duration>,
) {
    for delay in delays {
        sleep(delay).await;
        if let Err(e) = socket.send_to(&response, peer).await {
            debug!(%peer, "response send failed: {e}");
        }
    }
    debug!(%peer, "response repeats complete");
}
