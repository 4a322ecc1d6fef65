//! The client side of the mux exchange.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use ssh_reverse_mux_protocol as protocol;

use crate::error::{ClientError, Result};

/// Receive buffer; responses are 85 bytes, anything larger is garbage but
/// must still be drained off the socket.
const RECV_BUF_LEN: usize = 512;

/// Negotiate `(ssh_port, tun_port)` with the server at `server`.
///
/// The request is built once and resent verbatim at each schedule step;
/// the first datagram that authenticates under our own identity wins.
/// Datagrams that fail authentication are ignored without consuming the
/// attempt window. A socket-level error reopens the socket for the next
/// attempt. When the final window closes without a valid response the
/// negotiation has timed out.
pub async fn negotiate(
    server: SocketAddr,
    secret: &[u8],
    ident: &[u8],
    delays: &[Duration],
) -> Result<(u16, u16)> {
    let request = protocol::build_request(secret, ident)?;
    let mut socket = connect(server).await?;
    let mut buf = [0u8; RECV_BUF_LEN];

    for (attempt, &delay) in delays.iter().enumerate() {
        if let Err(e) = socket.send(&request).await {
            warn!(%server, "request send failed: {e}");
            socket = connect(server).await?;
            continue;
        }
        trace!(attempt, ?delay, "request sent");

        let deadline = Instant::now() + delay;
        loop {
            match timeout_at(deadline, socket.recv(&mut buf)).await {
                // Window elapsed; fall through to the next resend.
                Err(_) => break,
                Ok(Ok(len)) => {
                    if let Some(ports) = protocol::parse_response(secret, ident, &buf[..len]) {
                        debug!(
                            ssh_port = ports.0,
                            tun_port = ports.1,
                            "authenticated response received"
                        );
                        return Ok(ports);
                    }
                    trace!(len, "ignoring datagram that failed authentication");
                }
                Ok(Err(e)) => {
                    warn!("receive failed: {e}");
                    socket = connect(server).await?;
                    break;
                }
            }
        }
    }

    Err(ClientError::Timeout)
}

async fn connect(server: SocketAddr) -> Result<UdpSocket> {
    let bind: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(server).await?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";
    const IDENT: &[u8] = b"node-a";

    fn quick_delays() -> Vec<Duration> {
        vec![
            Duration::ZERO,
            Duration::from_millis(50),
            Duration::from_millis(100),
        ]
    }

    #[tokio::test]
    async fn first_valid_response_wins() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let server_addr = server.local_addr().expect("addr");

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, peer) = server.recv_from(&mut buf).await.expect("recv");
            assert!(protocol::parse_request(SECRET, &buf[..len]).is_some());
            let response =
                protocol::build_response(SECRET, IDENT, 22001, 22).expect("build");
            server.send_to(&response, peer).await.expect("send");
        });

        let ports = negotiate(server_addr, SECRET, IDENT, &quick_delays())
            .await
            .expect("negotiate");
        assert_eq!(ports, (22, 22001));
        responder.await.expect("responder");
    }

    #[tokio::test]
    async fn unauthenticated_responses_are_ignored_until_timeout() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let server_addr = server.local_addr().expect("addr");

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = server.recv_from(&mut buf).await.expect("recv");
            // Valid shape, wrong secret: must not terminate the exchange.
            let response =
                protocol::build_response(b"wrong-secret", IDENT, 22001, 22).expect("build");
            server.send_to(&response, peer).await.expect("send");
        });

        let result = negotiate(server_addr, SECRET, IDENT, &quick_delays()).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
        responder.await.expect("responder");
    }

    #[tokio::test]
    async fn response_for_other_identity_is_ignored() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let server_addr = server.local_addr().expect("addr");

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = server.recv_from(&mut buf).await.expect("recv");
            let response =
                protocol::build_response(SECRET, b"node-b", 22001, 22).expect("build");
            server.send_to(&response, peer).await.expect("send");
        });

        let result = negotiate(server_addr, SECRET, IDENT, &quick_delays()).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
        responder.await.expect("responder");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let server_addr = server.local_addr().expect("addr");
        let result = negotiate(server_addr, SECRET, IDENT, &quick_delays()).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
    }

    #[tokio::test]
    async fn late_response_on_retry_succeeds() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let server_addr = server.local_addr().expect("addr");

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            // Ignore the first two requests; answer the third.
            for _ in 0..2 {
                server.recv_from(&mut buf).await.expect("recv");
            }
            let (len, peer) = server.recv_from(&mut buf).await.expect("recv");
            assert!(protocol::parse_request(SECRET, &buf[..len]).is_some());
            let response =
                protocol::build_response(SECRET, IDENT, 22002, 22).expect("build");
            server.send_to(&response, peer).await.expect("send");
        });

        let delays = vec![
            Duration::ZERO,
            Duration::from_millis(50),
            Duration::from_millis(500),
        ];
        let ports = negotiate(server_addr, SECRET, IDENT, &delays)
            .await
            .expect("negotiate");
        assert_eq!(ports, (22, 22002));
        responder.await.expect("responder");
    }
}
