//! LAN peer discovery over UDP broadcast.
//!
//! ## Protocol
//!
//! - Port: 8888 (UDP)
//! - Request: the datagram `DISCOVER`, sent to the broadcast address
//! - Reply: `PEER:<listening port>`, sent back to the requester
//!
//! A requester collects replies for a fixed window and builds a peer address
//! from each reply's source IP and announced port. Replies carry no identity,
//! so a peer with several interfaces may appear more than once.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};

use crate::error::{Error, Result};
use crate::peer::PeerAddress;

/// Discovery request payload.
pub const DISCOVER_REQUEST: &str = "DISCOVER";

/// Prefix of a discovery reply.
pub const PEER_REPLY_PREFIX: &str = "PEER:";

/// Largest datagram either side reads.
const MAX_DATAGRAM: usize = 1024;

/// Requester settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Port responders listen on
    pub port: u16,
    /// Where the request is sent
    pub broadcast_address: IpAddr,
    /// How long replies are collected
    pub timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_DISCOVERY_PORT,
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
            timeout: crate::DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

/// Create a UDP socket with address reuse (and broadcast when requested).
fn bind_udp(addr: SocketAddr, broadcast: bool) -> Result<UdpSocket> {
    let bind = || -> std::io::Result<UdpSocket> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;

        if broadcast {
            socket.set_broadcast(true)?;
        }
        socket.set_reuse_address(true)?;

        #[cfg(target_os = "macos")]
        socket.set_reuse_port(true)?;

        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket)
    };

    bind().map_err(|source| Error::BindFailed { addr, source })
}

/// Parse a `PEER:<port>` reply.
pub fn parse_peer_reply(payload: &[u8]) -> Option<u16> {
    std::str::from_utf8(payload)
        .ok()?
        .trim()
        .strip_prefix(PEER_REPLY_PREFIX)?
        .trim()
        .parse()
        .ok()
}

/// Broadcast a discovery request and collect replies for the full window.
///
/// Always waits `config.timeout`, even if no peer answers. Duplicate replies
/// are kept.
///
/// # Errors
///
/// Returns [`Error::BindFailed`] if no socket can be opened, or
/// [`Error::BroadcastFailed`] if the request cannot be sent.
pub async fn discover_peers(config: &DiscoveryConfig) -> Result<Vec<PeerAddress>> {
    let unspecified = match config.broadcast_address {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    };
    let socket = bind_udp(SocketAddr::new(unspecified, 0), true)?;

    let target = SocketAddr::new(config.broadcast_address, config.port);
    socket
        .send_to(DISCOVER_REQUEST.as_bytes(), target)
        .await
        .map_err(|e| Error::BroadcastFailed(format!("{target}: {e}")))?;
    tracing::debug!("Sent discovery request to {}", target);

    let deadline = Instant::now() + config.timeout;
    let mut peers = Vec::new();
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, source))) => match parse_peer_reply(&buf[..len]) {
                Some(port) => {
                    let peer = PeerAddress::new(source.ip().to_string(), port);
                    tracing::debug!("Found peer {}", peer);
                    peers.push(peer);
                }
                None => {
                    tracing::debug!("Ignoring malformed discovery reply from {}", source);
                }
            },
            Ok(Err(e)) => {
                tracing::debug!("Error receiving discovery reply: {}", e);
            }
            Err(_) => break,
        }
    }

    tracing::info!("Discovery found {} peers", peers.len());
    Ok(peers)
}

/// Answers discovery requests on behalf of a running listener.
#[derive(Debug)]
pub struct DiscoveryResponder {
    local_addr: SocketAddr,
    listening_port: u16,
    shutdown_tx: broadcast::Sender<()>,
    is_active: Arc<Mutex<bool>>,
}

impl DiscoveryResponder {
    /// Bind the discovery `port` and reply `PEER:<listening_port>` to every
    /// `DISCOVER` datagram until stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BindFailed`] if the port cannot be bound.
    pub async fn bind(port: u16, listening_port: u16) -> Result<Self> {
        let socket = bind_udp(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port), false)?;
        let local_addr = socket.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let is_active = Arc::new(Mutex::new(true));
        let active = Arc::clone(&is_active);

        tracing::info!(
            "Discovery responder on {} announcing port {}",
            local_addr,
            listening_port
        );

        tokio::spawn(async move {
            let reply = format!("{PEER_REPLY_PREFIX}{listening_port}");
            let mut buf = [0u8; MAX_DATAGRAM];

            loop {
                tokio::select! {
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((len, source)) => {
                            if &buf[..len] != DISCOVER_REQUEST.as_bytes() {
                                tracing::debug!("Ignoring datagram from {}", source);
                                continue;
                            }
                            tracing::debug!("Discovery request from {}", source);
                            if let Err(e) = socket.send_to(reply.as_bytes(), source).await {
                                tracing::warn!("Failed to answer {}: {}", source, e);
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Error receiving UDP packet: {}", e);
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Discovery responder received shutdown signal");
                        break;
                    }
                }
            }

            *active.lock().await = false;
        });

        Ok(Self {
            local_addr,
            listening_port,
            shutdown_tx,
            is_active,
        })
    }

    /// Address the responder is bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Port announced in replies.
    pub const fn listening_port(&self) -> u16 {
        self.listening_port
    }

    /// Stop answering and wait for the responder task to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        while *self.is_active.lock().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Check if the responder is still answering.
    pub async fn is_active(&self) -> bool {
        *self.is_active.lock().await
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config(port: u16, timeout: Duration) -> DiscoveryConfig {
        DiscoveryConfig {
            port,
            broadcast_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout,
        }
    }

    #[test]
    fn test_parse_peer_reply() {
        assert_eq!(parse_peer_reply(b"PEER:8000"), Some(8000));
        assert_eq!(parse_peer_reply(b"PEER: 8001\n"), Some(8001));
        assert_eq!(parse_peer_reply(b"PEER:"), None);
        assert_eq!(parse_peer_reply(b"PEER:99999"), None);
        assert_eq!(parse_peer_reply(b"HELLO:8000"), None);
        assert_eq!(parse_peer_reply(&[0xff, 0xfe]), None);
    }

    #[tokio::test]
    async fn test_responder_start_stop() {
        let responder = DiscoveryResponder::bind(0, 8000).await.expect("bind responder");
        assert!(responder.is_active().await);
        assert_ne!(responder.local_addr().port(), 0);

        responder.stop().await;
        assert!(!responder.is_active().await);
    }

    #[tokio::test]
    async fn test_discovery_loopback() {
        let responder = DiscoveryResponder::bind(0, 9123).await.expect("bind responder");
        let config = loopback_config(responder.local_addr().port(), Duration::from_millis(500));

        let peers = discover_peers(&config).await.expect("discover");
        responder.stop().await;

        assert_eq!(peers, vec![PeerAddress::new("127.0.0.1", 9123)]);
    }

    #[tokio::test]
    async fn test_responder_ignores_other_payloads() {
        let responder = DiscoveryResponder::bind(0, 9124).await.expect("bind responder");
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), responder.local_addr().port());

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(b"discover", target).await.unwrap();
        socket.send_to(b"DISCOVER-ME", target).await.unwrap();

        let mut buf = [0u8; 64];
        let result =
            tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
        assert!(result.is_err(), "responder should not answer");

        socket.send_to(b"DISCOVER", target).await.unwrap();
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("reply")
            .unwrap();
        assert_eq!(&buf[..len], b"PEER:9124");

        responder.stop().await;
    }

    #[tokio::test]
    async fn test_no_responders_waits_full_window() {
        let unused = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = unused.local_addr().unwrap().port();
        drop(unused);

        let window = Duration::from_millis(300);
        let started = Instant::now();
        let peers = discover_peers(&loopback_config(port, window)).await.expect("discover");

        assert!(peers.is_empty());
        assert!(started.elapsed() >= window);
    }

    #[tokio::test]
    #[ignore = "UDP broadcast unreliable in CI environments (especially macOS)"]
    async fn test_discovery_broadcast() {
        let port = 52600 + (std::process::id() % 100) as u16;
        let responder = DiscoveryResponder::bind(port, 9125).await.expect("bind responder");

        let config = DiscoveryConfig {
            port,
            timeout: Duration::from_secs(1),
            ..DiscoveryConfig::default()
        };
        let peers = discover_peers(&config).await.expect("discover");
        responder.stop().await;

        assert!(peers.iter().any(|p| p.port == 9125));
    }
}
