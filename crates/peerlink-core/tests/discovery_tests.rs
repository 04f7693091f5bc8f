//! Discovery requester and responder over UDP.
//!
//! Requests are aimed at the loopback address so these run without a
//! broadcast-capable network; the real broadcast path is covered by an
//! ignored test.

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use peerlink_core::discovery::{discover_peers, DiscoveryConfig, DiscoveryResponder};
use peerlink_core::PeerAddress;

fn loopback(port: u16, timeout: Duration) -> DiscoveryConfig {
    DiscoveryConfig {
        port,
        broadcast_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        timeout,
    }
}

/// Port with no UDP socket bound to it.
async fn unused_udp_port() -> u16 {
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.local_addr().unwrap().port()
}

/// With no responders, discovery returns an empty list after the full window.
#[tokio::test]
async fn test_no_responders_returns_empty_after_window() {
    let port = unused_udp_port().await;
    let window = Duration::from_secs(3);

    let started = Instant::now();
    let peers = discover_peers(&loopback(port, window)).await.expect("discover");
    let elapsed = started.elapsed();

    assert!(peers.is_empty());
    assert!(elapsed >= window, "returned early after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3500), "took {elapsed:?}");
}

/// One responder announcing port 9001 yields exactly one entry.
#[tokio::test]
async fn test_single_responder() {
    let responder = DiscoveryResponder::bind(0, 9001).await.expect("bind responder");
    let config = loopback(responder.local_addr().port(), Duration::from_millis(500));

    let peers = discover_peers(&config).await.expect("discover");
    responder.stop().await;

    assert_eq!(peers, vec![PeerAddress::new("127.0.0.1", 9001)]);
    assert_eq!(peers[0].to_string(), "127.0.0.1:9001");
}

#[tokio::test]
async fn test_stopped_responder_is_silent() {
    let responder = DiscoveryResponder::bind(0, 9002).await.expect("bind responder");
    let port = responder.local_addr().port();
    responder.stop().await;
    drop(responder);

    let peers = discover_peers(&loopback(port, Duration::from_millis(300)))
        .await
        .expect("discover");
    assert!(peers.is_empty());
}

/// Broadcast on the default discovery port.
#[tokio::test]
#[ignore = "UDP broadcast unreliable in CI environments (especially macOS)"]
async fn test_broadcast_on_default_port() {
    let responder = DiscoveryResponder::bind(peerlink_core::DEFAULT_DISCOVERY_PORT, 9001)
        .await
        .expect("bind responder");

    let config = DiscoveryConfig {
        timeout: Duration::from_secs(1),
        ..DiscoveryConfig::default()
    };
    let peers = discover_peers(&config).await.expect("discover");
    responder.stop().await;

    assert_eq!(peers.iter().filter(|p| p.port == 9001).count(), 1);
}
