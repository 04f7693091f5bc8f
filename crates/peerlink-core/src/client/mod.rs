//! Outbound client.
//!
//! [`PeerClient`] holds one connection to a peer listener and performs
//! request/response exchanges on it. Downloads open their own connection;
//! see [`download`](mod@download).

pub mod download;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::peer::PeerAddress;
use crate::protocol::{self, Message, ServerInfo};

pub use download::{download, DownloadReport, Downloader, TransferProgress, TransferSession, TransferState};

/// Open a TCP connection to `peer`, resolving its host first.
///
/// Resolution and connection share one `timeout`.
pub(crate) async fn connect_stream(peer: &PeerAddress, timeout: Duration) -> Result<TcpStream> {
    let target = peer.connect_target();

    match tokio::time::timeout(timeout, resolve_and_connect(peer, &target)).await {
        Ok(result) => result,
        Err(_) => Err(Error::ConnectTimeout {
            addr: target,
            secs: timeout.as_secs(),
        }),
    }
}

async fn resolve_and_connect(peer: &PeerAddress, target: &str) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(target)
        .await
        .map_err(|e| Error::UnknownHost(format!("{}: {}", peer.host, e)))?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::debug!("Connected to {} ({})", peer, addr);
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!("Connecting to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            Err(Error::ConnectionRefused(target.to_string()))
        }
        Some(e) => Err(Error::Io(e)),
        None => Err(Error::UnknownHost(peer.host.clone())),
    }
}

/// Returns true if `peer` answers `PING` within `timeout`.
pub async fn is_reachable(peer: &PeerAddress, timeout: Duration) -> bool {
    let check = async {
        let mut client = PeerClient::connect(peer, timeout).await?;
        let alive = client.ping().await?;
        client.disconnect().await?;
        Ok::<_, Error>(alive)
    };

    match tokio::time::timeout(timeout * 2, check).await {
        Ok(Ok(alive)) => alive,
        Ok(Err(e)) => {
            tracing::debug!("{} is not reachable: {}", peer, e);
            false
        }
        Err(_) => false,
    }
}

/// An open exchange connection to one peer.
#[derive(Debug)]
pub struct PeerClient {
    peer: PeerAddress,
    stream: BufReader<TcpStream>,
}

impl PeerClient {
    /// Connect to a peer listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectTimeout`], [`Error::ConnectionRefused`] or
    /// [`Error::UnknownHost`] when the connection cannot be established.
    pub async fn connect(peer: &PeerAddress, timeout: Duration) -> Result<Self> {
        let stream = connect_stream(peer, timeout).await?;
        Ok(Self {
            peer: peer.clone(),
            stream: BufReader::new(stream),
        })
    }

    /// The peer this client is connected to.
    pub const fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    /// Write one message and read exactly one response line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the peer closes the stream
    /// before answering, or an I/O error.
    pub async fn send(&mut self, message: &Message) -> Result<String> {
        protocol::write_message(&mut self.stream, message).await?;
        protocol::read_line(&mut self.stream)
            .await?
            .ok_or(Error::ConnectionClosed)
    }

    /// Send a message and decode the response, turning `ERROR` replies into
    /// [`Error::Remote`].
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails, the reply cannot be decoded,
    /// or the peer answered with `ERROR`.
    pub async fn request(&mut self, message: &Message) -> Result<Message> {
        let line = self.send(message).await?;
        match Message::decode(&line) {
            Ok(Message::Error { reason }) => Err(Error::Remote { reason }),
            Ok(reply) => Ok(reply),
            Err(e) => Err(Error::Protocol(format!("{e} in reply '{line}'"))),
        }
    }

    /// Liveness check. Returns true if the peer answered `PONG`.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn ping(&mut self) -> Result<bool> {
        let line = self.send(&Message::Ping).await?;
        Ok(matches!(Message::decode(&line), Ok(Message::Pong)))
    }

    /// Introduce ourselves; returns the peer's greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or the reply is not `HELLO_ACK`.
    pub async fn hello(&mut self, name: &str) -> Result<String> {
        match self.request(&Message::Hello { name: name.to_string() }).await? {
            Message::HelloAck { greeting } => Ok(greeting),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the peer for its listener information.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or the reply is not `INFO`.
    pub async fn server_info(&mut self) -> Result<ServerInfo> {
        match self.request(&Message::GetInfo).await? {
            Message::Info(info) => Ok(info),
            other => Err(unexpected(&other)),
        }
    }

    /// List the files in the peer's shared folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or the reply is not `FILES`.
    pub async fn list_files(&mut self) -> Result<Vec<String>> {
        match self.request(&Message::ListFiles).await? {
            Message::Files(names) => Ok(names),
            other => Err(unexpected(&other)),
        }
    }

    /// Say goodbye and close the connection.
    ///
    /// A peer that closes without answering `BYE` is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the request fails.
    pub async fn disconnect(mut self) -> Result<()> {
        protocol::write_message(&mut self.stream, &Message::Disconnect).await?;
        match protocol::read_line(&mut self.stream).await {
            Ok(Some(line)) => tracing::debug!("{} answered disconnect with '{}'", self.peer, line),
            Ok(None) => {}
            Err(e) => tracing::debug!("Reading goodbye from {} failed: {}", self.peer, e),
        }
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}

fn unexpected(message: &Message) -> Error {
    Error::UnexpectedResponse(message.encode().trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn one_shot_server(replies: &'static [&'static str]) -> PeerAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            for reply in replies {
                if protocol::read_line(&mut stream).await.unwrap().is_none() {
                    return;
                }
                protocol::write_line(&mut stream, reply).await.unwrap();
            }
        });

        PeerAddress::from(addr)
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = PeerClient::connect(&PeerAddress::from(addr), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "CONNECTION_REFUSED");
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_unknown_host() {
        let peer = PeerAddress::new("no-such-host.invalid", 8000);
        let err = PeerClient::connect(&peer, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::UnknownHost(_) | Error::ConnectTimeout { .. }),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_exchanges() {
        let peer = one_shot_server(&[
            "PONG",
            "HELLO_ACK:Welcome tester!",
            "INFO:Port=8000,Status=Running,Files=2",
            "FILES:a.txt,b.txt",
        ])
        .await;

        let mut client = PeerClient::connect(&peer, Duration::from_secs(2)).await.unwrap();
        assert!(client.ping().await.unwrap());
        assert_eq!(client.hello("tester").await.unwrap(), "Welcome tester!");

        let info = client.server_info().await.unwrap();
        assert_eq!(info.port, 8000);
        assert_eq!(info.files, 2);

        assert_eq!(client.list_files().await.unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_error_reply_becomes_remote() {
        let peer = one_shot_server(&["ERROR:INTERNAL_ERROR"]).await;
        let mut client = PeerClient::connect(&peer, Duration::from_secs(2)).await.unwrap();

        let err = client.list_files().await.unwrap_err();
        assert_eq!(err.reason(), "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn test_unexpected_reply() {
        let peer = one_shot_server(&["PONG"]).await;
        let mut client = PeerClient::connect(&peer, Duration::from_secs(2)).await.unwrap();

        let err = client.server_info().await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(ref line) if line == "PONG"));
    }

    #[tokio::test]
    async fn test_closed_before_reply() {
        let peer = one_shot_server(&[]).await;
        let mut client = PeerClient::connect(&peer, Duration::from_secs(2)).await.unwrap();

        let err = client.send(&Message::Ping).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed | Error::Io(_)));
    }
}
