//! Per-connection request handling.
//!
//! A [`ConnectionHandler`] owns one accepted stream and answers requests
//! strictly in arrival order until the peer disconnects:
//!
//! ```text
//! Open ──line──▶ Dispatching ──reply──▶ Open
//!   │                 │
//!   │ EOF             │ DISCONNECT / BYE
//!   ▼                 ▼
//! Closed ◀───────── Closing
//! ```
//!
//! Malformed or unknown lines are answered with an `ERROR` line and the
//! connection stays open. I/O failures end the connection.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;

use crate::catalog::{CatalogEntry, FileCatalog};
use crate::error::{Error, Result};
use crate::file;
use crate::protocol::{self, Message, ServerInfo, BYE_MESSAGE, STATUS_RUNNING};

/// Error reason: name is not in the catalog.
pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
/// Error reason: catalog entry points at a missing file.
pub const FILE_NOT_ON_DISK: &str = "FILE_NOT_ON_DISK";
/// Error reason: the file exists but could not be opened or read.
pub const SEND_FAILED: &str = "SEND_FAILED";
/// Error reason: a collaborator failed while handling the request.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Error reason: request line exceeded the maximum length.
pub const LINE_TOO_LONG: &str = "LINE_TOO_LONG";

/// Shared, read-only inputs for every connection of one listener.
pub struct HandlerContext {
    /// Where requested names are resolved
    pub catalog: Arc<dyn FileCatalog>,
    /// Folder listed by `LIST_FILES` and counted by `GET_INFO`
    pub shared_dir: PathBuf,
    /// Port reported by `GET_INFO`
    pub port: u16,
    /// Close connections idle for longer than this
    pub idle_timeout: Option<Duration>,
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("shared_dir", &self.shared_dir)
            .field("port", &self.port)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Waiting for the next request line
    Open,
    /// Answering a request
    Dispatching,
    /// Peer asked to disconnect; the goodbye is being sent
    Closing,
    /// Stream released
    Closed,
}

/// Whether the connection continues after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Serves the requests of one connection.
pub struct ConnectionHandler<S> {
    stream: BufReader<S>,
    ctx: Arc<HandlerContext>,
    peer: String,
    state: HandlerState,
    requests: u64,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted stream.
    pub fn new(stream: S, ctx: Arc<HandlerContext>, peer: impl fmt::Display) -> Self {
        Self {
            stream: BufReader::new(stream),
            ctx,
            peer: peer.to_string(),
            state: HandlerState::Open,
            requests: 0,
            shutdown: None,
        }
    }

    /// Close the connection when `shutdown` turns true while waiting for a
    /// request. A request already being answered is finished first.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Current state.
    pub const fn state(&self) -> HandlerState {
        self.state
    }

    /// Number of request lines answered so far.
    pub const fn requests_handled(&self) -> u64 {
        self.requests
    }

    /// Serve requests until the peer disconnects or the stream fails.
    ///
    /// The stream is shut down on every exit path.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing the stream fails, or if a file
    /// yields fewer bytes than were announced.
    pub async fn run(&mut self) -> Result<()> {
        tracing::debug!("Serving connection from {}", self.peer);
        let result = self.serve().await;

        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Shutdown of {} failed: {}", self.peer, e);
        }
        self.state = HandlerState::Closed;

        tracing::debug!(
            "Connection from {} closed after {} requests",
            self.peer,
            self.requests
        );
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            self.state = HandlerState::Open;

            let line = match self.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(Error::Timeout(secs)) => {
                    tracing::info!("Closing idle connection from {} after {}s", self.peer, secs);
                    return Ok(());
                }
                Err(Error::LineTooLong(max)) => {
                    tracing::warn!("Request line from {} exceeds {} bytes", self.peer, max);
                    self.reply(&Message::error(LINE_TOO_LONG)).await?;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            self.state = HandlerState::Dispatching;
            self.requests += 1;

            let flow = match Message::decode_request(&line) {
                Ok(message) => self.dispatch(message).await?,
                Err(e) => {
                    tracing::debug!("Rejected line from {}: {}", self.peer, e);
                    self.reply(&e.reply()).await?;
                    Flow::Continue
                }
            };

            if flow == Flow::Close {
                return Ok(());
            }
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        let stream = &mut self.stream;
        let idle_timeout = self.ctx.idle_timeout;
        let read = async move {
            match idle_timeout {
                Some(duration) => protocol::read_line_with_timeout(stream, duration).await,
                None => protocol::read_line(stream).await,
            }
        };

        match self.shutdown.as_mut() {
            Some(shutdown) => tokio::select! {
                line = read => line,
                () = stopped(shutdown) => {
                    tracing::debug!("Listener stopping, closing connection from {}", self.peer);
                    Ok(None)
                }
            },
            None => read.await,
        }
    }

    async fn dispatch(&mut self, message: Message) -> Result<Flow> {
        tracing::debug!("{} -> {}", self.peer, message.command());

        match message {
            Message::Ping => self.reply(&Message::Pong).await?,
            Message::Hello { name } => {
                let greeting = format!("Welcome {name}!");
                self.reply(&Message::HelloAck { greeting }).await?;
            }
            Message::GetInfo => {
                let reply = match file::count_shared_files(&self.ctx.shared_dir).await {
                    Ok(files) => Message::Info(ServerInfo {
                        port: self.ctx.port,
                        status: STATUS_RUNNING.to_string(),
                        files,
                    }),
                    Err(e) => {
                        tracing::warn!("Cannot count shared files: {}", e);
                        Message::error(INTERNAL_ERROR)
                    }
                };
                self.reply(&reply).await?;
            }
            Message::ListFiles => {
                let reply = match file::list_shared_files(&self.ctx.shared_dir).await {
                    Ok(names) => Message::Files(names),
                    Err(e) => {
                        tracing::warn!("Cannot list shared files: {}", e);
                        Message::error(INTERNAL_ERROR)
                    }
                };
                self.reply(&reply).await?;
            }
            Message::DownloadRequest { file_name } => {
                self.send_file(&file_name, Announce::FileSize).await?;
            }
            Message::RequestFile { file_name } => {
                self.send_file(&file_name, Announce::FileInfo).await?;
            }
            Message::Disconnect | Message::Bye { .. } => {
                self.state = HandlerState::Closing;
                self.reply(&Message::Bye {
                    message: Some(BYE_MESSAGE.to_string()),
                })
                .await?;
                return Ok(Flow::Close);
            }
            other => {
                let reason = format!("UNKNOWN_COMMAND:{}", other.command());
                self.reply(&Message::error(reason)).await?;
            }
        }

        Ok(Flow::Continue)
    }

    async fn send_file(&mut self, name: &str, announce: Announce) -> Result<()> {
        let entry = match self.ctx.catalog.lookup_by_name(name) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!("{} requested unknown file '{}'", self.peer, name);
                return self.reply(&Message::error(FILE_NOT_FOUND)).await;
            }
            Err(e) => {
                tracing::warn!("Catalog lookup for '{}' failed: {}", name, e);
                return self.reply(&Message::error(INTERNAL_ERROR)).await;
            }
        };

        let (file, len) = match open_entry(&entry).await {
            Ok(opened) => opened,
            Err(reason) => return self.reply(&Message::error(reason)).await,
        };

        let header = match announce {
            Announce::FileSize => Message::FileSize(len),
            Announce::FileInfo => Message::FileInfo {
                file_name: entry.name.clone(),
                size: len,
            },
        };
        self.reply(&header).await?;

        let sent = tokio::io::copy(&mut file.take(len), &mut self.stream).await?;
        self.stream.flush().await?;

        if sent < len {
            tracing::error!(
                "'{}' shrank while sending to {}: {} of {} bytes",
                entry.name,
                self.peer,
                sent,
                len
            );
            return Err(Error::Truncated {
                expected: len,
                received: sent,
            });
        }

        tracing::info!("Sent '{}' ({} bytes) to {}", entry.name, len, self.peer);
        Ok(())
    }

    async fn reply(&mut self, message: &Message) -> Result<()> {
        protocol::write_message(&mut self.stream, message).await
    }
}

/// Resolves once the listener signals shutdown or goes away.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Announce {
    FileSize,
    FileInfo,
}

/// Open a catalog entry's file, mapping failures to wire reasons.
async fn open_entry(entry: &CatalogEntry) -> std::result::Result<(File, u64), &'static str> {
    let file = match File::open(&entry.path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("'{}' is cataloged but missing at {}", entry.name, entry.path.display());
            return Err(FILE_NOT_ON_DISK);
        }
        Err(e) => {
            tracing::warn!("Cannot open {}: {}", entry.path.display(), e);
            return Err(SEND_FAILED);
        }
    };

    match file.metadata().await {
        Ok(metadata) if metadata.is_file() => Ok((file, metadata.len())),
        Ok(_) => {
            tracing::warn!("{} is not a regular file", entry.path.display());
            Err(FILE_NOT_ON_DISK)
        }
        Err(e) => {
            tracing::warn!("Cannot stat {}: {}", entry.path.display(), e);
            Err(SEND_FAILED)
        }
    }
}
