//! Verified downloads.
//!
//! A download is one request on a fresh connection:
//!
//! 1. send `DOWNLOAD_REQUEST:<name>`
//! 2. read `FILE_SIZE:<n>` (or `FILE_INFO:<name>:<n>`), or fail on `ERROR`
//! 3. look up the expected hash in the local catalog
//! 4. stream exactly `<n>` bytes into `<dest>.part`, hashing as they arrive
//! 5. compare hashes and rename the part file into place
//!
//! Any failure after step 4 starts removes the part file, so a failed
//! download never leaves a file at the destination.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

use crate::catalog::FileCatalog;
use crate::error::{Error, Result};
use crate::hash::to_hex;
use crate::peer::PeerAddress;
use crate::protocol::{self, Message};

/// Receive buffer size.
const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

/// Download state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Opening the connection
    Connecting,
    /// Waiting for the size announcement
    Requesting,
    /// Receiving bytes
    Transferring,
    /// Checking the content hash
    Verifying,
    /// File verified and in place
    Completed,
    /// Download failed
    Failed,
}

/// Progress information for a download.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Requested file name
    pub file_name: String,
    /// Current state
    pub state: TransferState,
    /// Bytes received so far
    pub bytes_transferred: u64,
    /// Announced length, once known
    pub total_bytes: Option<u64>,
    /// When the download started
    pub started_at: Instant,
}

impl TransferProgress {
    fn new(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            state: TransferState::Connecting,
            bytes_transferred: 0,
            total_bytes: None,
            started_at: Instant::now(),
        }
    }

    /// Progress as a percentage (0.0 - 100.0), once the length is known.
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.bytes_transferred as f64 / total as f64) * 100.0
            }
        })
    }
}

/// Bookkeeping for one in-flight download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    /// Requested file name
    pub file_name: String,
    announced_size: Option<u64>,
    bytes_transferred: u64,
    expected_hash: Option<String>,
}

impl TransferSession {
    /// Start a session for `file_name`.
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            announced_size: None,
            bytes_transferred: 0,
            expected_hash: None,
        }
    }

    /// Record the announced byte length. It cannot change once set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if a different length was already announced.
    pub fn announce(&mut self, size: u64) -> Result<()> {
        match self.announced_size {
            Some(existing) if existing != size => Err(Error::Protocol(format!(
                "length of '{}' already announced as {existing}, got {size}",
                self.file_name
            ))),
            _ => {
                self.announced_size = Some(size);
                Ok(())
            }
        }
    }

    /// Record the hash the content must match.
    pub fn expect_hash(&mut self, hash: impl Into<String>) {
        self.expected_hash = Some(hash.into());
    }

    /// Count received bytes.
    pub fn record(&mut self, bytes: u64) {
        self.bytes_transferred += bytes;
    }

    /// Announced length, if any.
    pub const fn announced_size(&self) -> Option<u64> {
        self.announced_size
    }

    /// Bytes received so far.
    pub const fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Bytes still expected.
    pub fn remaining(&self) -> u64 {
        self.announced_size
            .map_or(0, |size| size.saturating_sub(self.bytes_transferred))
    }

    /// Hash the content must match, if known.
    pub fn expected_hash(&self) -> Option<&str> {
        self.expected_hash.as_deref()
    }
}

/// Result of a successful download.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    /// Requested file name
    pub file_name: String,
    /// Peer the file came from
    pub peer: PeerAddress,
    /// Where the verified file was written
    pub path: PathBuf,
    /// Bytes received
    pub bytes: u64,
    /// Verified lowercase hex SHA-256
    pub hash: String,
    /// Time from connect to verified file
    pub elapsed: Duration,
    /// When the download finished
    pub completed_at: DateTime<Utc>,
}

/// Downloads files and publishes progress.
#[derive(Debug)]
pub struct Downloader {
    connect_timeout: Duration,
    progress_tx: watch::Sender<TransferProgress>,
    progress_rx: watch::Receiver<TransferProgress>,
}

impl Downloader {
    /// Create a downloader using `connect_timeout` for each connection.
    pub fn new(connect_timeout: Duration) -> Self {
        let (progress_tx, progress_rx) = watch::channel(TransferProgress::new(""));
        Self {
            connect_timeout,
            progress_tx,
            progress_rx,
        }
    }

    /// Get a progress receiver.
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress_rx.clone()
    }

    /// Download `file_name` from `peer` into `dest_path`, verifying it
    /// against the hash recorded in `catalog`.
    ///
    /// # Errors
    ///
    /// - connection failures ([`Error::ConnectTimeout`], [`Error::ConnectionRefused`], [`Error::UnknownHost`])
    /// - [`Error::Remote`] when the peer answers `ERROR` (e.g. `FILE_NOT_FOUND`)
    /// - [`Error::NotInCatalog`] when there is no local hash to verify against
    /// - [`Error::Truncated`] when the stream ends early
    /// - [`Error::HashMismatch`] when the content does not match the catalog
    pub async fn download(
        &self,
        peer: &PeerAddress,
        file_name: &str,
        dest_path: &Path,
        catalog: &dyn FileCatalog,
    ) -> Result<DownloadReport> {
        self.progress_tx.send_replace(TransferProgress::new(file_name));

        let result = self.run(peer, file_name, dest_path, catalog).await;

        match &result {
            Ok(report) => {
                self.set_state(TransferState::Completed);
                tracing::info!(
                    "Downloaded '{}' from {} ({} bytes in {:.1}s)",
                    report.file_name,
                    report.peer,
                    report.bytes,
                    report.elapsed.as_secs_f64()
                );
            }
            Err(e) => {
                self.set_state(TransferState::Failed);
                tracing::warn!("Download of '{}' from {} failed: {}", file_name, peer, e);
            }
        }

        result
    }

    async fn run(
        &self,
        peer: &PeerAddress,
        file_name: &str,
        dest_path: &Path,
        catalog: &dyn FileCatalog,
    ) -> Result<DownloadReport> {
        let started = Instant::now();
        let mut session = TransferSession::new(file_name);

        let stream = super::connect_stream(peer, self.connect_timeout).await?;
        let mut stream = BufReader::new(stream);

        self.set_state(TransferState::Requesting);
        protocol::write_message(
            &mut stream,
            &Message::DownloadRequest {
                file_name: file_name.to_string(),
            },
        )
        .await?;

        let line = protocol::read_line(&mut stream)
            .await?
            .ok_or(Error::ConnectionClosed)?;
        let size = match Message::decode(&line) {
            Ok(Message::FileSize(size) | Message::FileInfo { size, .. }) => size,
            Ok(Message::Error { reason }) => return Err(Error::Remote { reason }),
            Ok(_) => return Err(Error::UnexpectedResponse(line)),
            Err(e) => return Err(Error::Protocol(format!("{e} in reply '{line}'"))),
        };
        session.announce(size)?;
        tracing::debug!("{} announced '{}' as {} bytes", peer, file_name, size);

        let entry = catalog
            .lookup_by_name(file_name)?
            .ok_or_else(|| Error::NotInCatalog(file_name.to_string()))?;
        session.expect_hash(entry.hash);

        self.progress_tx.send_modify(|p| {
            p.state = TransferState::Transferring;
            p.total_bytes = Some(size);
        });

        let part_path = part_path(dest_path);
        let mut writer = PartFile::create(part_path).await?;

        let hash = match self.receive(&mut stream, &mut writer, &mut session).await {
            Ok(()) => writer.finish().await,
            Err(e) => Err(e),
        };
        let hash = match hash {
            Ok(hash) => hash,
            Err(e) => {
                writer.discard().await;
                return Err(e);
            }
        };

        self.set_state(TransferState::Verifying);
        let expected = session.expected_hash().unwrap_or_default();
        if !hash.eq_ignore_ascii_case(expected) {
            writer.discard().await;
            return Err(Error::HashMismatch {
                expected: expected.to_string(),
                actual: hash,
            });
        }

        writer.persist(dest_path).await?;

        Ok(DownloadReport {
            file_name: file_name.to_string(),
            peer: peer.clone(),
            path: dest_path.to_path_buf(),
            bytes: session.bytes_transferred(),
            hash,
            elapsed: started.elapsed(),
            completed_at: Utc::now(),
        })
    }

    /// Read exactly the announced number of bytes into `writer`.
    async fn receive<R>(
        &self,
        reader: &mut R,
        writer: &mut PartFile,
        session: &mut TransferSession,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];

        while session.remaining() > 0 {
            let want = usize::try_from(session.remaining())
                .map_or(buffer.len(), |remaining| remaining.min(buffer.len()));
            let n = reader.read(&mut buffer[..want]).await?;
            if n == 0 {
                return Err(Error::Truncated {
                    expected: session.announced_size().unwrap_or_default(),
                    received: session.bytes_transferred(),
                });
            }

            writer.write(&buffer[..n]).await?;
            session.record(n as u64);

            let transferred = session.bytes_transferred();
            self.progress_tx.send_modify(|p| p.bytes_transferred = transferred);
        }

        Ok(())
    }

    fn set_state(&self, state: TransferState) {
        self.progress_tx.send_modify(|p| p.state = state);
    }
}

/// Download `file_name` from `peer` into `dest_path`, verifying it against
/// `catalog`. See [`Downloader::download`].
///
/// # Errors
///
/// See [`Downloader::download`].
pub async fn download(
    peer: &PeerAddress,
    file_name: &str,
    dest_path: &Path,
    catalog: &dyn FileCatalog,
    connect_timeout: Duration,
) -> Result<DownloadReport> {
    Downloader::new(connect_timeout)
        .download(peer, file_name, dest_path, catalog)
        .await
}

/// `<dest>.part`
fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Temporary download target that hashes everything written to it.
#[derive(Debug)]
struct PartFile {
    path: PathBuf,
    file: tokio::fs::File,
    hasher: Sha256,
}

impl PartFile {
    async fn create(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            file,
            hasher: Sha256::new(),
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await?;
        self.hasher.update(data);
        Ok(())
    }

    /// Flush to disk and return the lowercase hex SHA-256.
    async fn finish(&mut self) -> Result<String> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(to_hex(&self.hasher.clone().finalize()))
    }

    /// Close the file and move it to `dest`. The part file is removed if
    /// the move fails.
    async fn persist(self, dest: &Path) -> Result<()> {
        drop(self.file);
        if let Err(e) = tokio::fs::rename(&self.path, dest).await {
            if let Err(remove) = tokio::fs::remove_file(&self.path).await {
                tracing::debug!("Could not remove {}: {}", self.path.display(), remove);
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn discard(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::debug!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}
