//! PeerLink line protocol.
//!
//! Every control message is one line of UTF-8 text terminated by `\n`:
//!
//! ```text
//! TOKEN[:arg1[:arg2...]]\n
//! ```
//!
//! The token is separated from its payload with a single bounded split, so a
//! file name such as `notes:v2.txt` in `DOWNLOAD_REQUEST:notes:v2.txt` stays
//! intact. A binary payload (the file bytes after `FILE_SIZE:<n>` or
//! `FILE_INFO:<name>:<n>`) follows its announcing line immediately, with no
//! further framing; the receiver reads exactly `<n>` bytes.
//!
//! | Request | Response |
//! |---------|----------|
//! | `PING` | `PONG` |
//! | `HELLO:<name>` | `HELLO_ACK:Welcome <name>!` |
//! | `GET_INFO` | `INFO:Port=<p>,Status=Running,Files=<n>` |
//! | `LIST_FILES` | `FILES:<a,b,...>` or `FILES:NONE` |
//! | `DOWNLOAD_REQUEST:<name>` | `FILE_SIZE:<bytes>` + bytes, or `ERROR:<reason>` |
//! | `REQUEST_FILE:<name>` | `FILE_INFO:<name>:<bytes>` + bytes, or `ERROR:<reason>` |
//! | `DISCONNECT` / `BYE` | `BYE:Connection closed` |

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Maximum accepted length of one protocol line, excluding the terminator.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Payload of `FILES:` when the shared folder is empty.
pub const NO_FILES: &str = "NONE";

/// Status reported by a running listener in `INFO`.
pub const STATUS_RUNNING: &str = "Running";

/// Message sent with `BYE` when the server closes a connection.
pub const BYE_MESSAGE: &str = "Connection closed";

/// Command tokens of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Liveness probe
    Ping,
    /// Liveness reply
    Pong,
    /// Greeting with the client's name
    Hello,
    /// Greeting reply
    HelloAck,
    /// Ask for listener information
    GetInfo,
    /// Listener information
    Info,
    /// Ask for the shared folder listing
    ListFiles,
    /// Shared folder listing
    Files,
    /// Download a file by catalog name
    DownloadRequest,
    /// Legacy download request, answered with `FILE_INFO`
    RequestFile,
    /// Announces the byte length of the following payload
    FileSize,
    /// Announces name and byte length of the following payload
    FileInfo,
    /// Error reply
    Error,
    /// Close the connection
    Disconnect,
    /// Close the connection (alias of `DISCONNECT`, also the close reply)
    Bye,
}

impl Command {
    /// All commands, in wire-table order.
    pub const ALL: [Self; 15] = [
        Self::Ping,
        Self::Pong,
        Self::Hello,
        Self::HelloAck,
        Self::GetInfo,
        Self::Info,
        Self::ListFiles,
        Self::Files,
        Self::DownloadRequest,
        Self::RequestFile,
        Self::FileSize,
        Self::FileInfo,
        Self::Error,
        Self::Disconnect,
        Self::Bye,
    ];

    /// The wire token for this command.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Hello => "HELLO",
            Self::HelloAck => "HELLO_ACK",
            Self::GetInfo => "GET_INFO",
            Self::Info => "INFO",
            Self::ListFiles => "LIST_FILES",
            Self::Files => "FILES",
            Self::DownloadRequest => "DOWNLOAD_REQUEST",
            Self::RequestFile => "REQUEST_FILE",
            Self::FileSize => "FILE_SIZE",
            Self::FileInfo => "FILE_INFO",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
            Self::Bye => "BYE",
        }
    }

    /// Parse a wire token. Tokens are case-sensitive.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == token)
    }

    /// Whether a listener answers this command. Response tokens are not
    /// requests.
    pub const fn is_request(self) -> bool {
        matches!(
            self,
            Self::Ping
                | Self::Hello
                | Self::GetInfo
                | Self::ListFiles
                | Self::DownloadRequest
                | Self::RequestFile
                | Self::Disconnect
                | Self::Bye
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a command and its arguments into one protocol line.
///
/// The returned string includes the trailing newline.
#[must_use]
pub fn encode(command: Command, args: &[&str]) -> String {
    let mut line = String::from(command.as_str());
    for arg in args {
        line.push(':');
        line.push_str(arg);
    }
    line.push('\n');
    line
}

/// Listener information carried by `INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Listening port
    pub port: u16,
    /// Listener status (always `Running` for a live listener)
    pub status: String,
    /// Number of files in the shared folder
    pub files: usize,
}

impl ServerInfo {
    fn parse(payload: &str) -> Option<Self> {
        let mut port = None;
        let mut status = None;
        let mut files = None;

        for pair in payload.split(',') {
            let (key, value) = pair.split_once('=')?;
            match key.trim() {
                "Port" => port = value.trim().parse().ok(),
                "Status" => status = Some(value.trim().to_string()),
                "Files" => files = value.trim().parse().ok(),
                _ => {}
            }
        }

        Some(Self {
            port: port?,
            status: status?,
            files: files?,
        })
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Port={},Status={},Files={}",
            self.port, self.status, self.files
        )
    }
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `PING`
    Ping,
    /// `PONG`
    Pong,
    /// `HELLO:<name>`
    Hello {
        /// Client name (may be empty)
        name: String,
    },
    /// `HELLO_ACK:<greeting>`
    HelloAck {
        /// Greeting text, e.g. `Welcome alice!`
        greeting: String,
    },
    /// `GET_INFO`
    GetInfo,
    /// `INFO:Port=<p>,Status=<s>,Files=<n>`
    Info(ServerInfo),
    /// `LIST_FILES`
    ListFiles,
    /// `FILES:<a,b,...>`; empty when the payload is `NONE`
    Files(Vec<String>),
    /// `DOWNLOAD_REQUEST:<name>`
    DownloadRequest {
        /// Catalog name of the requested file
        file_name: String,
    },
    /// `REQUEST_FILE:<name>`
    RequestFile {
        /// Catalog name of the requested file
        file_name: String,
    },
    /// `FILE_SIZE:<bytes>`
    FileSize(u64),
    /// `FILE_INFO:<name>:<bytes>`
    FileInfo {
        /// File name as known to the sender
        file_name: String,
        /// Byte length of the payload
        size: u64,
    },
    /// `ERROR:<reason>`
    Error {
        /// Reason code, possibly with detail (`UNKNOWN_COMMAND:FOO`)
        reason: String,
    },
    /// `DISCONNECT`
    Disconnect,
    /// `BYE[:<message>]`
    Bye {
        /// Optional closing message
        message: Option<String>,
    },
}

impl Message {
    /// Build an error reply.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    /// The command token of this message.
    pub const fn command(&self) -> Command {
        match self {
            Self::Ping => Command::Ping,
            Self::Pong => Command::Pong,
            Self::Hello { .. } => Command::Hello,
            Self::HelloAck { .. } => Command::HelloAck,
            Self::GetInfo => Command::GetInfo,
            Self::Info(_) => Command::Info,
            Self::ListFiles => Command::ListFiles,
            Self::Files(_) => Command::Files,
            Self::DownloadRequest { .. } => Command::DownloadRequest,
            Self::RequestFile { .. } => Command::RequestFile,
            Self::FileSize(_) => Command::FileSize,
            Self::FileInfo { .. } => Command::FileInfo,
            Self::Error { .. } => Command::Error,
            Self::Disconnect => Command::Disconnect,
            Self::Bye { .. } => Command::Bye,
        }
    }

    /// Encode this message as one protocol line, including the newline.
    #[must_use]
    pub fn encode(&self) -> String {
        let command = self.command();
        match self {
            Self::Ping | Self::Pong | Self::GetInfo | Self::ListFiles | Self::Disconnect => {
                encode(command, &[])
            }
            Self::Hello { name } => encode(command, &[name]),
            Self::HelloAck { greeting } => encode(command, &[greeting]),
            Self::Info(info) => encode(command, &[&info.to_string()]),
            Self::Files(names) if names.is_empty() => encode(command, &[NO_FILES]),
            Self::Files(names) => encode(command, &[&names.join(",")]),
            Self::DownloadRequest { file_name } | Self::RequestFile { file_name } => {
                encode(command, &[file_name])
            }
            Self::FileSize(size) => encode(command, &[&size.to_string()]),
            Self::FileInfo { file_name, size } => {
                encode(command, &[file_name, &size.to_string()])
            }
            Self::Error { reason } => encode(command, &[reason]),
            Self::Bye { message: None } => encode(command, &[]),
            Self::Bye {
                message: Some(message),
            } => encode(command, &[message]),
        }
    }

    /// Decode one protocol line. A trailing `\n` or `\r\n` is ignored.
    pub fn decode(line: &str) -> std::result::Result<Self, DecodeError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(DecodeError::Empty);
        }

        let (token, payload) = match line.split_once(':') {
            Some((token, payload)) => (token, Some(payload)),
            None => (line, None),
        };

        let command = Command::from_token(token)
            .ok_or_else(|| DecodeError::UnknownCommand(token.to_string()))?;

        let required = |payload: Option<&str>| {
            payload
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .ok_or(DecodeError::MissingArgument(command))
        };
        let invalid = |value: &str| DecodeError::InvalidArgument {
            command,
            value: value.to_string(),
        };

        let message = match command {
            Command::Ping => Self::Ping,
            Command::Pong => Self::Pong,
            Command::Hello => Self::Hello {
                name: payload.unwrap_or_default().to_string(),
            },
            Command::HelloAck => Self::HelloAck {
                greeting: payload.unwrap_or_default().to_string(),
            },
            Command::GetInfo => Self::GetInfo,
            Command::Info => {
                let payload = required(payload)?;
                Self::Info(ServerInfo::parse(&payload).ok_or_else(|| invalid(&payload))?)
            }
            Command::ListFiles => Self::ListFiles,
            Command::Files => Self::Files(split_file_names(payload.unwrap_or_default())),
            Command::DownloadRequest => Self::DownloadRequest {
                file_name: required(payload)?,
            },
            Command::RequestFile => Self::RequestFile {
                file_name: required(payload)?,
            },
            Command::FileSize => {
                let payload = required(payload)?;
                Self::FileSize(payload.trim().parse().map_err(|_| invalid(&payload))?)
            }
            Command::FileInfo => {
                let payload = required(payload)?;
                let (file_name, size) = payload.rsplit_once(':').ok_or_else(|| invalid(&payload))?;
                Self::FileInfo {
                    file_name: file_name.to_string(),
                    size: size.trim().parse().map_err(|_| invalid(&payload))?,
                }
            }
            Command::Error => Self::Error {
                reason: payload.unwrap_or_default().to_string(),
            },
            Command::Disconnect => Self::Disconnect,
            Command::Bye => Self::Bye {
                message: payload.map(str::to_string),
            },
        };

        Ok(message)
    }

    /// Decode a line received by a listener.
    ///
    /// Tokens that are not requests are rejected as unknown before their
    /// arguments are looked at, so `FILE_SIZE:abc` and `PONG` get the same
    /// answer.
    pub fn decode_request(line: &str) -> std::result::Result<Self, DecodeError> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let token = trimmed.split_once(':').map_or(trimmed, |(token, _)| token);

        match Command::from_token(token) {
            Some(command) if !command.is_request() => {
                Err(DecodeError::UnknownCommand(token.to_string()))
            }
            _ => Self::decode(line),
        }
    }

    /// Whether this message asks the server to close the connection.
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnect | Self::Bye { .. })
    }
}

/// Decode a protocol line. See [`Message::decode`].
pub fn decode(line: &str) -> std::result::Result<Message, DecodeError> {
    Message::decode(line)
}

fn split_file_names(payload: &str) -> Vec<String> {
    if payload.is_empty() || payload == NO_FILES {
        return Vec::new();
    }
    payload
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reasons a line could not be decoded into a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Blank line
    #[error("empty message")]
    Empty,
    /// Token is not part of the vocabulary
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    /// Command requires an argument that was not supplied
    #[error("{0} requires an argument")]
    MissingArgument(Command),
    /// Argument could not be parsed
    #[error("invalid argument for {command}: '{value}'")]
    InvalidArgument {
        /// Command being decoded
        command: Command,
        /// Offending payload
        value: String,
    },
}

impl DecodeError {
    /// The `ERROR:` reply a server sends for this decode failure.
    #[must_use]
    pub fn reply(&self) -> Message {
        let reason = match self {
            Self::Empty => "EMPTY_MESSAGE".to_string(),
            Self::UnknownCommand(token) => format!("UNKNOWN_COMMAND:{token}"),
            Self::MissingArgument(Command::DownloadRequest | Command::RequestFile) => {
                "MISSING_FILENAME".to_string()
            }
            Self::MissingArgument(command) => format!("MISSING_ARGUMENT:{command}"),
            Self::InvalidArgument { command, .. } => format!("INVALID_ARGUMENT:{command}"),
        };
        Message::Error { reason }
    }
}

/// Returns true if a raw response line is an `ERROR:` reply.
#[must_use]
pub fn is_error(line: &str) -> bool {
    error_reason(line).is_some()
}

/// Extract the reason from a raw `ERROR:` reply.
#[must_use]
pub fn error_reason(line: &str) -> Option<&str> {
    line.trim_end_matches(['\r', '\n'])
        .strip_prefix("ERROR:")
}

/// Parse the file names out of a raw `FILES:` reply.
///
/// Returns an empty list for `FILES:NONE` and for anything that is not a
/// `FILES` reply.
#[must_use]
pub fn parse_files_list(line: &str) -> Vec<String> {
    match Message::decode(line) {
        Ok(Message::Files(names)) => names,
        _ => Vec::new(),
    }
}

/// Read one protocol line from a buffered stream.
///
/// Returns `Ok(None)` at end of stream. The terminator is stripped; a final
/// line without a terminator is still returned. Invalid UTF-8 is replaced
/// rather than rejected so that the caller can answer with an `ERROR` line.
///
/// # Errors
///
/// Returns [`Error::LineTooLong`] if no terminator is found within
/// [`MAX_LINE_LENGTH`] bytes, or an I/O error from the stream.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = MAX_LINE_LENGTH as u64 + 1;
    let n = reader.take(limit).read_until(b'\n', &mut buf).await?;

    if n == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_LINE_LENGTH {
        return Err(Error::LineTooLong(MAX_LINE_LENGTH));
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Read one protocol line, failing if none arrives within `duration`.
///
/// # Errors
///
/// Returns `Error::Timeout` if the operation exceeds the specified duration.
pub async fn read_line_with_timeout<R>(reader: &mut R, duration: Duration) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    timeout(duration, read_line(reader))
        .await
        .map_err(|_| Error::Timeout(duration.as_secs()))?
}

/// Write one raw line, appending the terminator if missing, and flush.
///
/// # Errors
///
/// Returns an error if writing fails.
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    if !line.ends_with('\n') {
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Encode and write one message, then flush.
///
/// # Errors
///
/// Returns an error if writing fails.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_line(writer, &message.encode()).await
}
