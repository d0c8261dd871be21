//! Command lines.
//!
//! Every command is sent as a single write: a one-byte mode prefix, the
//! command word with its inline argument, and the mode terminator.
//!
//! ```text
//! n SCAN /tmp/file \n      (Newline mode)
//! z SCAN /tmp/file \0      (Null mode)
//! ```

use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{ClamdError, Result};

/// Delimiter convention for commands and reply records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    /// `n` prefix, records delimited by `\n`.
    #[default]
    Newline,
    /// `z` prefix, records delimited by `\0`.
    Null,
}

impl CommandMode {
    /// Byte sent before the command word.
    #[inline]
    pub fn prefix(self) -> u8 {
        match self {
            CommandMode::Newline => b'n',
            CommandMode::Null => b'z',
        }
    }

    /// Command terminator, also the reply record delimiter.
    #[inline]
    pub fn terminator(self) -> u8 {
        match self {
            CommandMode::Newline => b'\n',
            CommandMode::Null => b'\0',
        }
    }
}

/// Path scan flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanCommand {
    /// Scan a file or directory (recursively) with archive support.
    Scan,
    /// Scan with archive and special file support disabled.
    RawScan,
    /// Scan using multiple daemon threads.
    MultiScan,
    /// Scan without stopping at the first detection.
    ContScan,
    /// Report every matching signature, not just the first.
    AllMatchScan,
}

impl ScanCommand {
    /// All variants, in wire order.
    pub const ALL: [ScanCommand; 5] = [
        ScanCommand::Scan,
        ScanCommand::RawScan,
        ScanCommand::MultiScan,
        ScanCommand::ContScan,
        ScanCommand::AllMatchScan,
    ];

    /// Wire name of the command word.
    pub fn as_str(self) -> &'static str {
        match self {
            ScanCommand::Scan => "SCAN",
            ScanCommand::RawScan => "RAWSCAN",
            ScanCommand::MultiScan => "MULTISCAN",
            ScanCommand::ContScan => "CONTSCAN",
            ScanCommand::AllMatchScan => "ALLMATCHSCAN",
        }
    }
}

impl fmt::Display for ScanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete command understood by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Version,
    Stats,
    Reload,
    Shutdown,
    /// Path scan: `<VARIANT> <path>`.
    Scan(ScanCommand, String),
    /// Switch the connection into chunked upload mode.
    InStream,
}

impl Command {
    /// Command line without prefix or terminator.
    pub fn line(&self) -> String {
        match self {
            Command::Ping => "PING".to_string(),
            Command::Version => "VERSION".to_string(),
            Command::Stats => "STATS".to_string(),
            Command::Reload => "RELOAD".to_string(),
            Command::Shutdown => "SHUTDOWN".to_string(),
            Command::Scan(variant, path) => format!("{} {}", variant, path),
            Command::InStream => "INSTREAM".to_string(),
        }
    }

    /// Record after which the daemon sends nothing more, if the reply has one.
    pub fn end_marker(&self) -> Option<&'static str> {
        match self {
            Command::Stats => Some("END"),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line())
    }
}

/// Encode a command line into its wire form.
///
/// Fails if the text contains the mode terminator, which would split the
/// command in two on the daemon side.
pub fn encode_command(mode: CommandMode, text: &str) -> Result<BytesMut> {
    if text.is_empty() {
        return Err(ClamdError::Protocol("Empty command".to_string()));
    }
    if text.bytes().any(|b| b == b'\n' || b == b'\0') {
        return Err(ClamdError::Protocol(format!(
            "Command contains a line terminator: {:?}",
            text
        )));
    }

    let mut buf = BytesMut::with_capacity(text.len() + 2);
    buf.put_u8(mode.prefix());
    buf.put_slice(text.as_bytes());
    buf.put_u8(mode.terminator());
    Ok(buf)
}

/// Write a command line in a single write and flush it.
pub async fn send_command<W>(writer: &mut W, mode: CommandMode, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_command(mode, text)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
