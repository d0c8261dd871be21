//! Client builder and public operations.
//!
//! The [`ClamdBuilder`] provides a fluent API for configuring the client.
//! The [`Clamd`] client runs one connection per call:
//! 1. Connect to the configured address
//! 2. Send the command (and, for INSTREAM, the chunked upload)
//! 3. Hand the connection to a decoder task producing a [`ResultStream`]
//! 4. Close the connection from a closer task once the decoder completes
//!
//! # Example
//!
//! ```ignore
//! use clamd_client::{Clamd, EICAR};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clamd = Clamd::new("tcp://127.0.0.1:3310")?;
//!     clamd.ping().await?;
//!
//!     let mut results = clamd.scan_bytes(EICAR, CancellationToken::new()).await?;
//!     while let Some(result) = results.next().await {
//!         println!("{}", result?);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::codec::{send_chunk, send_command, send_eof, Command, CommandMode, ScanCommand};
use crate::config::ClamdConfig;
use crate::error::{ClamdError, Result};
use crate::observer::{SessionEvent, SessionObserver, StreamState};
use crate::protocol::{read_response, Completion, ResultStream, ScanResult, Stats, Status};
use crate::transport::{connect, Address, Connection};

/// The standard antivirus test file.
pub const EICAR: &[u8] = br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// Builder for configuring and creating a [`Clamd`] client.
pub struct ClamdBuilder {
    config: ClamdConfig,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl ClamdBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::from_config(ClamdConfig::default())
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ClamdConfig) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    /// Set the daemon address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    /// Set the INSTREAM chunk size.
    ///
    /// Default: 1024
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the record channel capacity.
    ///
    /// Default: 64
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the command mode (`n`/newline or `z`/NUL delimited).
    pub fn command_mode(mut self, mode: CommandMode) -> Self {
        self.config.command_mode = mode;
        self
    }

    /// Register an observer for session events.
    pub fn observer<O>(mut self, observer: O) -> Self
    where
        O: SessionObserver + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Validate the configuration and build the client.
    ///
    /// The address is parsed here, so a malformed address fails before any
    /// network activity.
    pub fn build(self) -> Result<Clamd> {
        self.config.validate()?;
        let address = Address::parse(&self.config.address)?;

        Ok(Clamd {
            address,
            config: self.config,
            observer: self.observer,
        })
    }
}

impl Default for ClamdBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Client for one clamd endpoint.
///
/// Cheap to clone; every operation opens its own connection.
#[derive(Clone)]
pub struct Clamd {
    address: Address,
    config: ClamdConfig,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl Clamd {
    /// Create a client for `address` with default settings.
    pub fn new(address: &str) -> Result<Self> {
        ClamdBuilder::new().address(address).build()
    }

    /// Create a new client builder.
    pub fn builder() -> ClamdBuilder {
        ClamdBuilder::new()
    }

    /// Parsed daemon address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Active configuration.
    pub fn config(&self) -> &ClamdConfig {
        &self.config
    }

    /// Check the daemon is alive (replies `PONG`).
    pub async fn ping(&self) -> Result<()> {
        self.expect_reply(Command::Ping, "PONG").await
    }

    /// Program and database versions.
    pub async fn version(&self) -> Result<ScanResult> {
        let stream = self.command(Command::Version).await?;
        let record = first_record(stream, "VERSION").await?;

        if record.status == Status::ParseError {
            return Err(ClamdError::Decode(format!(
                "Undecodable VERSION response, got {:?}",
                record.raw
            )));
        }
        Ok(record)
    }

    /// Scan queue, thread and memory statistics.
    ///
    /// The reply format is defined by the daemon and may change between
    /// releases; unknown lines fail the call.
    pub async fn stats(&self) -> Result<Stats> {
        let records = self.command(Command::Stats).await?.collect().await?;
        Stats::from_records(&records)
    }

    /// Reload the signature databases.
    pub async fn reload(&self) -> Result<()> {
        self.expect_reply(Command::Reload, "RELOADING").await
    }

    /// Ask the daemon to exit. No reply is expected.
    pub async fn shutdown(&self) -> Result<()> {
        // Dropping the stream abandons the (empty) reply and lets the closer run.
        let _ = self.command(Command::Shutdown).await?;
        Ok(())
    }

    /// Scan a path on the daemon host and return the first record.
    ///
    /// Multi-file scans produce one record per file; use
    /// [`scan_file_stream`](Self::scan_file_stream) to see all of them.
    pub async fn scan_file(&self, path: impl AsRef<Path>, variant: ScanCommand) -> Result<ScanResult> {
        let stream = self.scan_file_stream(path, variant).await?;
        first_record(stream, variant.as_str()).await
    }

    /// Scan a path on the daemon host and return every record.
    pub async fn scan_file_stream(
        &self,
        path: impl AsRef<Path>,
        variant: ScanCommand,
    ) -> Result<ResultStream> {
        let path = path.as_ref();
        let path = path.to_str().ok_or_else(|| {
            ClamdError::Protocol(format!("Path is not valid UTF-8: {}", path.display()))
        })?;
        if path.is_empty() {
            return Err(ClamdError::Protocol(format!("{} requires a path", variant)));
        }

        self.command(Command::Scan(variant, path.to_string())).await
    }

    /// `SCAN`: archive support enabled, stops at the first detection.
    pub async fn scan(&self, path: impl AsRef<Path>) -> Result<ScanResult> {
        self.scan_file(path, ScanCommand::Scan).await
    }

    /// `RAWSCAN`: archive and special file support disabled.
    pub async fn raw_scan(&self, path: impl AsRef<Path>) -> Result<ScanResult> {
        self.scan_file(path, ScanCommand::RawScan).await
    }

    /// `MULTISCAN`: daemon scans with multiple threads.
    pub async fn multi_scan(&self, path: impl AsRef<Path>) -> Result<ScanResult> {
        self.scan_file(path, ScanCommand::MultiScan).await
    }

    /// `CONTSCAN`: keep going after a detection.
    pub async fn cont_scan(&self, path: impl AsRef<Path>) -> Result<ScanResult> {
        self.scan_file(path, ScanCommand::ContScan).await
    }

    /// `ALLMATCHSCAN`: report every matching signature.
    pub async fn all_match_scan(&self, path: impl AsRef<Path>) -> Result<ScanResult> {
        self.scan_file(path, ScanCommand::AllMatchScan).await
    }

    /// Upload content with INSTREAM and return the verdict stream.
    ///
    /// The source is read in chunks of `chunk_size` bytes; each chunk is
    /// framed and written before the next read. `cancel` is checked between
    /// chunks and raced against every pending read and write; once it fires
    /// the connection is closed and `ClamdError::Cancelled` is returned.
    /// Bytes already handed to the socket may still reach the daemon.
    ///
    /// The daemon rejects uploads larger than its `StreamMaxLength` with an
    /// `INSTREAM size limit exceeded. ERROR` record.
    pub async fn scan_stream<R>(&self, mut source: R, cancel: CancellationToken) -> Result<ResultStream>
    where
        R: AsyncRead + Unpin,
    {
        let command = Command::InStream.line();
        let started = Instant::now();

        self.transition(StreamState::Connecting);
        let mut conn = match self.open().await {
            Ok(conn) => conn,
            Err(e) => {
                self.transition(StreamState::Closed);
                return Err(e);
            }
        };

        self.transition(StreamState::Uploading);
        if let Err(e) = self.upload(&mut conn, &mut source, &cancel, started).await {
            match &e {
                ClamdError::Cancelled => tracing::debug!("INSTREAM cancelled, closing connection"),
                other => tracing::debug!("INSTREAM upload failed: {}", other),
            }
            close_connection(&mut conn, &command, started, self.observer.as_deref()).await;
            self.transition(StreamState::Closed);
            return Err(e);
        }

        self.transition(StreamState::AwaitingVerdict);
        let (stream, completion) = read_response(
            conn,
            self.config.command_mode,
            None,
            self.config.channel_capacity,
        );
        self.transition(StreamState::Draining);
        self.spawn_closer(completion, command, started, true);

        Ok(stream)
    }

    /// Upload an in-memory buffer with INSTREAM.
    pub async fn scan_bytes(&self, data: &[u8], cancel: CancellationToken) -> Result<ResultStream> {
        self.scan_stream(data, cancel).await
    }

    /// Send `INSTREAM`, the chunks and the terminator.
    async fn upload<R>(
        &self,
        conn: &mut Connection,
        source: &mut R,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mode = self.config.command_mode;
        let command = Command::InStream.line();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClamdError::Cancelled),
            sent = send_command(conn, mode, &command) => sent?,
        }
        self.emit(SessionEvent::CommandSent {
            command,
            elapsed: started.elapsed(),
        });

        let mut buf = vec![0u8; self.config.chunk_size];
        let mut total = 0usize;

        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClamdError::Cancelled),
                read = source.read(&mut buf) => read?,
            };
            if n == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClamdError::Cancelled),
                sent = send_chunk(conn, &buf[..n]) => sent?,
            }
            total += n;
            tracing::trace!("Sent chunk of {} bytes ({} total)", n, total);
            self.emit(SessionEvent::ChunkSent { len: n });
        }

        if cancel.is_cancelled() {
            return Err(ClamdError::Cancelled);
        }
        send_eof(conn).await?;
        tracing::debug!("INSTREAM upload complete, {} bytes", total);
        Ok(())
    }

    /// Connect, send one command and start decoding its reply.
    async fn command(&self, command: Command) -> Result<ResultStream> {
        let line = command.line();
        let started = Instant::now();

        let mut conn = self.open().await?;
        tracing::debug!("Sending {} to {}", line, self.address);

        if let Err(e) = send_command(&mut conn, self.config.command_mode, &line).await {
            close_connection(&mut conn, &line, started, self.observer.as_deref()).await;
            return Err(e);
        }
        self.emit(SessionEvent::CommandSent {
            command: line.clone(),
            elapsed: started.elapsed(),
        });

        let (stream, completion) = read_response(
            conn,
            self.config.command_mode,
            command.end_marker(),
            self.config.channel_capacity,
        );
        self.spawn_closer(completion, line, started, false);

        Ok(stream)
    }

    /// Send a command whose reply must be exactly one `expected` record.
    async fn expect_reply(&self, command: Command, expected: &str) -> Result<()> {
        let line = command.line();
        let records = self.command(command).await?.collect().await?;

        match records.as_slice() {
            [record] if record.status == Status::Unstructured && record.raw == expected => Ok(()),
            [] => Err(ClamdError::Protocol(format!(
                "Invalid response to {}, got nothing",
                line
            ))),
            other => Err(ClamdError::Protocol(format!(
                "Invalid response to {}, got {:?}",
                line,
                other.iter().map(|r| r.raw.as_str()).collect::<Vec<_>>()
            ))),
        }
    }

    async fn open(&self) -> Result<Connection> {
        connect(&self.address, self.config.connect_timeout()).await
    }

    /// Close the connection once the decoder has emitted its last record.
    fn spawn_closer(
        &self,
        completion: Completion<Connection>,
        command: String,
        started: Instant,
        streaming: bool,
    ) {
        let observer = self.observer.clone();

        tokio::spawn(async move {
            let Some(mut conn) = completion.wait().await else {
                tracing::warn!("Decoder for {} ended without releasing its connection", command);
                return;
            };
            close_connection(&mut conn, &command, started, observer.as_deref()).await;
            if streaming {
                notify_state(observer.as_deref(), StreamState::Closed);
            }
        });
    }

    fn transition(&self, state: StreamState) {
        notify_state(self.observer.as_deref(), state);
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for Clamd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clamd")
            .field("address", &self.address)
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// First record of a reply; the rest is abandoned.
async fn first_record(mut stream: ResultStream, command: &str) -> Result<ScanResult> {
    match stream.next().await {
        Some(record) => record,
        None => Err(ClamdError::Protocol(format!(
            "Invalid response to {}, got nothing",
            command
        ))),
    }
}

/// Close and report the outcome. Failures go to diagnostics only: the
/// operation's result is already decided.
async fn close_connection(
    conn: &mut Connection,
    command: &str,
    started: Instant,
    observer: Option<&dyn SessionObserver>,
) {
    let event = match conn.close().await {
        Ok(()) => {
            tracing::trace!("{} finished in {:?}", command, started.elapsed());
            SessionEvent::ConnectionClosed {
                command: command.to_string(),
                elapsed: started.elapsed(),
            }
        }
        Err(e) => {
            tracing::warn!("Failed to close connection after {}: {}", command, e);
            SessionEvent::CloseFailed {
                command: command.to_string(),
                error: e.to_string(),
            }
        }
    };

    if let Some(observer) = observer {
        observer.on_event(&event);
    }
}

fn notify_state(observer: Option<&dyn SessionObserver>, state: StreamState) {
    tracing::trace!("INSTREAM state: {}", state);
    if let Some(observer) = observer {
        observer.on_event(&SessionEvent::StateChanged { state });
    }
}
