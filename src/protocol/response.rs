//! Response decoding task.
//!
//! [`read_response`] moves the connection into a decoder task that reads
//! records and sends them, in order, through a bounded channel:
//!
//! ```text
//! socket ─► RecordBuffer ─► ScanResult::parse ─► mpsc ─► ResultStream
//!                                                  │
//!                    (last record sent) ─► oneshot ─► Completion
//! ```
//!
//! The [`Completion`] hands the connection back only after the final
//! record has been sent, so whoever closes the connection cannot do so
//! while records are still being produced.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};

use super::record::ScanResult;
use super::record_buffer::RecordBuffer;
use crate::codec::CommandMode;
use crate::error::{ClamdError, Result};

/// Default capacity of the record channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Lazy, single-pass sequence of decoded records.
///
/// Ends when the daemon closes the connection, after the reply's end
/// marker, or after a transport error (delivered as the last item).
/// Dropping the stream abandons the rest of the reply.
#[derive(Debug)]
pub struct ResultStream {
    rx: mpsc::Receiver<Result<ScanResult>>,
}

impl ResultStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<ScanResult>>) -> Self {
        Self { rx }
    }

    /// Next record, or `None` once the reply is complete.
    pub async fn next(&mut self) -> Option<Result<ScanResult>> {
        self.rx.recv().await
    }

    /// Drain the stream, stopping at the first error.
    pub async fn collect(mut self) -> Result<Vec<ScanResult>> {
        let mut results = Vec::new();
        while let Some(item) = self.next().await {
            results.push(item?);
        }
        Ok(results)
    }

    /// Stop the decoder; records already queued can still be read.
    pub fn abandon(&mut self) {
        self.rx.close();
    }
}

/// One-shot signal: the decoder has emitted its final record.
///
/// Resolves to the reader the decoder was reading from.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    /// Wait for the decoder to finish.
    ///
    /// Returns `None` only if the decoder task was aborted.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}

/// Spawn the decoder task for one reply.
///
/// `end_marker` names a record after which the reply is complete even if
/// the daemon keeps the connection open (`END` for STATS).
pub fn read_response<R>(
    reader: R,
    mode: CommandMode,
    end_marker: Option<&'static str>,
    capacity: usize,
) -> (ResultStream, Completion<R>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        let reader = decode_loop(reader, mode, end_marker, tx).await;
        let _ = done_tx.send(reader);
    });

    (ResultStream::new(rx), Completion { rx: done_rx })
}

/// Read, split and classify records until the reply ends.
///
/// The sender is dropped on return, which ends the stream.
async fn decode_loop<R>(
    mut reader: R,
    mode: CommandMode,
    end_marker: Option<&'static str>,
    tx: mpsc::Sender<Result<ScanResult>>,
) -> R
where
    R: AsyncRead + Unpin,
{
    let mut records = RecordBuffer::new(mode.terminator());
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut emitted = 0usize;

    'read: loop {
        let read = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!("Result stream dropped after {} records", emitted);
                break 'read;
            }
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                if let Some(tail) = records.finish().filter(|t| !is_blank(t)) {
                    tracing::warn!("Reply ended inside a record ({} bytes)", tail.len());
                    let rec =
                        ScanResult::parse_error(&String::from_utf8_lossy(&tail), "truncated record");
                    let _ = tx.send(Ok(rec)).await;
                }
                break 'read;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Read error after {} records: {}", emitted, e);
                let _ = tx.send(Err(ClamdError::Transport(e))).await;
                break 'read;
            }
        };

        let complete = match records.push(&buf[..n]) {
            Ok(complete) => complete,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break 'read;
            }
        };

        for bytes in complete {
            if is_blank(&bytes) {
                continue;
            }

            let rec = decode_record(&bytes);
            let is_end = end_marker.is_some_and(|marker| rec.raw == marker);

            if tx.send(Ok(rec)).await.is_err() {
                break 'read;
            }
            emitted += 1;

            if is_end {
                break 'read;
            }
        }
    }

    tracing::trace!("Decoder finished, {} records", emitted);
    reader
}

fn decode_record(bytes: &[u8]) -> ScanResult {
    match std::str::from_utf8(bytes) {
        Ok(text) => ScanResult::parse(text),
        Err(_) => ScanResult::parse_error(&String::from_utf8_lossy(bytes), "invalid UTF-8"),
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_whitespace())
}
