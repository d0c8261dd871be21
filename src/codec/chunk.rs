//! INSTREAM chunk framing.
//!
//! ```text
//! ┌────────────────┬──────────────────┐
//! │ Length         │ Payload          │
//! │ 4 bytes        │ Length bytes     │
//! │ uint32 BE      │                  │
//! └────────────────┴──────────────────┘
//! ```
//!
//! A zero length field terminates the upload. Header and payload go out
//! in one vectored write; nothing is buffered between calls.

use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{ClamdError, Result};

/// Length prefix size in bytes.
pub const CHUNK_HEADER_SIZE: usize = 4;

/// Default number of payload bytes per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Largest chunk the client will frame (16 MB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Terminator chunk: a zero length field.
pub const EOF_MARKER: [u8; CHUNK_HEADER_SIZE] = [0; CHUNK_HEADER_SIZE];

/// Encode a chunk length prefix (Big Endian).
///
/// # Example
///
/// ```
/// use clamd_client::codec::{decode_chunk_header, encode_chunk_header};
///
/// let header = encode_chunk_header(1024);
/// assert_eq!(header, [0, 0, 4, 0]);
/// assert_eq!(decode_chunk_header(&header), Some(1024));
/// ```
#[inline]
pub fn encode_chunk_header(len: u32) -> [u8; CHUNK_HEADER_SIZE] {
    len.to_be_bytes()
}

/// Decode a chunk length prefix.
///
/// Returns `None` if buffer is too short.
#[inline]
pub fn decode_chunk_header(buf: &[u8]) -> Option<u32> {
    if buf.len() < CHUNK_HEADER_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Frame and write one chunk of upload data.
///
/// Zero length is reserved for the terminator, so an empty slice is
/// rejected, as is anything above [`MAX_CHUNK_SIZE`].
pub async fn send_chunk<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Err(ClamdError::Protocol(
            "Empty chunk: zero length is reserved for end of stream".to_string(),
        ));
    }
    if data.len() > MAX_CHUNK_SIZE {
        return Err(ClamdError::Protocol(format!(
            "Chunk size {} exceeds maximum {}",
            data.len(),
            MAX_CHUNK_SIZE
        )));
    }

    let header = encode_chunk_header(data.len() as u32);
    write_frame(writer, &header, data).await
}

/// Write the zero-length terminator chunk.
pub async fn send_eof<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&EOF_MARKER).await?;
    writer.flush().await?;
    Ok(())
}

/// Write header and payload with `write_vectored`, continuing after
/// partial writes from the exact byte offset.
async fn write_frame<W>(writer: &mut W, header: &[u8], payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size = header.len() + payload.len();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(header, payload, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(ClamdError::Transport(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn remaining_slices<'a>(header: &'a [u8], payload: &'a [u8], skip_bytes: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(2);

    if skip_bytes < header.len() {
        slices.push(IoSlice::new(&header[skip_bytes..]));
        if !payload.is_empty() {
            slices.push(IoSlice::new(payload));
        }
    } else {
        let start_in_payload = skip_bytes - header.len();
        if start_in_payload < payload.len() {
            slices.push(IoSlice::new(&payload[start_in_payload..]));
        }
    }

    slices
}
