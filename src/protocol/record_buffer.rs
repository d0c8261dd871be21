//! Record buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` so complete records are split off without
//! copying. Socket reads may end anywhere, including in the middle of a
//! record or of a multi-byte character; the buffer keeps the tail until
//! the delimiter arrives.
//!
//! # Example
//!
//! ```
//! use clamd_client::protocol::RecordBuffer;
//!
//! let mut buffer = RecordBuffer::new(b'\n');
//! assert!(buffer.push(b"clean.txt: ").unwrap().is_empty());
//! let records = buffer.push(b"OK\nPO").unwrap();
//! assert_eq!(&records[0][..], b"clean.txt: OK");
//! ```

use bytes::{Bytes, BytesMut};

use crate::error::{ClamdError, Result};

/// Default maximum record length (1 MB).
pub const DEFAULT_MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete records.
pub struct RecordBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Record delimiter (`\n` or `\0`).
    delimiter: u8,
    /// Bytes already searched for a delimiter.
    scanned: usize,
    /// Maximum allowed record length.
    max_record_size: usize,
}

impl RecordBuffer {
    /// Create a new record buffer with default settings.
    pub fn new(delimiter: u8) -> Self {
        Self::with_max_record_size(delimiter, DEFAULT_MAX_RECORD_SIZE)
    }

    /// Create a new record buffer with custom max record size.
    pub fn with_max_record_size(delimiter: u8, max_record_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            delimiter,
            scanned: 0,
            max_record_size,
        }
    }

    /// Push data into the buffer and extract all complete records.
    ///
    /// Returned records do not include the delimiter.
    ///
    /// # Errors
    ///
    /// Returns error if a record grows past `max_record_size` without a delimiter.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut records = Vec::new();
        let delimiter = self.delimiter;

        loop {
            let Some(offset) = self.buffer[self.scanned..]
                .iter()
                .position(|&b| b == delimiter)
            else {
                break;
            };
            let end = self.scanned + offset;
            let record = self.buffer.split_to(end).freeze();
            // Drop the delimiter
            let _ = self.buffer.split_to(1);
            self.scanned = 0;
            records.push(record);
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_record_size {
            return Err(ClamdError::Protocol(format!(
                "Record size {} exceeds maximum {}",
                self.buffer.len(),
                self.max_record_size
            )));
        }

        Ok(records)
    }

    /// Take whatever is left after the peer closed.
    ///
    /// `Some` means the stream ended inside a record.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
