//! Codec module - command lines and INSTREAM chunk framing.
//!
//! - [`send_command`] - prefixed, terminated command line in one write
//! - [`send_chunk`] / [`send_eof`] - length-prefixed upload chunks
//!
//! # Example
//!
//! ```
//! use clamd_client::codec::{encode_command, encode_chunk_header, CommandMode};
//!
//! let line = encode_command(CommandMode::Newline, "PING").unwrap();
//! assert_eq!(&line[..], b"nPING\n");
//!
//! assert_eq!(encode_chunk_header(5), [0, 0, 0, 5]);
//! ```

mod chunk;
mod command;

pub use chunk::{
    decode_chunk_header, encode_chunk_header, send_chunk, send_eof, CHUNK_HEADER_SIZE,
    DEFAULT_CHUNK_SIZE, EOF_MARKER, MAX_CHUNK_SIZE,
};
pub use command::{encode_command, send_command, Command, CommandMode, ScanCommand};
