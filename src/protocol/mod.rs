//! Protocol module - reply records, record framing and decoding.
//!
//! This module implements the read side of the protocol:
//! - Record buffer splitting socket reads at the record delimiter
//! - Record classification into [`ScanResult`]
//! - Decoder task producing a [`ResultStream`] and a [`Completion`] signal
//! - STATS aggregation

mod record;
mod record_buffer;
mod response;
mod stats;

pub use record::{ScanResult, Status};
pub use record_buffer::{RecordBuffer, DEFAULT_MAX_RECORD_SIZE};
pub use response::{read_response, Completion, ResultStream, DEFAULT_CHANNEL_CAPACITY};
pub use stats::{Stats, STATS_END};
