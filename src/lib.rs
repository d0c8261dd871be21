//! # clamd-client
//!
//! Async client for the clamd control and scan protocol.
//!
//! Every operation opens its own connection to the daemon, sends one
//! command and decodes the reply into [`ScanResult`] records.
//!
//! ## Architecture
//!
//! - **Transport**: TCP (`tcp://host:port`) or local sockets (`unix:///path`, bare path)
//! - **Codec**: `n`/`z` prefixed command lines and INSTREAM chunk framing
//! - **Protocol**: record splitting, classification and the STATS aggregate
//! - **Client**: connect, send, decode on a background task, close when drained
//!
//! ## Example
//!
//! ```ignore
//! use clamd_client::{Clamd, EICAR};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> clamd_client::Result<()> {
//!     let clamd = Clamd::new("tcp://127.0.0.1:3310")?;
//!
//!     println!("{}", clamd.version().await?.raw);
//!
//!     let mut results = clamd.scan_bytes(EICAR, CancellationToken::new()).await?;
//!     while let Some(result) = results.next().await {
//!         let result = result?;
//!         if result.is_infected() {
//!             println!("found {}", result.description);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod observer;
pub mod protocol;
pub mod transport;

mod client;

pub use client::{Clamd, ClamdBuilder, EICAR};
pub use codec::{CommandMode, ScanCommand};
pub use config::ClamdConfig;
pub use error::{ClamdError, Result};
pub use observer::{SessionEvent, SessionObserver, StreamState};
pub use protocol::{ResultStream, ScanResult, Stats, Status};
pub use transport::Address;
