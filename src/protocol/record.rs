//! Reply record classification.
//!
//! Each record is matched, in order, against:
//!
//! 1. `<path>: <signature> FOUND`
//! 2. `<path>: <message> ERROR` (or a bare `<message> ERROR`)
//! 3. `OK` or `<path>: OK`
//! 4. a verdict suffix that cannot be split into path and detail: parse error
//! 5. anything else (`PONG`, `RELOADING`, version and STATS lines): unstructured
//!
//! # Example
//!
//! ```
//! use clamd_client::protocol::{ScanResult, Status};
//!
//! let rec = ScanResult::parse("eicar.txt: Win.Test.EICAR_HDB-1 FOUND");
//! assert_eq!(rec.status, Status::Found);
//! assert_eq!(rec.path, "eicar.txt");
//! assert_eq!(rec.description, "Win.Test.EICAR_HDB-1");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

const FOUND: &str = "FOUND";
const ERROR: &str = "ERROR";
const OK: &str = "OK";
const PATH_SEPARATOR: &str = ": ";

/// Outcome kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Target is clean.
    Ok,
    /// A signature matched.
    Found,
    /// The daemon could not scan the target.
    Error,
    /// Looked like a verdict but could not be decoded.
    ParseError,
    /// Not a scan verdict (`PONG`, version, STATS lines).
    Unstructured,
}

impl Status {
    /// Protocol spelling of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Found => "FOUND",
            Status::Error => "ERROR",
            Status::ParseError => "PARSE ERROR",
            Status::Unstructured => "UNSTRUCTURED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded record of daemon output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Record text without its terminator.
    pub raw: String,
    /// Outcome kind.
    pub status: Status,
    /// Scanned path; empty for non-scan replies.
    pub path: String,
    /// Signature name for FOUND, message for ERROR.
    pub description: String,
    /// Signature hash, when the daemon reports extended detection info.
    pub hash: String,
    /// Matched size in bytes, when the daemon reports extended detection info.
    pub size: u64,
}

impl ScanResult {
    /// Decode one record.
    pub fn parse(line: &str) -> Self {
        let text = line.trim_end_matches([' ', '\t', '\r', '\n', '\0']);

        if let Some(body) = text.strip_suffix(FOUND) {
            return match split_verdict(body) {
                Some((path, detail)) if !path.is_empty() && !detail.is_empty() => {
                    let mut rec = Self::with_status(text, Status::Found, path, detail);
                    rec.split_extended_info();
                    rec
                }
                _ => Self::parse_error(text, "FOUND record without path and signature"),
            };
        }

        if let Some(body) = text.strip_suffix(ERROR) {
            return match split_verdict(body) {
                Some((path, detail)) => Self::with_status(text, Status::Error, path, detail),
                None => match body.strip_suffix(' ') {
                    // Connection-level errors carry no path
                    Some(message) if !message.trim().is_empty() => {
                        Self::with_status(text, Status::Error, "", message.trim())
                    }
                    _ => Self::parse_error(text, "ERROR record without message"),
                },
            };
        }

        if text == OK {
            return Self::with_status(text, Status::Ok, "", "");
        }

        if let Some(body) = text.strip_suffix(OK) {
            return match body.strip_suffix(PATH_SEPARATOR) {
                Some(path) => Self::with_status(text, Status::Ok, path, ""),
                None => Self::parse_error(text, "OK record without path separator"),
            };
        }

        Self::with_status(text, Status::Unstructured, "", "")
    }

    /// A record that could not be decoded; `raw` is kept as received.
    pub fn parse_error(raw: &str, reason: &str) -> Self {
        Self {
            raw: raw.to_string(),
            status: Status::ParseError,
            path: String::new(),
            description: reason.to_string(),
            hash: String::new(),
            size: 0,
        }
    }

    fn with_status(raw: &str, status: Status, path: &str, description: &str) -> Self {
        Self {
            raw: raw.to_string(),
            status,
            path: path.to_string(),
            description: description.to_string(),
            hash: String::new(),
            size: 0,
        }
    }

    /// Split `Signature(hash:size)` into its parts. Left untouched if the
    /// suffix does not have that exact shape.
    fn split_extended_info(&mut self) {
        let Some(inner) = self.description.strip_suffix(')') else {
            return;
        };
        let Some((signature, info)) = inner.rsplit_once('(') else {
            return;
        };
        let Some((hash, size)) = info.rsplit_once(':') else {
            return;
        };
        let Ok(size) = size.parse::<u64>() else {
            return;
        };
        if signature.is_empty() || hash.is_empty() {
            return;
        }

        self.hash = hash.to_string();
        self.size = size;
        self.description = signature.to_string();
    }

    /// Check if a signature matched.
    #[inline]
    pub fn is_infected(&self) -> bool {
        self.status == Status::Found
    }

    /// Check if the daemon reported the target clean.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.status == Status::Ok
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.raw, self.status)
    }
}

/// Split `<path>: <detail> ` at the last path separator. The verdict word
/// must be preceded by a single space.
fn split_verdict(body: &str) -> Option<(&str, &str)> {
    let body = body.strip_suffix(' ')?;
    let (path, detail) = body.rsplit_once(PATH_SEPARATOR)?;
    Some((path, detail.trim()))
}
