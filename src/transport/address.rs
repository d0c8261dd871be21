//! Daemon endpoint addresses.
//!
//! Accepted forms:
//! - `tcp://host:port` (IPv6 hosts in brackets: `tcp://[::1]:3310`)
//! - `unix:///path/to/clamd.sock`
//! - any other string, taken as a literal Unix socket path
//!
//! # Example
//!
//! ```
//! use clamd_client::transport::Address;
//!
//! let addr: Address = "tcp://127.0.0.1:3310".parse().unwrap();
//! assert_eq!(addr, Address::Tcp { host: "127.0.0.1".into(), port: 3310 });
//!
//! let addr: Address = "/var/run/clamav/clamd.ctl".parse().unwrap();
//! assert!(addr.is_unix());
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ClamdError, Result};

const TCP_SCHEME: &str = "tcp://";
const UNIX_SCHEME: &str = "unix://";

/// A parsed daemon endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// TCP endpoint.
    Tcp { host: String, port: u16 },
    /// Unix domain socket path.
    Unix { path: PathBuf },
}

impl Address {
    /// Parse an address string.
    ///
    /// Fails before any network activity when the string is empty or a
    /// `tcp://` / `unix://` address is incomplete.
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(ClamdError::Address("empty address".to_string()));
        }

        if let Some(rest) = s.strip_prefix(TCP_SCHEME) {
            return parse_tcp(s, rest);
        }

        if let Some(rest) = s.strip_prefix(UNIX_SCHEME) {
            if rest.is_empty() {
                return Err(ClamdError::Address(format!("missing socket path in {:?}", s)));
            }
            return Ok(Address::Unix {
                path: PathBuf::from(rest),
            });
        }

        if s.contains('\0') {
            return Err(ClamdError::Address(format!("NUL byte in socket path {:?}", s)));
        }

        Ok(Address::Unix {
            path: PathBuf::from(s),
        })
    }

    /// Check if this is a TCP endpoint.
    #[inline]
    pub fn is_tcp(&self) -> bool {
        matches!(self, Address::Tcp { .. })
    }

    /// Check if this is a Unix socket endpoint.
    #[inline]
    pub fn is_unix(&self) -> bool {
        matches!(self, Address::Unix { .. })
    }
}

fn parse_tcp(original: &str, rest: &str) -> Result<Address> {
    let invalid = |why: &str| ClamdError::Address(format!("{} in {:?}", why, original));

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 host"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| invalid("missing port"))?;
        (host, port)
    } else {
        rest.rsplit_once(':').ok_or_else(|| invalid("missing port"))?
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
    if port == 0 {
        return Err(invalid("port 0"));
    }

    Ok(Address::Tcp {
        host: host.to_string(),
        port,
    })
}

impl FromStr for Address {
    type Err = ClamdError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } if host.contains(':') => {
                write!(f, "{}[{}]:{}", TCP_SCHEME, host, port)
            }
            Address::Tcp { host, port } => write!(f, "{}{}:{}", TCP_SCHEME, host, port),
            Address::Unix { path } => write!(f, "{}{}", UNIX_SCHEME, path.display()),
        }
    }
}
