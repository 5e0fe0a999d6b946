//! Backend pool members and the least-traffic selector.

mod least_traffic;

pub use least_traffic::LeastTraffic;

use hyper::http::uri::Authority;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing a backend address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendParseError {
    #[error("backend address cannot be empty")]
    Empty,

    #[error("invalid backend address '{0}': expected host:port")]
    InvalidAuthority(String),

    #[error("backend address '{0}' must include a port")]
    MissingPort(String),
}

/// A backend server, identified by its `host:port` authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Backend(String);

impl Backend {
    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Backend {
    type Err = BackendParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BackendParseError::Empty);
        }

        // Reject anything that carries a scheme, path or userinfo
        if s.contains('/') || s.contains('@') {
            return Err(BackendParseError::InvalidAuthority(s.to_string()));
        }

        let authority: Authority = s
            .parse()
            .map_err(|_| BackendParseError::InvalidAuthority(s.to_string()))?;

        if authority.port_u16().is_none() {
            return Err(BackendParseError::MissingPort(s.to_string()));
        }

        Ok(Self(authority.as_str().to_string()))
    }
}

impl TryFrom<String> for Backend {
    type Error = BackendParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Backend> for String {
    fn from(backend: Backend) -> Self {
        backend.0
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Backend {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
