//! Service endpoints and instance lists

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::str::FromStr;

/// Network location of one service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form, suitable for `TcpStream::connect`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidArgument(format!("Missing port in endpoint: {}", s)))?;

        if host.is_empty() {
            return Err(Error::InvalidArgument(format!("Missing host in endpoint: {}", s)));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| Error::InvalidArgument(format!("Invalid port in '{}': {}", s, e)))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self::new(host, port))
    }
}

/// Snapshot of the live instances of one service.
///
/// The identity token is a fingerprint of the ordered endpoints; two lists
/// with the same token are treated as the same membership by selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceList {
    service_name: String,
    endpoints: Vec<Endpoint>,
    token: u64,
}

impl InstanceList {
    pub fn new(service_name: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        let token = identity_token(&endpoints);
        Self {
            service_name: service_name.into(),
            endpoints,
            token,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Whether `other` describes a different membership than this list
    pub fn differs_from(&self, other: &InstanceList) -> bool {
        self.len() != other.len() || self.token != other.token
    }
}

fn identity_token(endpoints: &[Endpoint]) -> u64 {
    let mut hasher = DefaultHasher::new();
    endpoints.hash(&mut hasher);
    hasher.finish()
}
