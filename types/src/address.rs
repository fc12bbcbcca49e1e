//! `host:port` address helpers and the HTTP/stream address pair a node
//! advertises.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Split `"host:port"` into its parts. IPv6 hosts may be bracketed
/// (`"[::1]:9000"`); the brackets are kept in the returned host.
pub fn split_host_port(addr: &str) -> Result<(&str, u16), TypesError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| TypesError::InvalidAddress(addr.to_string()))?;
    if host.is_empty() {
        return Err(TypesError::InvalidAddress(addr.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| TypesError::InvalidAddress(addr.to_string()))?;
    Ok((host, port))
}

/// Whether `host` is a wildcard bind address that nobody else can dial.
pub fn is_unspecified_host(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "[::]")
}

/// The pair of addresses a node is reached at: the request/response
/// endpoint and the persistent streaming endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressPair {
    pub http_address: String,
    pub stream_address: String,
}

impl AddressPair {
    pub fn new(http_address: impl Into<String>, stream_address: impl Into<String>) -> Self {
        Self {
            http_address: http_address.into(),
            stream_address: stream_address.into(),
        }
    }

    /// Both endpoints served from one listener.
    pub fn same(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            http_address: address.clone(),
            stream_address: address,
        }
    }

    /// Derive a reachable pair from the address that was actually used to
    /// reach the peer.
    ///
    /// `used` becomes the HTTP address. The stream address moves to the host
    /// of `used` while keeping its self-reported port, unless it shared the
    /// HTTP port, in which case it follows `used` entirely.
    pub fn rebase(&self, used: &str) -> Result<Self, TypesError> {
        let (used_host, _) = split_host_port(used)?;
        if self.stream_address == self.http_address {
            return Ok(Self::same(used));
        }
        let stream_address = match split_host_port(&self.stream_address) {
            Ok((_, stream_port)) => format!("{used_host}:{stream_port}"),
            Err(_) => used.to_string(),
        };
        Ok(Self {
            http_address: used.to_string(),
            stream_address,
        })
    }

    /// Replace the host of both addresses, keeping their ports.
    pub fn with_host(&self, host: &str) -> Result<Self, TypesError> {
        let (_, http_port) = split_host_port(&self.http_address)?;
        let (_, stream_port) = split_host_port(&self.stream_address)?;
        Ok(Self {
            http_address: format!("{host}:{http_port}"),
            stream_address: format!("{host}:{stream_port}"),
        })
    }
}

impl fmt::Display for AddressPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.http_address == self.stream_address {
            write!(f, "{}", self.http_address)
        } else {
            write!(f, "{} (stream {})", self.http_address, self.stream_address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_parses_hostnames_and_ipv6() {
        assert_eq!(split_host_port("A:9000").unwrap(), ("A", 9000));
        assert_eq!(split_host_port("[::1]:80").unwrap(), ("[::1]", 80));
        assert!(split_host_port("nohost").is_err());
        assert!(split_host_port(":9000").is_err());
        assert!(split_host_port("host:99999").is_err());
    }

    #[test]
    fn rebase_follows_used_address_when_shared() {
        let pair = AddressPair::same("172.17.0.2:9000");
        let rebased = pair.rebase("node-a.example:19000").unwrap();
        assert_eq!(rebased, AddressPair::same("node-a.example:19000"));
    }

    #[test]
    fn rebase_keeps_stream_port_on_used_host() {
        let pair = AddressPair::new("10.0.0.5:9000", "10.0.0.5:9001");
        let rebased = pair.rebase("public.example:9000").unwrap();
        assert_eq!(rebased.http_address, "public.example:9000");
        assert_eq!(rebased.stream_address, "public.example:9001");
    }

    #[test]
    fn with_host_swaps_host_only() {
        let pair = AddressPair::new("0.0.0.0:9000", "0.0.0.0:9001");
        let fixed = pair.with_host("192.168.1.7").unwrap();
        assert_eq!(fixed, AddressPair::new("192.168.1.7:9000", "192.168.1.7:9001"));
    }

    #[test]
    fn unspecified_hosts() {
        assert!(is_unspecified_host("0.0.0.0"));
        assert!(is_unspecified_host("[::]"));
        assert!(!is_unspecified_host("127.0.0.1"));
    }
}
