//! Peer addresses.
//!
//! A [`PeerAddress`] names a remote listener by host and port. Hosts may be
//! IP literals or names resolvable on the local network; resolution happens
//! when a client connects, not when the address is parsed.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::DEFAULT_LISTEN_PORT;

/// Remote endpoint of a peer listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Host name or IP literal (IPv6 without brackets)
    pub host: String,
    /// Listening port
    pub port: u16,
}

impl PeerAddress {
    /// Create a peer address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a peer address.
    ///
    /// Accepts formats:
    /// - `HOST` (e.g., `192.168.1.100` or `desk.local`) - uses default port 8000
    /// - `HOST:PORT` (e.g., `192.168.1.100:8001`)
    /// - `[IPv6]` or `[IPv6]:PORT` (e.g., `[::1]:8001`)
    ///
    /// # Examples
    ///
    /// ```
    /// use peerlink_core::PeerAddress;
    ///
    /// let addr = PeerAddress::parse("192.168.1.100:8001").unwrap();
    /// assert_eq!(addr.port, 8001);
    ///
    /// let addr = PeerAddress::parse("192.168.1.100").unwrap();
    /// assert_eq!(addr.port, 8000);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the string is not a host with an
    /// optional numeric port.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(invalid_format(input));
        }

        if let Ok(addr) = input.parse::<SocketAddr>() {
            return Ok(Self::from(addr));
        }

        if let Some(inner) = input.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let ip: IpAddr = inner.parse().map_err(|_| invalid_format(input))?;
            return Ok(Self::new(ip.to_string(), DEFAULT_LISTEN_PORT));
        }

        if let Ok(ip) = input.parse::<IpAddr>() {
            return Ok(Self::new(ip.to_string(), DEFAULT_LISTEN_PORT));
        }

        match input.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                validate_host(host, input)?;
                let port: u16 = port.parse().map_err(|_| {
                    Error::InvalidInput(format!(
                        "Invalid port '{port}'. Port must be a number between 1 and 65535"
                    ))
                })?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(invalid_format(input)),
            None => {
                validate_host(input, input)?;
                Ok(Self::new(input, DEFAULT_LISTEN_PORT))
            }
        }
    }

    /// The `host:port` string passed to the resolver.
    pub(crate) fn connect_target(&self) -> String {
        self.to_string()
    }
}

fn invalid_format(input: &str) -> Error {
    Error::InvalidInput(format!(
        "Invalid peer address '{input}'. Use HOST or HOST:PORT (e.g., 192.168.1.100:8000)"
    ))
}

fn validate_host(host: &str, input: &str) -> Result<()> {
    let valid = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
    if valid {
        Ok(())
    } else {
        Err(invalid_format(input))
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for PeerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_only() {
        let addr = PeerAddress::parse("192.168.1.100").unwrap();
        assert_eq!(addr.host, "192.168.1.100");
        assert_eq!(addr.port, DEFAULT_LISTEN_PORT);
    }

    #[test]
    fn test_parse_ipv4_with_port() {
        let addr: PeerAddress = "192.168.1.100:8001".parse().unwrap();
        assert_eq!(addr, PeerAddress::new("192.168.1.100", 8001));
    }

    #[test]
    fn test_parse_ipv6() {
        let addr = PeerAddress::parse("[::1]").unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, DEFAULT_LISTEN_PORT);

        let addr = PeerAddress::parse("[2001:db8::1]:9000").unwrap();
        assert_eq!(addr.host, "2001:db8::1");
        assert_eq!(addr.port, 9000);
        assert_eq!(addr.to_string(), "[2001:db8::1]:9000");
    }

    #[test]
    fn test_parse_hostname() {
        let addr = PeerAddress::parse("desk-01.local:8002").unwrap();
        assert_eq!(addr.host, "desk-01.local");
        assert_eq!(addr.port, 8002);

        let addr = PeerAddress::parse("localhost").unwrap();
        assert_eq!(addr.to_string(), "localhost:8000");
    }

    #[test]
    fn test_parse_whitespace() {
        let addr = PeerAddress::parse("  10.0.0.5:8000  ").unwrap();
        assert_eq!(addr.host, "10.0.0.5");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(PeerAddress::parse("").is_err());
        assert!(PeerAddress::parse("10.0.0.5:abc").is_err());
        assert!(PeerAddress::parse("10.0.0.5:70000").is_err());
        assert!(PeerAddress::parse("bad host:8000").is_err());
        assert!(PeerAddress::parse("[nope]").is_err());
    }

    #[test]
    fn test_from_socket_addr() {
        let socket: SocketAddr = "127.0.0.1:4242".parse().unwrap();
        let addr = PeerAddress::from(socket);
        assert_eq!(addr.to_string(), "127.0.0.1:4242");
        assert_eq!(addr.connect_target(), "127.0.0.1:4242");
    }
}
