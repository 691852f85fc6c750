use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An IPv4 endpoint. The canonical text form is `a.b.c.d:port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    ip: u32,
    port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("expected four dot-separated octets, got {0:?}")]
    BadHost(String),
    #[error("missing ':port' suffix in {0:?}")]
    MissingPort(String),
    #[error("invalid port in {0:?}")]
    BadPort(String),
    #[error("no IPv4 address found for {0:?}")]
    Unresolved(String),
    #[error("name lookup failed: {0}")]
    Lookup(#[from] std::io::Error),
}

impl Address {
    pub fn new(ip: u32, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> u32 {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve a host name (or dotted quad) to the first IPv4 address it
    /// maps to.
    pub fn resolve(host: &str, port: u16) -> Result<Self, AddressError> {
        let addrs = (host, port).to_socket_addrs()?;
        for addr in addrs {
            if let SocketAddr::V4(v4) = addr {
                return Ok(Self::from(v4));
            }
        }
        Err(AddressError::Unresolved(host.to_string()))
    }

    pub fn to_socket_addr(self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(self.ip), self.port))
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            ip: u32::from(*addr.ip()),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.ip.to_be_bytes();
        write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;

        let port: u16 = port
            .parse()
            .map_err(|_| AddressError::BadPort(s.to_string()))?;

        let mut octets = [0u8; 4];
        let mut parts = host.split('.');
        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| AddressError::BadHost(host.to_string()))?;
            *octet = part
                .parse()
                .map_err(|_| AddressError::BadHost(host.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddressError::BadHost(host.to_string()));
        }

        Ok(Self {
            ip: u32::from_be_bytes(octets),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse_roundtrip() {
        let addr = Address::new(0x7F00_0001, 27050);
        assert_eq!(addr.to_string(), "127.0.0.1:27050");

        let parsed: Address = "127.0.0.1:27050".parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        assert!(matches!(
            "10.0.0.1".parse::<Address>(),
            Err(AddressError::MissingPort(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_octets() {
        assert!("10.0.1:80".parse::<Address>().is_err());
        assert!("10.0.0.1.5:80".parse::<Address>().is_err());
        assert!("10.0.0.256:80".parse::<Address>().is_err());
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(matches!(
            "10.0.0.1:war".parse::<Address>(),
            Err(AddressError::BadPort(_))
        ));
        assert!("10.0.0.1:99999".parse::<Address>().is_err());
    }

    #[test]
    fn test_socket_addr_roundtrip() {
        let addr: Address = "192.168.1.7:4000".parse().unwrap();
        let sock = addr.to_socket_addr();
        assert_eq!(sock.to_string(), "192.168.1.7:4000");

        match sock {
            SocketAddr::V4(v4) => assert_eq!(Address::from(v4), addr),
            SocketAddr::V6(_) => panic!("expected V4"),
        }
    }

    #[test]
    fn test_resolve_loopback() {
        let addr = Address::resolve("localhost", 9000).unwrap();
        assert_eq!(addr.port(), 9000);
        assert_eq!(addr.ip().to_be_bytes()[0], 127);
    }
}
