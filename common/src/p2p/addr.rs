//! Normalized network addresses.
//!
//! A [`NetAddr`] identifies a remote host independently of the port it connected from.
//! IPv4-mapped IPv6 addresses are folded into their IPv4 form, so that the same host
//! can't escape discouragement by switching address families.
use std::fmt;
use std::net;
use std::str::FromStr;

use thiserror::Error;

/// Length in bytes of a decoded Tor v3 onion address: public key, checksum and version.
const ONION_V3_LEN: usize = 35;
/// Length of the base32 encoding of an onion address, without the `.onion` suffix.
const ONION_V3_ENCODED_LEN: usize = 56;
/// Onion service version byte.
const ONION_V3_VERSION: u8 = 3;
/// Base32 alphabet, lowercase (RFC 4648).
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Error parsing an address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not an IP address or onion address.
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    /// Invalid onion address.
    #[error("invalid onion address `{0}`: {1}")]
    InvalidOnion(String, &'static str),
    /// Missing or invalid port.
    #[error("invalid port in `{0}`")]
    InvalidPort(String),
}

/// A Tor v3 onion service identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OnionAddr([u8; ONION_V3_LEN]);

impl fmt::Debug for OnionAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionAddr({})", self)
    }
}

impl fmt::Display for OnionAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buffer = 0u16;
        let mut bits = 0;

        for byte in self.0 {
            buffer = (buffer << 8) | byte as u16;
            bits += 8;

            while bits >= 5 {
                bits -= 5;
                let index = (buffer >> bits) & 0x1f;
                write!(f, "{}", BASE32_ALPHABET[index as usize] as char)?;
            }
        }
        write!(f, ".onion")
    }
}

impl FromStr for OnionAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |msg| ParseError::InvalidOnion(s.to_owned(), msg);
        let lower = s.to_ascii_lowercase();
        let encoded = lower.strip_suffix(".onion").ok_or_else(|| err("missing suffix"))?;

        if encoded.len() != ONION_V3_ENCODED_LEN {
            return Err(err("only v3 addresses are supported"));
        }
        let mut bytes = [0u8; ONION_V3_LEN];
        let mut buffer = 0u16;
        let mut bits = 0;
        let mut i = 0;

        for c in encoded.bytes() {
            let value = BASE32_ALPHABET
                .iter()
                .position(|a| *a == c)
                .ok_or_else(|| err("invalid character"))?;

            buffer = (buffer << 5) | value as u16;
            bits += 5;

            if bits >= 8 {
                bits -= 8;
                bytes[i] = (buffer >> bits) as u8;
                i += 1;
            }
        }
        if bytes[ONION_V3_LEN - 1] != ONION_V3_VERSION {
            return Err(err("unknown version"));
        }
        Ok(Self(bytes))
    }
}

/// A network address, without port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NetAddr {
    /// IPv4 address.
    V4(net::Ipv4Addr),
    /// IPv6 address. Never an IPv4-mapped address.
    V6(net::Ipv6Addr),
    /// Tor v3 onion service.
    Onion(OnionAddr),
}

impl NetAddr {
    /// Whether this is a loopback or unspecified address.
    pub fn is_local(&self) -> bool {
        match self {
            Self::V4(ip) => ip.is_loopback() || ip.octets()[0] == 0,
            Self::V6(ip) => ip.is_loopback() || ip.is_unspecified(),
            Self::Onion(_) => false,
        }
    }

    /// Whether it makes sense to discourage this address.
    pub fn is_discourageable(&self) -> bool {
        !self.is_local()
    }
}

impl From<net::IpAddr> for NetAddr {
    fn from(ip: net::IpAddr) -> Self {
        match ip {
            net::IpAddr::V4(ip) => Self::V4(ip),
            net::IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
                Some(v4) => Self::V4(v4),
                None => Self::V6(ip),
            },
        }
    }
}

impl From<net::Ipv4Addr> for NetAddr {
    fn from(ip: net::Ipv4Addr) -> Self {
        Self::V4(ip)
    }
}

impl From<net::Ipv6Addr> for NetAddr {
    fn from(ip: net::Ipv6Addr) -> Self {
        Self::from(net::IpAddr::V6(ip))
    }
}

impl From<[u8; 4]> for NetAddr {
    fn from(octets: [u8; 4]) -> Self {
        Self::V4(octets.into())
    }
}

impl From<OnionAddr> for NetAddr {
    fn from(onion: OnionAddr) -> Self {
        Self::Onion(onion)
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(ip) => write!(f, "{}", ip),
            Self::V6(ip) => write!(f, "{}", ip),
            Self::Onion(onion) => write!(f, "{}", onion),
        }
    }
}

impl FromStr for NetAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(ip) = s.parse::<net::IpAddr>() {
            return Ok(Self::from(ip));
        }
        if s.to_ascii_lowercase().ends_with(".onion") {
            return s.parse::<OnionAddr>().map(Self::Onion);
        }
        Err(ParseError::InvalidAddress(s.to_owned()))
    }
}

/// A network address with a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Service {
    /// Host address.
    pub addr: NetAddr,
    /// Port.
    pub port: u16,
}

impl Service {
    /// Create a new service.
    pub fn new(addr: impl Into<NetAddr>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }
}

impl From<net::SocketAddr> for Service {
    fn from(addr: net::SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            NetAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
            addr => write!(f, "{}:{}", addr, self.port),
        }
    }
}

impl FromStr for Service {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<net::SocketAddr>() {
            return Ok(Self::from(addr));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidPort(s.to_owned()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidPort(s.to_owned()))?;

        Ok(Self::new(host.parse::<NetAddr>()?, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONION: &str = "pg6mmjiyjmcrsslvykfwnntlaru7p5svn6y2ymmju6nubxndf4pscryd.onion";

    #[test]
    fn test_ipv4_mapped_is_normalized() {
        let mapped: net::Ipv6Addr = "::ffff:1.2.3.4".parse().unwrap();

        assert_eq!(NetAddr::from(mapped), NetAddr::from([1, 2, 3, 4]));
        assert_eq!(
            "::ffff:1.2.3.4".parse::<NetAddr>().unwrap(),
            "1.2.3.4".parse::<NetAddr>().unwrap()
        );
        assert!(matches!(
            "2001:db8::1".parse::<NetAddr>().unwrap(),
            NetAddr::V6(_)
        ));
    }

    #[test]
    fn test_onion_roundtrip() {
        let addr = ONION.parse::<NetAddr>().unwrap();

        assert!(matches!(addr, NetAddr::Onion(_)));
        assert!(addr.is_discourageable());
        assert_eq!(addr.to_string(), ONION);
        assert_eq!(ONION.to_uppercase().parse::<NetAddr>().unwrap(), addr);
    }

    #[test]
    fn test_onion_invalid() {
        assert!("abc.onion".parse::<NetAddr>().is_err());
        assert!(ONION.replace('p', "1").parse::<NetAddr>().is_err());
        assert!("example.com".parse::<NetAddr>().is_err());
    }

    #[test]
    fn test_local() {
        assert!(NetAddr::from([127, 0, 0, 1]).is_local());
        assert!(NetAddr::from([0, 0, 0, 0]).is_local());
        assert!(NetAddr::from(net::Ipv6Addr::LOCALHOST).is_local());
        assert!(!NetAddr::from([8, 8, 8, 8]).is_local());
        assert!(NetAddr::from([8, 8, 8, 8]).is_discourageable());
        assert!(!NetAddr::from([127, 0, 0, 1]).is_discourageable());
    }

    #[test]
    fn test_service() {
        let service = "1.2.3.4:8333".parse::<Service>().unwrap();
        assert_eq!(service, Service::new([1, 2, 3, 4], 8333));
        assert_eq!(service.to_string(), "1.2.3.4:8333");

        let service = "[2001:db8::1]:18333".parse::<Service>().unwrap();
        assert_eq!(service.to_string(), "[2001:db8::1]:18333");

        let service = format!("{}:9050", ONION).parse::<Service>().unwrap();
        assert!(matches!(service.addr, NetAddr::Onion(_)));
        assert_eq!(service.port, 9050);

        assert!("1.2.3.4".parse::<Service>().is_err());
    }
}
