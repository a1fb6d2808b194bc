//! Network families and `host:port` parsing.

use crate::error::TransportError;
use std::fmt;
use std::str::FromStr;

/// Network family requested for a dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl Network {
    /// Returns the IPv4-only variant of this family.
    ///
    /// Every family collapses onto `Tcp4` or `Udp4`; this layer never
    /// hands an IPv6 family downstream.
    pub fn force_ipv4(self) -> Self {
        match self {
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => Network::Tcp4,
            Network::Udp | Network::Udp4 | Network::Udp6 => Network::Udp4,
        }
    }

    pub fn is_ipv4_only(self) -> bool {
        matches!(self, Network::Tcp4 | Network::Udp4)
    }

    pub fn is_stream(self) -> bool {
        matches!(self, Network::Tcp | Network::Tcp4 | Network::Tcp6)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            _ => Err(TransportError::AddressParse {
                addr: s.to_string(),
                reason: "unknown network",
            }),
        }
    }
}

/// Splits `host:port` into its parts.
///
/// Bracketed hosts (`[::1]:443`) are unwrapped. A missing port, an empty
/// host or a non-numeric port is an `AddressParse` error.
pub fn split_host_port(addr: &str) -> Result<(&str, u16), TransportError> {
    let parse_err = |reason| TransportError::AddressParse {
        addr: addr.to_string(),
        reason,
    };

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| parse_err("missing ']' in address"))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| parse_err("missing port in address"))?;
        (host, port)
    } else {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| parse_err("missing port in address"))?;
        if host.contains(':') {
            return Err(parse_err("too many colons in address"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(parse_err("missing host in address"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| parse_err("invalid port"))?;

    Ok((host, port))
}
