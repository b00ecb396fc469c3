//! Shareable session links
//!
//! Format: `aphrodite://<host>:<port>/<session-id>`

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{Error, Result};

const SCHEME: &str = "aphrodite://";

/// Where a session lives and which one it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLink {
    pub addr: SocketAddr,
    pub session_id: Uuid,
}

impl SessionLink {
    pub fn new(addr: SocketAddr, session_id: Uuid) -> Self {
        Self { addr, session_id }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::Protocol(format!("Invalid session link: missing {}", SCHEME)))?;

        let (host_port, id) = rest.split_once('/').ok_or_else(|| {
            Error::Protocol("Invalid session link: expected host:port/session-id".into())
        })?;

        let addr: SocketAddr = host_port.parse().map_err(|_| {
            Error::Protocol(format!("Invalid session link: bad address '{}'", host_port))
        })?;

        let id = id.trim_end_matches('/');
        let session_id = Uuid::from_str(id)
            .map_err(|_| Error::Protocol(format!("Invalid session link: bad session id '{}'", id)))?;

        Ok(Self { addr, session_id })
    }
}

impl fmt::Display for SessionLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.addr, self.session_id)
    }
}

impl FromStr for SessionLink {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_link_parse_ipv4() {
        let link =
            SessionLink::parse("aphrodite://192.168.1.1:7431/550e8400-e29b-41d4-a716-446655440000")
                .unwrap();

        assert_eq!(link.addr.ip(), IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(link.addr.port(), 7431);
        assert_eq!(
            link.session_id.to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_link_parse_ipv6_and_display() {
        let text = "aphrodite://[::1]:7431/550e8400-e29b-41d4-a716-446655440000";
        let link: SessionLink = text.parse().unwrap();

        assert!(link.addr.is_ipv6());
        assert_eq!(link.to_string(), text);
    }

    #[test]
    fn test_link_parse_invalid() {
        assert!(SessionLink::parse("http://localhost/abc").is_err());
        assert!(SessionLink::parse("aphrodite://127.0.0.1:7431").is_err());
        assert!(SessionLink::parse("aphrodite://localhost:7431/550e8400-e29b-41d4-a716-446655440000").is_err());
        assert!(SessionLink::parse("aphrodite://127.0.0.1:7431/not-a-uuid").is_err());
    }
}
