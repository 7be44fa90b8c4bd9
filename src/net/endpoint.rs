//! Connection peer identity.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Immutable (ip, port) value identifying one side of a connection.
/// Equality is on both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndPoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl EndPoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl From<SocketAddr> for EndPoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_on_both_fields() {
        let a = EndPoint::new("127.0.0.1".parse().unwrap(), 9000);
        let b = EndPoint::new("127.0.0.1".parse().unwrap(), 9000);
        let c = EndPoint::new("127.0.0.1".parse().unwrap(), 9001);
        let d = EndPoint::new("10.0.0.1".parse().unwrap(), 9000);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_from_socket_addr() {
        let addr: SocketAddr = "192.168.1.5:4242".parse().unwrap();
        let ep = EndPoint::from(addr);
        assert_eq!(ep.ip, addr.ip());
        assert_eq!(ep.port, 4242);
        assert_eq!(ep.to_string(), "192.168.1.5:4242");
    }
}
