//! Core types used throughout telemlib.
//!
//! These types provide a protocol-agnostic vocabulary shared by the AT
//! engine, the socket layer, and the modem driver.

use std::fmt;

use crate::error::{Error, Result};

/// Identifier of a modem-managed socket.
///
/// The modem exposes a fixed pool of sockets numbered `0..=6`; any index
/// beyond that range is rejected at construction, and the same bound is
/// enforced when parsing socket indices out of modem responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u8);

impl SocketId {
    /// Highest socket index the modem supports.
    pub const MAX_INDEX: u8 = 6;

    /// Create a `SocketId` from a raw index.
    ///
    /// Fails with [`Error::InvalidParameter`] for indices above
    /// [`MAX_INDEX`](SocketId::MAX_INDEX).
    pub fn new(index: u8) -> Result<Self> {
        if index > Self::MAX_INDEX {
            return Err(Error::InvalidParameter(format!(
                "socket index {index} exceeds modem maximum {}",
                Self::MAX_INDEX
            )));
        }
        Ok(SocketId(index))
    }

    /// Return the raw numeric index of this socket.
    pub fn index(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

/// Transport protocol of a modem socket.
///
/// `Dns` sockets are UDP sockets on the wire; the driver additionally
/// wraps their payload in a synthetic DNS query frame so that data can
/// traverse networks that only pass DNS traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProtocol {
    /// Stream socket (`AT+USOCR=6`).
    Tcp,
    /// Datagram socket (`AT+USOCR=17`).
    Udp,
    /// Datagram socket carrying DNS-tunneled payloads.
    Dns,
}

impl SocketProtocol {
    /// The protocol code the modem expects in `AT+USOCR`.
    ///
    /// These are IP protocol numbers: 6 for TCP, 17 for UDP. DNS tunnel
    /// sockets are plain UDP at this level.
    pub fn modem_code(&self) -> u8 {
        match self {
            SocketProtocol::Tcp => 6,
            SocketProtocol::Udp | SocketProtocol::Dns => 17,
        }
    }
}

impl fmt::Display for SocketProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketProtocol::Tcp => write!(f, "TCP"),
            SocketProtocol::Udp => write!(f, "UDP"),
            SocketProtocol::Dns => write!(f, "DNS"),
        }
    }
}

/// A remote endpoint as the modem understands it: dotted-quad or hostname
/// plus port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr {
    /// Host address string handed verbatim to the modem.
    pub host: String,
    /// Remote port.
    pub port: u16,
}

impl RemoteAddr {
    /// Create a remote endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        RemoteAddr {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_id_valid_range() {
        for i in 0..=SocketId::MAX_INDEX {
            assert!(SocketId::new(i).is_ok());
        }
    }

    #[test]
    fn socket_id_rejects_out_of_range() {
        assert!(matches!(
            SocketId::new(7),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            SocketId::new(255),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn socket_id_display() {
        assert_eq!(SocketId::new(3).unwrap().to_string(), "socket-3");
    }

    #[test]
    fn protocol_modem_codes() {
        assert_eq!(SocketProtocol::Tcp.modem_code(), 6);
        assert_eq!(SocketProtocol::Udp.modem_code(), 17);
        assert_eq!(SocketProtocol::Dns.modem_code(), 17);
    }

    #[test]
    fn remote_addr_display() {
        let addr = RemoteAddr::new("198.51.100.7", 4422);
        assert_eq!(addr.to_string(), "198.51.100.7:4422");
    }
}
