//! Error types for telemlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! driver-layer errors are all captured here.

/// The error type for all telemlib operations.
///
/// Variants cover the full range of failure modes encountered when driving
/// a cellular modem over a serial link and a CAN bus: physical transport
/// failures, protocol decode errors, timeouts, and contended command slots.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port, CAN socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed AT response, modem-reported
    /// `ERROR`, bad ISO-TP frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a response.
    ///
    /// For the AT engine this typically means the modem is powered off or
    /// the baud rate is wrong; for ISO-TP it means the peer never produced
    /// the expected frame within the deadline.
    #[error("timeout waiting for response")]
    Timeout,

    /// Another command currently owns the in-flight slot.
    ///
    /// The AT engine permits exactly one outstanding command at a time.
    /// Racing senders do not queue: the loser receives `Busy` immediately,
    /// with nothing transmitted, and should retry later.
    #[error("another command is in flight")]
    Busy,

    /// A received payload exceeds the capacity reserved for it.
    #[error("buffer overflow: {0}")]
    Overflow(String),

    /// An invalid parameter was passed to a command or constructor.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("bad PCI nibble".into());
        assert_eq!(e.to_string(), "protocol error: bad PCI nibble");
    }

    #[test]
    fn error_display_timeout() {
        let e = Error::Timeout;
        assert_eq!(e.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_busy() {
        let e = Error::Busy;
        assert_eq!(e.to_string(), "another command is in flight");
    }

    #[test]
    fn error_display_overflow() {
        let e = Error::Overflow("modem reported 600 bytes, capacity 512".into());
        assert_eq!(
            e.to_string(),
            "buffer overflow: modem reported 600 bytes, capacity 512"
        );
    }

    #[test]
    fn error_display_invalid_parameter() {
        let e = Error::InvalidParameter("socket index out of range".into());
        assert_eq!(e.to_string(), "invalid parameter: socket index out of range");
    }

    #[test]
    fn error_display_not_connected() {
        let e = Error::NotConnected;
        assert_eq!(e.to_string(), "not connected");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
