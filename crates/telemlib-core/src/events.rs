//! Asynchronous modem event types.
//!
//! Events are emitted by the AT engine and the socket layer through a
//! [`tokio::sync::broadcast`] channel. Unsolicited result codes (URCs) from
//! the modem -- data-available and socket-closed notifications -- surface
//! here, as do payloads drained from sockets by the driver's poll loop.

use bytes::Bytes;

use crate::types::SocketId;

/// An event emitted when modem or socket state changes.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow consumers may miss events under heavy inbound traffic.
#[derive(Debug, Clone)]
pub enum ModemEvent {
    /// The modem announced unread bytes on a socket (`+UUSORD` / `+UUSORF`).
    ///
    /// The driver's poll loop reacts by fetching the data; library users
    /// normally want [`Received`](ModemEvent::Received) instead.
    DataAvailable {
        /// Socket with pending data.
        socket: SocketId,
        /// Number of unread bytes the modem reported.
        len: usize,
    },

    /// The remote end closed a socket (`+UUSOCL`).
    SocketClosed {
        /// The socket that was closed.
        socket: SocketId,
    },

    /// Payload drained from a socket's receive path.
    Received {
        /// Source socket.
        socket: SocketId,
        /// The received bytes.
        data: Bytes,
    },
}
