//! Socket-layer state: ring buffers and per-socket bookkeeping.
//!
//! Each modem socket moves through `Created -> Open`, bouncing through
//! `Sending`/`Receiving` while the driver's poll loop drains its buffers,
//! and lands in `Closed` when the remote end hangs up. Callers never talk
//! to the modem directly: they enqueue into the send ring and dequeue from
//! the receive ring, and the driver turns ring contents into AT traffic.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use telemlib_core::error::{Error, Result};
use telemlib_core::types::{RemoteAddr, SocketId, SocketProtocol};

/// How long a socket may sit idle before the driver issues a keep-alive
/// write.
pub const KEEP_ALIVE_PAUSE: Duration = Duration::from_secs(10);

/// Lifecycle of a modem socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Allocated on the modem (`USOCR` done), not yet connected.
    Created,
    /// Connected and idle.
    Open,
    /// The poll loop is draining the send ring.
    Sending,
    /// The poll loop is fetching announced data.
    Receiving,
    /// The remote end closed the socket (`+UUSOCL`).
    Closed,
}

/// A bounded byte ring with its own interior synchronization.
///
/// Producers and consumers may run on different tasks; the ring's own
/// lock is the only coordination between them.
#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    inner: Mutex<VecDeque<u8>>,
}

impl RingBuffer {
    /// Create a ring holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append bytes to the tail.
    ///
    /// Fails with [`Error::Overflow`] if the ring cannot take all of
    /// `data`; nothing is enqueued in that case.
    pub fn push(&self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.len() + data.len() > self.capacity {
            return Err(Error::Overflow(format!(
                "ring holds {} of {} bytes, cannot take {} more",
                inner.len(),
                self.capacity,
                data.len()
            )));
        }
        inner.extend(data);
        Ok(())
    }

    /// Put bytes back at the head, ahead of everything queued.
    ///
    /// Used by the poll loop to return a chunk the modem refused; the
    /// capacity check is waived because the bytes were just popped.
    pub fn push_front(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        for &b in data.iter().rev() {
            inner.push_front(b);
        }
    }

    /// Remove and return up to `max` bytes from the head.
    pub fn pop(&self, max: usize) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.len().min(max);
        inner.drain(..n).collect()
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Driver-side state of one modem socket.
#[derive(Debug)]
pub struct ModemSocket {
    pub(crate) id: SocketId,
    pub(crate) protocol: SocketProtocol,
    pub(crate) remote: RemoteAddr,
    pub(crate) state: SocketState,
    /// Bytes queued by callers, drained to the modem by the poll loop.
    pub(crate) tx: RingBuffer,
    /// Bytes fetched from the modem, dequeued by callers.
    pub(crate) rx: RingBuffer,
    /// Unread byte count last announced by the modem.
    pub(crate) rx_pending: usize,
    /// When the driver last wrote to this socket (keep-alive clock).
    pub(crate) last_send: Instant,
    /// When the driver last fetched data from this socket.
    pub(crate) last_recv: Instant,
}

impl ModemSocket {
    /// Create driver state for a freshly allocated socket.
    pub(crate) fn new(
        id: SocketId,
        protocol: SocketProtocol,
        remote: RemoteAddr,
        ring_capacity: usize,
    ) -> Self {
        let now = Instant::now();
        ModemSocket {
            id,
            protocol,
            remote,
            state: SocketState::Created,
            tx: RingBuffer::new(ring_capacity),
            rx: RingBuffer::new(ring_capacity),
            rx_pending: 0,
            last_send: now,
            last_recv: now,
        }
    }

    /// Whether the idle clock has run past `pause` on an open socket with
    /// nothing queued to send. Traffic in either direction resets the
    /// clock.
    pub(crate) fn needs_keep_alive(&self, pause: Duration) -> bool {
        self.state == SocketState::Open
            && self.tx.is_empty()
            && self.last_send.elapsed() >= pause
            && self.last_recv.elapsed() >= pause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_push_pop_fifo() {
        let ring = RingBuffer::new(16);
        ring.push(b"abc").unwrap();
        ring.push(b"def").unwrap();
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.pop(4), b"abcd");
        assert_eq!(ring.pop(10), b"ef");
        assert!(ring.is_empty());
    }

    #[test]
    fn ring_rejects_overflow_atomically() {
        let ring = RingBuffer::new(4);
        ring.push(b"abc").unwrap();
        assert!(matches!(ring.push(b"de"), Err(Error::Overflow(_))));
        // The failed push left the ring untouched.
        assert_eq!(ring.pop(8), b"abc");
    }

    #[test]
    fn ring_push_front_restores_order() {
        let ring = RingBuffer::new(16);
        ring.push(b"world").unwrap();
        ring.push_front(b"hello ");
        assert_eq!(ring.pop(16), b"hello world");
    }

    #[test]
    fn ring_pop_empty() {
        let ring = RingBuffer::new(4);
        assert!(ring.pop(4).is_empty());
    }

    #[test]
    fn fresh_socket_is_created_and_quiet() {
        let socket = ModemSocket::new(
            SocketId::new(0).unwrap(),
            SocketProtocol::Tcp,
            RemoteAddr::new("198.51.100.7", 4422),
            64,
        );
        assert_eq!(socket.state, SocketState::Created);
        assert!(!socket.needs_keep_alive(Duration::from_secs(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_fires_only_after_pause() {
        let mut socket = ModemSocket::new(
            SocketId::new(1).unwrap(),
            SocketProtocol::Tcp,
            RemoteAddr::new("198.51.100.7", 4422),
            64,
        );
        socket.state = SocketState::Open;
        let pause = Duration::from_secs(10);

        assert!(!socket.needs_keep_alive(pause));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(socket.needs_keep_alive(pause));

        // Traffic resets the clock.
        socket.last_send = Instant::now();
        assert!(!socket.needs_keep_alive(pause));

        // Queued data suppresses keep-alive; the drain itself writes.
        tokio::time::advance(Duration::from_secs(11)).await;
        socket.tx.push(b"x").unwrap();
        assert!(!socket.needs_keep_alive(pause));
    }
}
