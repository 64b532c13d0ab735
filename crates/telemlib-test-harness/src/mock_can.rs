//! Mock CAN bus for deterministic testing of the ISO-TP codec.
//!
//! [`MockCanBus`] implements the [`CanBus`] trait with a scripted receive
//! queue and a log of transmitted frames. Receive on an empty queue sleeps
//! through the caller's timeout before failing, so deadline-sensitive
//! tests observe realistic timing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use telemlib_core::can::{CanBus, CanFrame};
use telemlib_core::error::{Error, Result};

/// A mock [`CanBus`] with a scripted inbound queue and a sent-frame log.
#[derive(Debug, Default)]
pub struct MockCanBus {
    /// Frames the next `receive()` calls will yield, in order.
    rx_queue: VecDeque<CanFrame>,
    /// Log of all frames sent through this bus.
    sent_log: Vec<CanFrame>,
}

impl MockCanBus {
    /// Create an empty mock bus.
    pub fn new() -> Self {
        MockCanBus {
            rx_queue: VecDeque::new(),
            sent_log: Vec::new(),
        }
    }

    /// Queue a frame for a future `receive()` call.
    pub fn push_frame(&mut self, frame: CanFrame) {
        self.rx_queue.push_back(frame);
    }

    /// Queue several frames at once.
    pub fn push_frames(&mut self, frames: impl IntoIterator<Item = CanFrame>) {
        self.rx_queue.extend(frames);
    }

    /// All frames sent through this bus, in order.
    pub fn sent(&self) -> &[CanFrame] {
        &self.sent_log
    }

    /// Number of scripted frames not yet received.
    pub fn remaining(&self) -> usize {
        self.rx_queue.len()
    }
}

#[async_trait]
impl CanBus for MockCanBus {
    async fn send(&mut self, frame: &CanFrame) -> Result<()> {
        self.sent_log.push(*frame);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<CanFrame> {
        match self.rx_queue.pop_front() {
            Some(frame) => Ok(frame),
            None => {
                // A silent bus really does make the caller wait out its
                // deadline; model that instead of failing instantly.
                tokio::time::sleep(timeout).await;
                Err(Error::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_frames_come_back_in_order() {
        let mut bus = MockCanBus::new();
        let a = CanFrame::new(0x6FF, &[0x01]).unwrap();
        let b = CanFrame::new(0x6FF, &[0x02]).unwrap();
        bus.push_frames([a, b]);

        assert_eq!(bus.receive(Duration::from_millis(10)).await.unwrap(), a);
        assert_eq!(bus.receive(Duration::from_millis(10)).await.unwrap(), b);
        assert_eq!(bus.remaining(), 0);
    }

    #[tokio::test]
    async fn empty_queue_waits_out_the_timeout() {
        let mut bus = MockCanBus::new();
        let timeout = Duration::from_millis(50);
        let start = tokio::time::Instant::now();
        let result = bus.receive(timeout).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
        assert!(start.elapsed() >= timeout);
    }

    #[tokio::test]
    async fn send_is_logged() {
        let mut bus = MockCanBus::new();
        let frame = CanFrame::new(0x7FF, &[0x10, 0x08]).unwrap();
        bus.send(&frame).await.unwrap();
        assert_eq!(bus.sent(), &[frame]);
    }
}
