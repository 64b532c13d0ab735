//! CAN bus trait and frame type.
//!
//! The [`CanBus`] trait abstracts over the raw CAN interface consumed by
//! the ISO-TP codec in `telemlib-isotp`. A Linux SocketCAN implementation
//! lives in `telemlib-transport` (behind the `socketcan` feature); a
//! scripted mock lives in `telemlib-test-harness`.
//!
//! Only classic CAN with standard (11-bit) identifiers is modeled -- the
//! diagnostic link this library serves never uses extended IDs, and the
//! ISO-TP layer rejects them outright.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Highest valid standard (11-bit) CAN identifier.
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// A classic CAN data frame with a standard identifier.
///
/// Payload length (DLC) is 0..=8 bytes. The data array is always 8 bytes;
/// [`data()`](CanFrame::data) returns only the valid prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u16,
    dlc: u8,
    data: [u8; 8],
}

impl CanFrame {
    /// Create a new frame.
    ///
    /// Fails with [`Error::InvalidParameter`] if `id` exceeds 11 bits or
    /// `data` is longer than 8 bytes.
    pub fn new(id: u16, data: &[u8]) -> Result<Self> {
        if id > MAX_STANDARD_ID {
            return Err(Error::InvalidParameter(format!(
                "CAN id 0x{id:X} exceeds the standard 11-bit range"
            )));
        }
        if data.len() > 8 {
            return Err(Error::InvalidParameter(format!(
                "CAN payload of {} bytes exceeds 8",
                data.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Ok(CanFrame {
            id,
            dlc: data.len() as u8,
            data: buf,
        })
    }

    /// The standard (11-bit) identifier.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// The valid payload bytes (`dlc` long).
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// The data length code (0..=8).
    pub fn dlc(&self) -> usize {
        self.dlc as usize
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X} [{}]", self.id, self.dlc)?;
        for b in self.data() {
            write!(f, " {b:02X}")?;
        }
        Ok(())
    }
}

/// Asynchronous frame-level CAN interface.
///
/// `receive` blocks up to `timeout` for the next frame on the bus;
/// filtering by identifier is the caller's job (the ISO-TP session
/// discards frames that do not carry its peer's ID).
#[async_trait]
pub trait CanBus: Send + Sync {
    /// Transmit one frame.
    async fn send(&mut self, frame: &CanFrame) -> Result<()>;

    /// Receive the next frame, waiting up to `timeout`.
    ///
    /// Returns [`Error::Timeout`](crate::error::Error::Timeout) if the bus
    /// stays silent past the deadline.
    async fn receive(&mut self, timeout: Duration) -> Result<CanFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_new_valid() {
        let frame = CanFrame::new(0x7FF, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(frame.id(), 0x7FF);
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn frame_new_empty_payload() {
        let frame = CanFrame::new(0x123, &[]).unwrap();
        assert_eq!(frame.dlc(), 0);
        assert!(frame.data().is_empty());
    }

    #[test]
    fn frame_new_full_payload() {
        let frame = CanFrame::new(0x100, &[0xAA; 8]).unwrap();
        assert_eq!(frame.dlc(), 8);
        assert_eq!(frame.data(), &[0xAA; 8]);
    }

    #[test]
    fn frame_rejects_extended_id() {
        let result = CanFrame::new(0x800, &[0x00]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn frame_rejects_oversized_payload() {
        let result = CanFrame::new(0x100, &[0u8; 9]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn frame_display() {
        let frame = CanFrame::new(0x6FF, &[0x21, 0x65, 0x66]).unwrap();
        assert_eq!(frame.to_string(), "0x6FF [3] 21 65 66");
    }
}
