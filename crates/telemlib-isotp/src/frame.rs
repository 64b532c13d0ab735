//! ISO-TP frame encoder/decoder.
//!
//! ISO 15765-2 multiplexes four frame types onto classic 8-byte CAN
//! frames, tagged by the high nibble of the first payload byte (the PCI).
//! This module handles the pure byte-level encoding and decoding; the
//! session logic lives in [`crate::session`].
//!
//! # Frame formats
//!
//! ```text
//! Single:      0x0L  <payload: L bytes>                 (L = 0..=7)
//! First:       0x1H  LL  <payload: first 6 bytes>       (len = H<<8 | LL)
//! Consecutive: 0x2S  <payload: up to 7 bytes>           (S = sequence 0..=15)
//! FlowControl: 0x3F  BS  ST                             (F = flow status)
//! ```
//!
//! Flow status `F`: 0 = clear to send, 1 = wait, 2 = overflow. `BS` is the
//! block size, `ST` the separation time in milliseconds.

use telemlib_core::error::{Error, Result};

/// PCI nibble for a single frame.
pub const PCI_SINGLE: u8 = 0x0;
/// PCI nibble for a first frame.
pub const PCI_FIRST: u8 = 0x1;
/// PCI nibble for a consecutive frame.
pub const PCI_CONSECUTIVE: u8 = 0x2;
/// PCI nibble for a flow-control frame.
pub const PCI_FLOW_CONTROL: u8 = 0x3;

/// Largest payload that fits a single frame.
pub const MAX_SINGLE_PAYLOAD: usize = 7;
/// Payload bytes carried inline by a first frame.
pub const FIRST_FRAME_PAYLOAD: usize = 6;
/// Payload bytes carried by one consecutive frame.
pub const MAX_CONSECUTIVE_PAYLOAD: usize = 7;
/// Largest message the 12-bit first-frame length field can describe.
pub const MAX_MESSAGE_LEN: usize = 4095;

/// Flow-control status sent by a receiver to pace the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// The receiver is ready; the sender may stream consecutive frames.
    ClearToSend,
    /// The receiver needs time; the sender should await another
    /// flow-control frame.
    Wait,
    /// The message does not fit the receiver's buffer; the sender must
    /// abort.
    Overflow,
}

impl FlowStatus {
    fn from_nibble(nibble: u8) -> Result<Self> {
        match nibble {
            0 => Ok(FlowStatus::ClearToSend),
            1 => Ok(FlowStatus::Wait),
            2 => Ok(FlowStatus::Overflow),
            other => Err(Error::Protocol(format!(
                "unknown flow status nibble 0x{other:X}"
            ))),
        }
    }

    fn nibble(&self) -> u8 {
        match self {
            FlowStatus::ClearToSend => 0,
            FlowStatus::Wait => 1,
            FlowStatus::Overflow => 2,
        }
    }
}

/// A decoded protocol control information header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePci {
    /// Complete message of `len` bytes in one frame.
    Single {
        /// Payload length, 0..=7.
        len: usize,
    },
    /// Start of a segmented message of `len` bytes; the frame carries the
    /// first six payload bytes.
    First {
        /// Total message length, 8..=4095.
        len: usize,
    },
    /// Continuation carrying up to 7 payload bytes.
    Consecutive {
        /// 4-bit sequence number.
        seq: u8,
    },
    /// Receiver pacing response to a first frame.
    FlowControl {
        /// Whether the sender may proceed.
        status: FlowStatus,
        /// Frames allowed per block (informational at this layer).
        block_size: u8,
        /// Minimum gap between consecutive frames, milliseconds.
        st_min: u8,
    },
}

/// Decode the PCI header of a received frame payload.
///
/// Any malformed header -- unknown type nibble, truncated frame, a
/// single-frame length that overruns the frame, or a first-frame length
/// small enough to have fit a single frame -- is a protocol error.
pub fn decode_pci(data: &[u8]) -> Result<FramePci> {
    let first = *data
        .first()
        .ok_or_else(|| Error::Protocol("empty CAN frame".into()))?;
    let low = first & 0x0F;

    match first >> 4 {
        PCI_SINGLE => {
            let len = low as usize;
            if len > MAX_SINGLE_PAYLOAD {
                return Err(Error::Protocol(format!(
                    "single frame declares {len} bytes"
                )));
            }
            if len > data.len() - 1 {
                return Err(Error::Protocol(format!(
                    "single frame declares {len} bytes but carries {}",
                    data.len() - 1
                )));
            }
            Ok(FramePci::Single { len })
        }

        PCI_FIRST => {
            if data.len() < 2 {
                return Err(Error::Protocol("truncated first frame".into()));
            }
            let len = ((low as usize) << 8) | data[1] as usize;
            if len <= MAX_SINGLE_PAYLOAD {
                return Err(Error::Protocol(format!(
                    "first frame declares {len} bytes, which fits a single frame"
                )));
            }
            Ok(FramePci::First { len })
        }

        PCI_CONSECUTIVE => Ok(FramePci::Consecutive { seq: low }),

        PCI_FLOW_CONTROL => {
            if data.len() < 3 {
                return Err(Error::Protocol("truncated flow control frame".into()));
            }
            Ok(FramePci::FlowControl {
                status: FlowStatus::from_nibble(low)?,
                block_size: data[1],
                st_min: data[2],
            })
        }

        other => Err(Error::Protocol(format!(
            "unknown PCI type nibble 0x{other:X}"
        ))),
    }
}

/// Encode a single frame carrying a complete payload of at most 7 bytes.
pub fn encode_single(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_SINGLE_PAYLOAD {
        return Err(Error::InvalidParameter(format!(
            "{} bytes does not fit a single frame",
            payload.len()
        )));
    }
    let mut data = Vec::with_capacity(1 + payload.len());
    data.push(payload.len() as u8);
    data.extend_from_slice(payload);
    Ok(data)
}

/// Encode the first frame of a segmented message.
///
/// `payload` is the complete message; the frame carries its length and
/// first six bytes.
pub fn encode_first(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() <= MAX_SINGLE_PAYLOAD {
        return Err(Error::InvalidParameter(
            "payload fits a single frame".into(),
        ));
    }
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(Error::InvalidParameter(format!(
            "{} bytes exceeds the {MAX_MESSAGE_LEN}-byte message limit",
            payload.len()
        )));
    }
    let len = payload.len();
    let mut data = Vec::with_capacity(8);
    data.push((PCI_FIRST << 4) | ((len >> 8) as u8 & 0x0F));
    data.push(len as u8);
    data.extend_from_slice(&payload[..FIRST_FRAME_PAYLOAD]);
    Ok(data)
}

/// Encode one consecutive frame with the given 4-bit sequence number.
pub fn encode_consecutive(seq: u8, chunk: &[u8]) -> Result<Vec<u8>> {
    if chunk.is_empty() || chunk.len() > MAX_CONSECUTIVE_PAYLOAD {
        return Err(Error::InvalidParameter(format!(
            "consecutive frame chunk of {} bytes",
            chunk.len()
        )));
    }
    let mut data = Vec::with_capacity(1 + chunk.len());
    data.push((PCI_CONSECUTIVE << 4) | (seq & 0x0F));
    data.extend_from_slice(chunk);
    Ok(data)
}

/// Encode a flow-control frame.
pub fn encode_flow_control(status: FlowStatus, block_size: u8, st_min: u8) -> Vec<u8> {
    vec![(PCI_FLOW_CONTROL << 4) | status.nibble(), block_size, st_min]
}
