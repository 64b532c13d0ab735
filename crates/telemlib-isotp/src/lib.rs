//! telemlib-isotp: ISO 15765-2 transport codec.
//!
//! Segments messages of up to 4095 bytes into classic 8-byte CAN frames
//! and reassembles them on the far side, with flow-control-gated sending
//! and timeout-bounded reassembly. Used for CAN diagnostic-style
//! messaging on the vehicle platform.
//!
//! - [`frame`] -- the pure PCI encoder/decoder (exact wire layouts)
//! - [`session`] -- the send/receive state machines over a
//!   [`CanBus`](telemlib_core::CanBus)
//!
//! Only standard (11-bit) identifiers are supported.

pub mod frame;
pub mod session;

pub use frame::{FlowStatus, FramePci, MAX_MESSAGE_LEN, MAX_SINGLE_PAYLOAD};
pub use session::{IsoTpConfig, IsoTpSession};
