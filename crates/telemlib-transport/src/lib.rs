//! telemlib-transport: physical transport implementations.
//!
//! Concrete links behind the traits in `telemlib-core`:
//!
//! - [`SerialTransport`] -- the modem UART (feature `serial`, default on)
//! - [`SocketCanBus`] -- Linux SocketCAN for the ISO-TP codec
//!   (feature `socketcan`, default off; Linux only)
//!
//! Tests throughout the workspace use the mocks in
//! `telemlib-test-harness` instead of these.

#[cfg(feature = "socketcan")]
pub mod can;
#[cfg(feature = "serial")]
pub mod serial;

#[cfg(feature = "socketcan")]
pub use can::SocketCanBus;
#[cfg(feature = "serial")]
pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
