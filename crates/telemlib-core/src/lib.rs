//! telemlib-core: Core traits, types, and error definitions for telemlib.
//!
//! This crate defines the transport-agnostic abstractions that the rest of
//! the workspace builds on. The AT engine, socket layer, and ISO-TP codec
//! depend on these types without pulling in any concrete transport.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level serial channel to the modem
//! - [`CanBus`] / [`CanFrame`] -- frame-level CAN interface
//! - [`ModemEvent`] -- asynchronous unsolicited notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod can;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use telemlib_core::*`.
pub use can::{CanBus, CanFrame, MAX_STANDARD_ID};
pub use error::{Error, Result};
pub use events::ModemEvent;
pub use transport::Transport;
pub use types::{RemoteAddr, SocketId, SocketProtocol};
