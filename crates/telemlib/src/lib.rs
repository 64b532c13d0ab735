//! # telemlib -- Connectivity stack for vehicle telematics
//!
//! `telemlib` is an asynchronous Rust library for the two protocol links
//! of a battery-powered vehicle platform: a u-blox cellular modem driven
//! over a byte-oriented serial line with Hayes-style AT commands, and an
//! ISO 15765-2 (ISO-TP) transport codec for CAN diagnostic messaging.
//!
//! ## Quick start
//!
//! ```no_run
//! use telemlib::{ModemBuilder, RemoteAddr, SocketProtocol};
//!
//! #[tokio::main]
//! async fn main() -> telemlib::Result<()> {
//!     let modem = ModemBuilder::new()
//!         .serial_port("/dev/ttyUSB0")
//!         .build()
//!         .await?;
//!
//!     let socket = modem
//!         .create_socket(SocketProtocol::Tcp, RemoteAddr::new("198.51.100.7", 4422))
//!         .await?;
//!     modem.open_socket(socket).await?;
//!     modem.queue_send(socket, b"telemetry").await?;
//!     modem.service().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized as a workspace of focused crates:
//!
//! | Crate                   | Purpose                                      |
//! |-------------------------|----------------------------------------------|
//! | `telemlib-core`         | Traits, frame types, events, errors          |
//! | `telemlib-at`           | AT protocol engine (matcher + IO task)       |
//! | `telemlib-ublox`        | u-blox socket commands, DNS tunnel, driver   |
//! | `telemlib-isotp`        | ISO-TP segmentation/reassembly over CAN      |
//! | `telemlib-transport`    | Serial and SocketCAN transports              |
//! | `telemlib-test-harness` | Mock transports for deterministic tests      |
//! | **`telemlib`**          | This facade crate -- re-exports everything   |
//!
//! Exactly one AT command is in flight per engine at any time; racing
//! senders get [`Error::Busy`] immediately instead of queuing. Unsolicited
//! modem notifications surface as [`ModemEvent`]s on a broadcast channel.
//!
//! ## Feature flags
//!
//! | Feature     | Enables                               | Default |
//! |-------------|---------------------------------------|---------|
//! | `socketcan` | Linux SocketCAN bus for ISO-TP        | off     |

pub use telemlib_core::{
    CanBus, CanFrame, Error, ModemEvent, RemoteAddr, Result, SocketId, SocketProtocol, Transport,
};

pub use telemlib_isotp::{IsoTpConfig, IsoTpSession};
pub use telemlib_ublox::{ModemBuilder, SocketState, UbloxModem};

/// The AT protocol engine, for callers extending the command set.
pub mod at {
    pub use telemlib_at::*;
}

/// u-blox backend internals (command builders, DNS tunnel codec).
pub mod ublox {
    pub use telemlib_ublox::*;
}

/// ISO-TP frame-level codec.
pub mod isotp {
    pub use telemlib_isotp::*;
}

/// Physical transports.
pub mod transport {
    pub use telemlib_transport::*;
}
