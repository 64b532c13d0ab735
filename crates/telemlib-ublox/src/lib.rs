//! telemlib-ublox: u-blox SARA cellular modem backend.
//!
//! Drives the modem's socket interface over the AT engine from
//! `telemlib-at`:
//!
//! - [`commands`] -- pure builders/parsers for the socket command family
//! - [`socket`] -- per-socket state, ring buffers, keep-alive bookkeeping
//! - [`dns`] -- the DNS tunnel frame codec
//! - [`modem`] -- the [`UbloxModem`] driver and its poll loop
//! - [`builder`] -- fluent construction
//!
//! # Quick start
//!
//! ```no_run
//! use telemlib_core::{RemoteAddr, SocketProtocol};
//! use telemlib_ublox::ModemBuilder;
//!
//! # async fn example() -> telemlib_core::Result<()> {
//! let modem = ModemBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .build()
//!     .await?;
//!
//! let socket = modem
//!     .create_socket(SocketProtocol::Tcp, RemoteAddr::new("198.51.100.7", 4422))
//!     .await?;
//! modem.open_socket(socket).await?;
//! modem.queue_send(socket, b"telemetry").await?;
//! modem.service().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod commands;
pub mod dns;
pub mod modem;
pub mod socket;

pub use builder::{ModemBuilder, ModemConfig};
pub use modem::UbloxModem;
pub use socket::{SocketState, KEEP_ALIVE_PAUSE};
