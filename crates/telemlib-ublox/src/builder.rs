//! ModemBuilder -- fluent builder for constructing [`UbloxModem`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial parameters, timeouts, and buffer capacities before the engine
//! task is spawned.
//!
//! # Example
//!
//! ```no_run
//! use telemlib_ublox::ModemBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> telemlib_core::Result<()> {
//! let modem = ModemBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .baud_rate(115_200)
//!     .command_timeout(Duration::from_millis(500))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use telemlib_at::engine::EngineConfig;
use telemlib_core::error::{Error, Result};
use telemlib_core::transport::Transport;
use telemlib_transport::SerialTransport;

use crate::modem::UbloxModem;
use crate::socket::KEEP_ALIVE_PAUSE;

/// Resolved driver configuration, produced by [`ModemBuilder`].
#[derive(Debug, Clone)]
pub struct ModemConfig {
    /// Deadline for a single AT command/response exchange.
    pub command_timeout: Duration,
    /// Idle time after which an open socket gets a keep-alive write.
    pub keep_alive_pause: Duration,
    /// Largest chunk drained from a send ring per write command.
    pub write_chunk: usize,
    /// Largest read requested per `USORD`/`USORF` command.
    pub read_chunk: usize,
    /// Capacity of each socket's send and receive ring.
    pub ring_capacity: usize,
    /// Packet-switched profile queried for the DNS server.
    pub dns_profile: u8,
    /// Engine tuning.
    pub engine: EngineConfig,
}

/// Fluent builder for [`UbloxModem`].
///
/// All knobs have defaults suitable for a SARA-class modem on a direct
/// UART; the simplest usage is `ModemBuilder::new().serial_port(...)
/// .build()`.
pub struct ModemBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    config: ModemConfig,
}

impl ModemBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        ModemBuilder {
            serial_port: None,
            baud_rate: 115_200,
            config: ModemConfig {
                command_timeout: Duration::from_secs(1),
                keep_alive_pause: KEEP_ALIVE_PAUSE,
                write_chunk: 128,
                read_chunk: 256,
                ring_capacity: 1024,
                dns_profile: 0,
                engine: EngineConfig::default(),
            },
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the default baud rate (115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set the deadline for one AT command exchange (default: 1 s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the idle pause before a keep-alive write (default: 10 s).
    pub fn keep_alive_pause(mut self, pause: Duration) -> Self {
        self.config.keep_alive_pause = pause;
        self
    }

    /// Set the per-socket ring capacity in bytes (default: 1024).
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.config.ring_capacity = capacity;
        self
    }

    /// Set the packet-switched profile used for DNS lookups (default: 0).
    pub fn dns_profile(mut self, profile: u8) -> Self {
        self.config.dns_profile = profile;
        self
    }

    /// Override the engine tuning knobs.
    pub fn engine_config(mut self, engine: EngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    /// Open the configured serial port and build the driver.
    pub async fn build(self) -> Result<UbloxModem> {
        let port = self
            .serial_port
            .clone()
            .ok_or_else(|| Error::InvalidParameter("no serial port configured".into()))?;
        let transport = SerialTransport::open(&port, self.baud_rate).await?;
        self.build_with_transport(Box::new(transport)).await
    }

    /// Build the driver over a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockTransport` from `telemlib-test-harness`) and for advanced
    /// setups where the caller manages the transport lifecycle directly.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<UbloxModem> {
        if !transport.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(UbloxModem::new(transport, self.config))
    }
}

impl Default for ModemBuilder {
    fn default() -> Self {
        Self::new()
    }
}
