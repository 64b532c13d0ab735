//! Linux SocketCAN implementation of the [`CanBus`] trait.
//!
//! Wraps an async SocketCAN socket (e.g. `can0` or a virtual `vcan0`)
//! for use with the ISO-TP codec. Only classic data frames with standard
//! identifiers are surfaced; remote and error frames are rejected.

use async_trait::async_trait;
use std::time::Duration;

use socketcan::tokio::CanSocket;
use socketcan::{EmbeddedFrame, Id, StandardId};

use telemlib_core::can::{CanBus, CanFrame};
use telemlib_core::error::{Error, Result};

/// A [`CanBus`] over Linux SocketCAN.
pub struct SocketCanBus {
    socket: CanSocket,
    interface: String,
}

impl SocketCanBus {
    /// Open a CAN interface by name (e.g. `"can0"`).
    pub fn open(interface: &str) -> Result<Self> {
        let socket = CanSocket::open(interface).map_err(|e| {
            tracing::error!(interface, error = %e, "failed to open CAN interface");
            Error::Transport(format!("failed to open CAN interface {interface}: {e}"))
        })?;
        tracing::info!(interface, "CAN interface open");
        Ok(SocketCanBus {
            socket,
            interface: interface.to_string(),
        })
    }

    /// The name of the underlying interface.
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

#[async_trait]
impl CanBus for SocketCanBus {
    async fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let id = StandardId::new(frame.id())
            .ok_or_else(|| Error::InvalidParameter(format!("CAN id 0x{:X}", frame.id())))?;
        let raw = socketcan::CanFrame::new(Id::Standard(id), frame.data())
            .ok_or_else(|| Error::InvalidParameter("oversized CAN payload".into()))?;
        self.socket
            .write_frame(raw)
            .await
            .map_err(|e| Error::Transport(format!("CAN write on {}: {e}", self.interface)))
    }

    async fn receive(&mut self, timeout: Duration) -> Result<CanFrame> {
        let raw = match tokio::time::timeout(timeout, self.socket.read_frame()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                return Err(Error::Transport(format!(
                    "CAN read on {}: {e}",
                    self.interface
                )))
            }
            Err(_) => return Err(Error::Timeout),
        };

        let id = match raw.id() {
            Id::Standard(sid) => sid.as_raw(),
            Id::Extended(eid) => {
                return Err(Error::Protocol(format!(
                    "extended CAN id 0x{:X} is not supported",
                    eid.as_raw()
                )))
            }
        };
        CanFrame::new(id, raw.data())
    }
}
