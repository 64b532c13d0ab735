//! ISO-TP session: segmentation, flow control, and reassembly.
//!
//! A session is ephemeral -- constructed per logical exchange over a pair
//! of CAN identifiers, carrying no state between calls beyond the flow
//! parameters learned from the peer's last flow-control frame.
//!
//! Failure semantics are strict: any protocol violation (wrong PCI type,
//! wrong sequence number, unexpected identifier, peer-declared overflow,
//! deadline expiry) aborts the whole message with an error. There is no
//! partial-data return and no retry at this layer; retry policy belongs
//! to the caller.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use telemlib_core::can::{CanBus, CanFrame, MAX_STANDARD_ID};
use telemlib_core::error::{Error, Result};

use crate::frame::{
    self, FlowStatus, FramePci, FIRST_FRAME_PAYLOAD, MAX_CONSECUTIVE_PAYLOAD, MAX_MESSAGE_LEN,
    MAX_SINGLE_PAYLOAD,
};

/// Configuration of one ISO-TP session.
#[derive(Debug, Clone)]
pub struct IsoTpConfig {
    /// Identifier this session transmits on.
    pub tx_id: u16,
    /// Identifier the peer transmits on.
    pub rx_id: u16,
    /// Block size advertised in our flow-control frames.
    pub block_size: u8,
    /// Separation time advertised in our flow-control frames, ms.
    pub st_min: u8,
    /// Deadline for each peer response while sending (flow control) --
    /// receive deadlines are per-call.
    pub timeout: Duration,
}

impl IsoTpConfig {
    /// Configuration with default pacing (block size 1, separation 1 ms,
    /// 1 s flow-control deadline).
    pub fn new(tx_id: u16, rx_id: u16) -> Self {
        IsoTpConfig {
            tx_id,
            rx_id,
            block_size: 1,
            st_min: 1,
            timeout: Duration::from_secs(1),
        }
    }
}

/// An ISO-TP endpoint bound to a [`CanBus`].
pub struct IsoTpSession<B: CanBus> {
    bus: B,
    config: IsoTpConfig,
    /// Separation time learned from the peer's last clear-to-send.
    peer_st_min: u8,
}

impl<B: CanBus> IsoTpSession<B> {
    /// Bind a session to a bus.
    ///
    /// Extended (29-bit) identifiers are not supported: either ID above
    /// the standard 11-bit range fails construction.
    pub fn new(bus: B, config: IsoTpConfig) -> Result<Self> {
        if config.tx_id > MAX_STANDARD_ID || config.rx_id > MAX_STANDARD_ID {
            warn!(
                tx_id = config.tx_id,
                rx_id = config.rx_id,
                "extended CAN identifiers are not supported"
            );
            return Err(Error::InvalidParameter(format!(
                "CAN ids 0x{:X}/0x{:X} exceed the standard 11-bit range",
                config.tx_id, config.rx_id
            )));
        }
        Ok(IsoTpSession {
            bus,
            config,
            peer_st_min: 0,
        })
    }

    /// Consume the session, returning the bus.
    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Send one message of 1..=4095 bytes.
    ///
    /// Payloads of up to 7 bytes go out as a single frame. Anything longer
    /// is segmented: first frame, then consecutive frames gated on the
    /// peer's flow control and paced by its separation time.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::InvalidParameter("empty message".into()));
        }
        if payload.len() > MAX_MESSAGE_LEN {
            return Err(Error::InvalidParameter(format!(
                "{} bytes exceeds the {MAX_MESSAGE_LEN}-byte message limit",
                payload.len()
            )));
        }

        if payload.len() <= MAX_SINGLE_PAYLOAD {
            let data = frame::encode_single(payload)?;
            return self.transmit(&data).await;
        }

        // First frame, then wait for the peer to authorize the rest.
        let data = frame::encode_first(payload)?;
        self.transmit(&data).await?;
        self.await_clear_to_send().await?;

        // Consecutive frames: sequence starts at 1 and wraps mod 16.
        let mut offset = FIRST_FRAME_PAYLOAD;
        let mut seq: u8 = 1;
        while offset < payload.len() {
            let end = (offset + MAX_CONSECUTIVE_PAYLOAD).min(payload.len());
            let data = frame::encode_consecutive(seq, &payload[offset..end])?;
            if self.peer_st_min > 0 {
                tokio::time::sleep(Duration::from_millis(self.peer_st_min as u64)).await;
            }
            self.transmit(&data).await?;
            offset = end;
            seq = (seq + 1) & 0x0F;
        }

        debug!(len = payload.len(), "ISO-TP message sent");
        Ok(())
    }

    /// Receive one message of at most `max_len` bytes, within `timeout`.
    ///
    /// On a first frame whose declared length exceeds `max_len`, an
    /// overflow flow-control frame is transmitted and the call fails --
    /// the peer learns immediately that retrying is pointless.
    pub async fn recv(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;

        let first = self.receive_within(deadline).await?;
        match frame::decode_pci(first.data())? {
            FramePci::Single { len } => {
                if len > max_len {
                    return Err(Error::Overflow(format!(
                        "single frame of {len} bytes exceeds caller buffer of {max_len}"
                    )));
                }
                Ok(first.data()[1..=len].to_vec())
            }

            FramePci::First { len } => {
                if len > max_len {
                    let fc = frame::encode_flow_control(
                        FlowStatus::Overflow,
                        self.config.block_size,
                        self.config.st_min,
                    );
                    self.transmit(&fc).await?;
                    return Err(Error::Overflow(format!(
                        "peer declared {len} bytes, caller buffer holds {max_len}"
                    )));
                }

                let mut message = Vec::with_capacity(len);
                message.extend_from_slice(&first.data()[2..]);

                let fc = frame::encode_flow_control(
                    FlowStatus::ClearToSend,
                    self.config.block_size,
                    self.config.st_min,
                );
                self.transmit(&fc).await?;

                self.reassemble(&mut message, len, deadline).await?;
                Ok(message)
            }

            other => Err(Error::Protocol(format!(
                "expected a single or first frame, got {other:?}"
            ))),
        }
    }

    /// Read consecutive frames into `message` until `len` bytes are
    /// assembled, enforcing strictly incrementing sequence numbers.
    async fn reassemble(
        &mut self,
        message: &mut Vec<u8>,
        len: usize,
        deadline: Instant,
    ) -> Result<()> {
        let mut expected_seq: u8 = 1;
        while message.len() < len {
            let frame = self.receive_within(deadline).await?;
            match frame::decode_pci(frame.data())? {
                FramePci::Consecutive { seq } => {
                    if seq != expected_seq {
                        return Err(Error::Protocol(format!(
                            "consecutive frame sequence {seq}, expected {expected_seq}"
                        )));
                    }
                    let remaining = len - message.len();
                    let chunk = &frame.data()[1..];
                    message.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                    expected_seq = (expected_seq + 1) & 0x0F;
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "expected a consecutive frame, got {other:?}"
                    )));
                }
            }
        }
        debug!(len, "ISO-TP message reassembled");
        Ok(())
    }

    /// Block until the peer authorizes consecutive frames.
    ///
    /// `Wait` keeps polling against the same deadline; `Overflow` aborts.
    /// The clear-to-send's separation time is kept for pacing.
    async fn await_clear_to_send(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            let frame = self.receive_within(deadline).await?;
            match frame::decode_pci(frame.data())? {
                FramePci::FlowControl {
                    status,
                    block_size: _,
                    st_min,
                } => match status {
                    FlowStatus::ClearToSend => {
                        self.peer_st_min = st_min;
                        return Ok(());
                    }
                    FlowStatus::Wait => {
                        debug!("peer requested wait, polling for next flow control");
                        continue;
                    }
                    FlowStatus::Overflow => {
                        return Err(Error::Overflow(
                            "peer cannot buffer the message".into(),
                        ));
                    }
                },
                other => {
                    return Err(Error::Protocol(format!(
                        "expected a flow control frame, got {other:?}"
                    )));
                }
            }
        }
    }

    /// Receive the next frame from the peer before `deadline`, polling the
    /// bus with the remaining time on each iteration.
    async fn receive_within(&mut self, deadline: Instant) -> Result<CanFrame> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }
        let frame = self.bus.receive(remaining).await?;
        if frame.id() != self.config.rx_id {
            return Err(Error::Protocol(format!(
                "frame from unexpected CAN id 0x{:03X}, peer is 0x{:03X}",
                frame.id(),
                self.config.rx_id
            )));
        }
        Ok(frame)
    }

    async fn transmit(&mut self, data: &[u8]) -> Result<()> {
        let frame = CanFrame::new(self.config.tx_id, data)?;
        self.bus.send(&frame).await
    }
}
