//! UbloxModem -- the driver tying the AT engine to the socket layer.
//!
//! The driver owns the engine handle, the modem's socket table, and an
//! event subscription. Callers create and open sockets, enqueue and
//! dequeue bytes, and drive [`service()`](UbloxModem::service)
//! periodically (typically from a dedicated task): each call routes
//! pending unsolicited notifications into socket state, drains every
//! socket's send ring to the modem, fetches announced inbound data, and
//! issues keep-alive writes on idle connections.

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use telemlib_at::command::AtResponse;
use telemlib_at::engine::{spawn_engine, AtHandle};
use telemlib_core::error::{Error, Result};
use telemlib_core::events::ModemEvent;
use telemlib_core::transport::Transport;
use telemlib_core::types::{RemoteAddr, SocketId, SocketProtocol};

use crate::builder::ModemConfig;
use crate::commands::{self, UbloxCommands};
use crate::dns;
use crate::socket::{ModemSocket, SocketState};

/// A connected u-blox cellular modem.
///
/// Constructed via [`ModemBuilder`](crate::builder::ModemBuilder). All
/// modem communication goes through the engine handle; exactly one AT
/// command is in flight at a time.
pub struct UbloxModem {
    handle: AtHandle,
    cmds: UbloxCommands,
    config: ModemConfig,
    event_tx: broadcast::Sender<ModemEvent>,
    /// The driver's own event subscription, drained by `service()`.
    event_rx: Mutex<broadcast::Receiver<ModemEvent>>,
    sockets: Mutex<Vec<ModemSocket>>,
}

impl UbloxModem {
    /// Create a driver over an established transport.
    ///
    /// Called by [`ModemBuilder`](crate::builder::ModemBuilder); use the
    /// builder API instead.
    pub(crate) fn new(transport: Box<dyn Transport>, config: ModemConfig) -> Self {
        let (registry, cmds) = commands::build_registry();
        let (event_tx, event_rx) = broadcast::channel(64);
        let handle = spawn_engine(transport, registry, config.engine.clone(), event_tx.clone());
        UbloxModem {
            handle,
            cmds,
            config,
            event_tx,
            event_rx: Mutex::new(event_rx),
            sockets: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to modem events (URC notifications and received data).
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.event_tx.subscribe()
    }

    /// Allocate a socket on the modem.
    ///
    /// Issues `AT+USOCR` and records the modem-assigned socket index. The
    /// socket starts in [`SocketState::Created`]; call
    /// [`open_socket`](UbloxModem::open_socket) before sending.
    pub async fn create_socket(
        &self,
        protocol: SocketProtocol,
        remote: RemoteAddr,
    ) -> Result<SocketId> {
        let request = commands::create_socket(&self.cmds, protocol);
        let response = self
            .handle
            .execute(request, self.config.command_timeout)
            .await?;
        let index = match response {
            AtResponse::Value(v) => u8::try_from(v)
                .map_err(|_| Error::Protocol(format!("socket index {v} out of range")))?,
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected USOCR response: {other:?}"
                )))
            }
        };
        let id = SocketId::new(index)
            .map_err(|_| Error::Protocol(format!("socket index {index} out of range")))?;

        debug!(%id, %protocol, "socket created");
        self.sockets.lock().await.push(ModemSocket::new(
            id,
            protocol,
            remote,
            self.config.ring_capacity,
        ));
        Ok(id)
    }

    /// Open a created socket.
    ///
    /// TCP sockets get their keep-idle option set and are connected with
    /// `AT+USOCO`. Datagram sockets are connected to their remote (the
    /// modem then filters inbound traffic); DNS tunnel sockets first
    /// resolve the network-assigned DNS server via `AT+UPSND`.
    pub async fn open_socket(&self, id: SocketId) -> Result<()> {
        let (protocol, mut remote) = {
            let sockets = self.sockets.lock().await;
            let socket = find(&sockets, id)?;
            if socket.state != SocketState::Created {
                return Err(Error::InvalidParameter(format!(
                    "{id} is {:?}, expected Created",
                    socket.state
                )));
            }
            (socket.protocol, socket.remote.clone())
        };

        if protocol == SocketProtocol::Dns {
            let request =
                commands::query_profile(&self.cmds, self.config.dns_profile, commands::PROFILE_PARAM_DNS1);
            let response = self
                .handle
                .execute(request, self.config.command_timeout)
                .await?;
            let fields = match response {
                AtResponse::Fields(fields) => fields,
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected UPSND response: {other:?}"
                    )))
                }
            };
            let server = commands::parse_profile_address(&fields)?;
            debug!(%id, server, "resolved DNS server for tunnel socket");
            remote = RemoteAddr::new(server, dns::DNS_PORT);
        }

        if protocol == SocketProtocol::Tcp {
            let request = commands::set_socket_option(
                &self.cmds,
                id,
                commands::SOCKET_OPT_LEVEL_TCP,
                commands::SOCKET_OPT_KEEPIDLE,
                self.config.keep_alive_pause.as_millis() as u32,
            );
            self.handle
                .execute(request, self.config.command_timeout)
                .await?;
        }

        let request = commands::connect_socket(&self.cmds, id, &remote);
        self.handle
            .execute(request, self.config.command_timeout)
            .await?;

        let mut sockets = self.sockets.lock().await;
        let socket = find_mut(&mut sockets, id)?;
        socket.remote = remote;
        socket.state = SocketState::Open;
        debug!(%id, "socket open");
        Ok(())
    }

    /// Queue bytes for transmission on an open socket.
    ///
    /// The data sits in the socket's send ring until the next
    /// [`service()`](UbloxModem::service) call drains it to the modem.
    pub async fn queue_send(&self, id: SocketId, data: &[u8]) -> Result<()> {
        let sockets = self.sockets.lock().await;
        let socket = find(&sockets, id)?;
        match socket.state {
            SocketState::Created => Err(Error::InvalidParameter(format!("{id} is not open"))),
            SocketState::Closed => Err(Error::ConnectionLost),
            _ => socket.tx.push(data),
        }
    }

    /// Dequeue up to `max` received bytes from a socket.
    pub async fn take_received(&self, id: SocketId, max: usize) -> Result<Vec<u8>> {
        let sockets = self.sockets.lock().await;
        let socket = find(&sockets, id)?;
        Ok(socket.rx.pop(max))
    }

    /// Current lifecycle state of a socket.
    pub async fn socket_state(&self, id: SocketId) -> Result<SocketState> {
        let sockets = self.sockets.lock().await;
        Ok(find(&sockets, id)?.state)
    }

    /// Query the modem for a socket's last error code (`AT+USOCTL`).
    pub async fn last_socket_error(&self, id: SocketId) -> Result<u32> {
        let request = commands::socket_control(&self.cmds, id, commands::SOCKET_CTL_LAST_ERROR);
        let response = self
            .handle
            .execute(request, self.config.command_timeout)
            .await?;
        match response {
            AtResponse::Fields(fields) => commands::parse_control_value(&fields),
            other => Err(Error::Protocol(format!(
                "unexpected USOCTL response: {other:?}"
            ))),
        }
    }

    /// One pass of the driver's poll loop.
    ///
    /// Routes pending unsolicited notifications into socket state, then
    /// for every socket drains the send ring, fetches announced data, and
    /// issues a keep-alive write if the connection has idled past the
    /// configured pause. Per-socket failures are logged and skipped so one
    /// sick socket cannot starve the others.
    pub async fn service(&self) -> Result<()> {
        self.route_events().await;

        let mut sockets = self.sockets.lock().await;
        for socket in sockets.iter_mut() {
            if socket.state == SocketState::Created || socket.state == SocketState::Closed {
                continue;
            }
            if let Err(e) = self.check_and_send(socket).await {
                warn!(id = %socket.id, error = %e, "send drain failed");
            }
            if let Err(e) = self.check_and_receive(socket).await {
                warn!(id = %socket.id, error = %e, "receive fetch failed");
            }
            if let Err(e) = self.keep_alive(socket).await {
                warn!(id = %socket.id, error = %e, "keep-alive failed");
            }
        }
        Ok(())
    }

    /// Gracefully shut down the engine and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        self.handle.shutdown().await
    }

    // -----------------------------------------------------------------
    // Poll internals
    // -----------------------------------------------------------------

    /// Drain the event subscription into socket state.
    async fn route_events(&self) {
        let mut drained = Vec::new();
        {
            let mut event_rx = self.event_rx.lock().await;
            loop {
                match event_rx.try_recv() {
                    Ok(event) => drained.push(event),
                    Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                        warn!(missed, "driver lagged behind modem events");
                    }
                    Err(_) => break,
                }
            }
        }

        if drained.is_empty() {
            return;
        }
        let mut sockets = self.sockets.lock().await;
        for event in drained {
            match event {
                ModemEvent::DataAvailable { socket: id, len } => {
                    if let Ok(socket) = find_mut(&mut sockets, id) {
                        socket.rx_pending = len;
                    }
                }
                ModemEvent::SocketClosed { socket: id } => {
                    if let Ok(socket) = find_mut(&mut sockets, id) {
                        debug!(%id, "remote closed socket");
                        socket.state = SocketState::Closed;
                    }
                }
                ModemEvent::Received { .. } => {}
            }
        }
    }

    /// Drain the socket's send ring to the modem, chunk by chunk.
    async fn check_and_send(&self, socket: &mut ModemSocket) -> Result<()> {
        while !socket.tx.is_empty() {
            let chunk_max = match socket.protocol {
                SocketProtocol::Dns => dns::MAX_TUNNEL_PAYLOAD,
                _ => self.config.write_chunk,
            };
            let chunk = socket.tx.pop(chunk_max);

            socket.state = SocketState::Sending;
            let result = self.transmit_chunk(socket, &chunk).await;
            socket.state = SocketState::Open;

            match result {
                Ok(()) => socket.last_send = Instant::now(),
                Err(e) => {
                    // The chunk goes back to the head of the ring; the
                    // next poll retries it.
                    socket.tx.push_front(&chunk);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Transmit one chunk with the protocol-appropriate write command.
    async fn transmit_chunk(&self, socket: &ModemSocket, chunk: &[u8]) -> Result<()> {
        let request = match socket.protocol {
            SocketProtocol::Tcp => commands::write_socket(&self.cmds, socket.id, chunk.to_vec()),
            SocketProtocol::Udp => {
                commands::send_to(&self.cmds, socket.id, &socket.remote, chunk.to_vec())
            }
            SocketProtocol::Dns => {
                let frame = dns::encode_frame(chunk)?;
                commands::send_to(&self.cmds, socket.id, &socket.remote, frame.to_vec())
            }
        };
        self.handle
            .execute(request, self.config.command_timeout)
            .await?;
        Ok(())
    }

    /// Fetch the data the modem has announced for this socket.
    async fn check_and_receive(&self, socket: &mut ModemSocket) -> Result<()> {
        while socket.rx_pending > 0 {
            let want = match socket.protocol {
                SocketProtocol::Dns => dns::DNS_FRAME_LEN,
                _ => socket.rx_pending.min(self.config.read_chunk),
            };
            let request = match socket.protocol {
                SocketProtocol::Tcp => commands::read_socket(&self.cmds, socket.id, want),
                SocketProtocol::Udp | SocketProtocol::Dns => {
                    commands::receive_from(&self.cmds, socket.id, want)
                }
            };

            socket.state = SocketState::Receiving;
            let result = self
                .handle
                .execute(request, self.config.command_timeout)
                .await;
            socket.state = SocketState::Open;

            let data = match result? {
                AtResponse::Data(data) => data,
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected read response: {other:?}"
                    )))
                }
            };

            if data.data.is_empty() {
                socket.rx_pending = 0;
                break;
            }
            socket.rx_pending = socket.rx_pending.saturating_sub(data.data.len());

            let payload = match socket.protocol {
                SocketProtocol::Dns => dns::decode_frame(&data.data)?,
                _ => data.data,
            };
            socket.rx.push(&payload)?;
            socket.last_recv = Instant::now();
            let _ = self.event_tx.send(ModemEvent::Received {
                socket: socket.id,
                data: Bytes::from(payload),
            });
        }
        Ok(())
    }

    /// Issue a zero-length write on a connection idle past the pause.
    async fn keep_alive(&self, socket: &mut ModemSocket) -> Result<()> {
        if !socket.needs_keep_alive(self.config.keep_alive_pause) {
            return Ok(());
        }
        debug!(id = %socket.id, "idle keep-alive write");
        let result = self.transmit_chunk(socket, &[]).await;
        if result.is_ok() {
            socket.last_send = Instant::now();
        }
        result
    }
}

fn find(sockets: &[ModemSocket], id: SocketId) -> Result<&ModemSocket> {
    sockets
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| Error::InvalidParameter(format!("unknown socket {id}")))
}

fn find_mut(sockets: &mut [ModemSocket], id: SocketId) -> Result<&mut ModemSocket> {
    sockets
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| Error::InvalidParameter(format!("unknown socket {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModemBuilder;
    use std::time::Duration;
    use telemlib_test_harness::MockTransport;

    async fn modem_with(mock: MockTransport) -> UbloxModem {
        ModemBuilder::new()
            .command_timeout(Duration::from_millis(500))
            .build_with_transport(Box::new(mock))
            .await
            .unwrap()
    }

    fn remote() -> RemoteAddr {
        RemoteAddr::new("198.51.100.7", 4422)
    }

    /// Expectations for creating and opening TCP socket 0.
    fn expect_tcp_open(mock: &mut MockTransport) {
        mock.expect(b"AT+USOCR=6\r", b"\r\n+USOCR: 0\r\nOK\r\n");
        mock.expect(b"AT+USOSO=0,6,2,10000\r", b"\r\nOK\r\n");
        mock.expect(
            b"AT+USOCO=0,\"198.51.100.7\",4422\r",
            b"\r\nOK\r\n",
        );
    }

    #[tokio::test]
    async fn create_and_open_tcp_socket() {
        let mut mock = MockTransport::new();
        expect_tcp_open(&mut mock);

        let modem = modem_with(mock).await;
        let id = modem
            .create_socket(SocketProtocol::Tcp, remote())
            .await
            .unwrap();
        assert_eq!(id.index(), 0);
        assert_eq!(modem.socket_state(id).await.unwrap(), SocketState::Created);

        modem.open_socket(id).await.unwrap();
        assert_eq!(modem.socket_state(id).await.unwrap(), SocketState::Open);

        let _ = modem.shutdown().await;
    }

    #[tokio::test]
    async fn service_drains_send_ring_over_tcp() {
        let mut mock = MockTransport::new();
        expect_tcp_open(&mut mock);
        mock.expect(b"AT+USOWR=0,4\r", b"@");
        mock.expect(b"ping", b"\r\n+USOWR: 0,4\r\nOK\r\n");

        let modem = modem_with(mock).await;
        let id = modem
            .create_socket(SocketProtocol::Tcp, remote())
            .await
            .unwrap();
        modem.open_socket(id).await.unwrap();

        modem.queue_send(id, b"ping").await.unwrap();
        modem.service().await.unwrap();
        assert_eq!(modem.socket_state(id).await.unwrap(), SocketState::Open);

        let _ = modem.shutdown().await;
    }

    #[tokio::test]
    async fn announced_data_is_fetched_and_delivered() {
        let mut mock = MockTransport::new();
        expect_tcp_open(&mut mock);
        mock.push_unsolicited(b"\r\n+UUSORD: 0,5\r\n");
        mock.expect(b"AT+USORD=0,5\r", b"\r\n+USORD: 0,5,\"hello\"\r\nOK\r\n");

        let modem = modem_with(mock).await;
        let id = modem
            .create_socket(SocketProtocol::Tcp, remote())
            .await
            .unwrap();
        modem.open_socket(id).await.unwrap();

        let mut events = modem.subscribe();
        // Let the engine pick the URC off the wire.
        tokio::time::sleep(Duration::from_millis(100)).await;
        modem.service().await.unwrap();

        assert_eq!(modem.take_received(id, 64).await.unwrap(), b"hello");

        // The drained payload surfaces as a Received event.
        let mut saw_received = false;
        while let Ok(event) = events.try_recv() {
            if let ModemEvent::Received { socket, data } = event {
                assert_eq!(socket, id);
                assert_eq!(data.as_ref(), b"hello");
                saw_received = true;
            }
        }
        assert!(saw_received);

        let _ = modem.shutdown().await;
    }

    #[tokio::test]
    async fn idle_socket_gets_keep_alive_write() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+USOCR=6\r", b"\r\n+USOCR: 0\r\nOK\r\n");
        mock.expect(b"AT+USOSO=0,6,2,50\r", b"\r\nOK\r\n");
        mock.expect(
            b"AT+USOCO=0,\"198.51.100.7\",4422\r",
            b"\r\nOK\r\n",
        );
        mock.expect(b"AT+USOWR=0,0\r", b"@");
        mock.expect(b"", b"\r\n+USOWR: 0,0\r\nOK\r\n");

        let modem = ModemBuilder::new()
            .command_timeout(Duration::from_millis(500))
            .keep_alive_pause(Duration::from_millis(50))
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();

        let id = modem
            .create_socket(SocketProtocol::Tcp, remote())
            .await
            .unwrap();
        modem.open_socket(id).await.unwrap();

        // Before the pause elapses, service writes nothing.
        modem.service().await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        modem.service().await.unwrap();

        let _ = modem.shutdown().await;
    }

    #[tokio::test]
    async fn remote_close_marks_socket_closed() {
        let mut mock = MockTransport::new();
        expect_tcp_open(&mut mock);
        mock.push_unsolicited(b"\r\n+UUSOCL: 0\r\n");

        let modem = modem_with(mock).await;
        let id = modem
            .create_socket(SocketProtocol::Tcp, remote())
            .await
            .unwrap();
        modem.open_socket(id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        modem.service().await.unwrap();
        assert_eq!(modem.socket_state(id).await.unwrap(), SocketState::Closed);

        // Sending on a closed socket is refused.
        assert!(matches!(
            modem.queue_send(id, b"x").await,
            Err(Error::ConnectionLost)
        ));

        let _ = modem.shutdown().await;
    }

    #[tokio::test]
    async fn udp_socket_sends_datagrams_with_address() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+USOCR=17\r", b"\r\n+USOCR: 2\r\nOK\r\n");
        mock.expect(
            b"AT+USOCO=2,\"198.51.100.7\",4422\r",
            b"\r\nOK\r\n",
        );
        mock.expect(b"AT+USOST=2,\"198.51.100.7\",4422,4\r", b"@");
        mock.expect(b"ping", b"\r\n+USOST: 2,4\r\nOK\r\n");

        let modem = modem_with(mock).await;
        let id = modem
            .create_socket(SocketProtocol::Udp, remote())
            .await
            .unwrap();
        modem.open_socket(id).await.unwrap();
        modem.queue_send(id, b"ping").await.unwrap();
        modem.service().await.unwrap();

        let _ = modem.shutdown().await;
    }

    #[tokio::test]
    async fn dns_socket_resolves_server_and_tunnels_payload() {
        let frame = dns::encode_frame(b"hi").unwrap();

        let mut mock = MockTransport::new();
        mock.expect(b"AT+USOCR=17\r", b"\r\n+USOCR: 1\r\nOK\r\n");
        mock.expect(b"AT+UPSND=0,1\r", b"\r\n+UPSND: 0,1,\"198.51.100.9\"\r\nOK\r\n");
        mock.expect(b"AT+USOCO=1,\"198.51.100.9\",53\r", b"\r\nOK\r\n");
        mock.expect(b"AT+USOST=1,\"198.51.100.9\",53,80\r", b"@");
        mock.expect(&frame, b"\r\n+USOST: 1,80\r\nOK\r\n");

        let modem = modem_with(mock).await;
        // The caller-provided remote is a placeholder; open() swaps in the
        // resolved DNS server.
        let id = modem
            .create_socket(SocketProtocol::Dns, RemoteAddr::new("0.0.0.0", 0))
            .await
            .unwrap();
        modem.open_socket(id).await.unwrap();

        modem.queue_send(id, b"hi").await.unwrap();
        modem.service().await.unwrap();

        let _ = modem.shutdown().await;
    }

    #[tokio::test]
    async fn dns_socket_unwraps_received_frames() {
        let frame = dns::encode_frame(b"pong").unwrap();
        let mut response = b"\r\n+USORF: 1,\"198.51.100.9\",53,80,\"".to_vec();
        response.extend_from_slice(&frame);
        response.extend_from_slice(b"\"\r\nOK\r\n");

        let mut mock = MockTransport::new();
        mock.expect(b"AT+USOCR=17\r", b"\r\n+USOCR: 1\r\nOK\r\n");
        mock.expect(b"AT+UPSND=0,1\r", b"\r\n+UPSND: 0,1,\"198.51.100.9\"\r\nOK\r\n");
        mock.expect(b"AT+USOCO=1,\"198.51.100.9\",53\r", b"\r\nOK\r\n");
        mock.push_unsolicited(b"\r\n+UUSORF: 1,80\r\n");
        mock.expect(b"AT+USORF=1,80\r", &response);

        let modem = modem_with(mock).await;
        let id = modem
            .create_socket(SocketProtocol::Dns, RemoteAddr::new("0.0.0.0", 0))
            .await
            .unwrap();
        modem.open_socket(id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        modem.service().await.unwrap();

        assert_eq!(modem.take_received(id, 64).await.unwrap(), b"pong");

        let _ = modem.shutdown().await;
    }

    #[tokio::test]
    async fn queue_send_requires_open_socket() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+USOCR=6\r", b"\r\n+USOCR: 0\r\nOK\r\n");

        let modem = modem_with(mock).await;
        let id = modem
            .create_socket(SocketProtocol::Tcp, remote())
            .await
            .unwrap();
        assert!(matches!(
            modem.queue_send(id, b"x").await,
            Err(Error::InvalidParameter(_))
        ));

        let _ = modem.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_socket_is_an_error() {
        let modem = modem_with(MockTransport::new()).await;
        let id = SocketId::new(5).unwrap();
        assert!(modem.socket_state(id).await.is_err());
        assert!(modem.take_received(id, 8).await.is_err());
        let _ = modem.shutdown().await;
    }
}
