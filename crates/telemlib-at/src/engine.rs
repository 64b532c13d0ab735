//! The AT engine IO task.
//!
//! One tokio task owns the transport exclusively and runs the single
//! background read loop for the modem link: every received byte -- whether
//! it belongs to a solicited response, a terminal `OK`/`ERROR` line, a data
//! prompt, or an unsolicited result code -- flows through one
//! [`Matcher`]. Commands are submitted through a channel and complete via
//! a `oneshot` rendezvous when the parser matches their response and the
//! terminal line.
//!
//! # In-flight discipline
//!
//! Exactly one command may be outstanding per engine at any time. The
//! public [`AtHandle`] enforces this with a non-queuing slot: racing
//! senders do not line up, the loser gets [`Error::Busy`] immediately and
//! nothing is transmitted on its behalf. Timeouts are the only way an
//! abandoned rendezvous is cleared -- on expiry the engine errors the
//! outstanding command and resets the matcher so the next caller is never
//! stuck behind a dead exchange.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use telemlib_core::error::{Error, Result};
use telemlib_core::events::ModemEvent;
use telemlib_core::transport::Transport;
use telemlib_core::types::{RemoteAddr, SocketId};

use crate::command::{AtRequest, AtResponse, CommandId, Registry, ResponseKind, SocketData, UrcKind};
use crate::matcher::{Matcher, Token};
use crate::protocol::{self, CR};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine IO task.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long one idle read waits for a byte before the loop re-checks
    /// deadlines and the request channel.
    pub idle_read_timeout: Duration,
    /// How long the engine waits for the next byte once a response line
    /// has started (field and payload pulls).
    pub field_timeout: Duration,
    /// Capacity of the engine's data buffer. A data-receive response whose
    /// declared length exceeds this fails with [`Error::Overflow`].
    pub data_capacity: usize,
    /// Upper bound on a single text field, against runaway lines.
    pub line_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            idle_read_timeout: Duration::from_millis(100),
            field_timeout: Duration::from_millis(250),
            data_capacity: 512,
            line_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A request sent from the handle to the IO task.
enum EngineRequest {
    /// Transmit a command and rendezvous on its completion.
    Execute {
        request: AtRequest,
        timeout: Duration,
        reply: oneshot::Sender<Result<AtResponse>>,
    },
    /// Graceful shutdown; returns the transport for recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// What a matched literal means to the engine.
#[derive(Debug, Clone, Copy)]
enum MatchTarget {
    TerminalOk,
    TerminalError,
    Prompt,
    Command(CommandId),
    Urc(usize),
}

/// Progress of the outstanding command through its completion paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Waiting for the command's response literal. Commands with an empty
    /// literal stay here and complete straight from the terminal line.
    AwaitMatch,
    /// Waiting for the `@` prompt before streaming the staged payload.
    AwaitPrompt,
    /// Payload streamed; waiting for the `<literal><socket>,<len>` echo.
    AwaitEcho,
    /// Response consumed; waiting for `OK`/`ERROR`.
    AwaitTerminal,
}

/// The outstanding command's rendezvous state.
struct Pending {
    command: CommandId,
    stage: Stage,
    payload: Option<Vec<u8>>,
    captured: Option<AtResponse>,
    deadline: Instant,
    reply: oneshot::Sender<Result<AtResponse>>,
}

/// Handle to the engine IO task. Stored inside the modem driver.
pub struct AtHandle {
    req_tx: mpsc::Sender<EngineRequest>,
    /// The non-queuing in-flight slot. `try_lock` semantics give racing
    /// senders an immediate `Busy` instead of a queue position.
    slot: Arc<Mutex<()>>,
    /// Cancellation token for non-graceful teardown.
    pub cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AtHandle {
    /// Execute a command and wait for its completion.
    ///
    /// Claims the engine-wide in-flight slot first; if another command
    /// currently owns it, returns [`Error::Busy`] immediately without
    /// transmitting anything. Otherwise transmits the request and blocks
    /// until the parser task completes the rendezvous or `timeout`
    /// elapses.
    pub async fn execute(&self, request: AtRequest, timeout: Duration) -> Result<AtResponse> {
        let _slot = self
            .slot
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Busy)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.req_tx
            .send(EngineRequest::Execute {
                request,
                timeout,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match tokio::time::timeout(timeout + Duration::from_millis(500), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Shut down the IO task and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .req_tx
            .send(EngineRequest::Shutdown { reply: reply_tx })
            .await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = self.task.await;
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the engine IO task. Returns the handle for executing commands.
///
/// The task owns the transport exclusively. `event_tx` receives
/// [`ModemEvent`]s for every decoded unsolicited result code.
pub fn spawn_engine(
    transport: Box<dyn Transport>,
    registry: Registry,
    config: EngineConfig,
    event_tx: broadcast::Sender<ModemEvent>,
) -> AtHandle {
    let (req_tx, req_rx) = mpsc::channel::<EngineRequest>(1);
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    let task = tokio::spawn(engine_loop(
        transport,
        registry,
        config,
        event_tx,
        req_rx,
        cancel_clone,
    ));

    AtHandle {
        req_tx,
        slot: Arc::new(Mutex::new(())),
        cancel,
        task,
    }
}

/// Build the matcher table from a registry.
///
/// Terminal literals and the prompt are engine-owned and always
/// registered first; command literals (skipping empty ones) and URC
/// prefixes follow. The resulting target table is parallel to the
/// matcher's token space.
fn build_tables(registry: &Registry) -> (Matcher, Vec<MatchTarget>) {
    let mut matcher = Matcher::new();
    let mut targets = Vec::new();

    fn add(matcher: &mut Matcher, targets: &mut Vec<MatchTarget>, lit: &[u8], target: MatchTarget) {
        if let Some(token) = matcher.register(lit) {
            debug_assert_eq!(token.0, targets.len());
            targets.push(target);
        }
    }

    add(&mut matcher, &mut targets, protocol::OK_TERMINAL, MatchTarget::TerminalOk);
    add(&mut matcher, &mut targets, protocol::ERROR_TERMINAL, MatchTarget::TerminalError);
    add(&mut matcher, &mut targets, &[protocol::PROMPT], MatchTarget::Prompt);

    for (id, spec) in registry.commands().iter().enumerate() {
        if !spec.expect.is_empty() {
            add(&mut matcher, &mut targets, spec.expect, MatchTarget::Command(id));
        }
    }
    for (idx, urc) in registry.urcs().iter().enumerate() {
        add(&mut matcher, &mut targets, urc.prefix, MatchTarget::Urc(idx));
    }

    if let Err((a, b)) = matcher.verify_unambiguous() {
        warn!(?a, ?b, "ambiguous response literals registered; matches may stall");
    }

    (matcher, targets)
}

// ---------------------------------------------------------------------------
// Byte reader
// ---------------------------------------------------------------------------

/// Small read buffer between the transport and the matcher, so the engine
/// can consume one byte at a time without a transport round-trip each.
struct ByteReader {
    buf: [u8; 256],
    len: usize,
    pos: usize,
}

impl ByteReader {
    fn new() -> Self {
        ByteReader {
            buf: [0u8; 256],
            len: 0,
            pos: 0,
        }
    }

    /// Pull the next byte, reading from the transport when the buffer is
    /// drained. Waits up to `timeout` for fresh data.
    async fn next_byte(&mut self, transport: &mut dyn Transport, timeout: Duration) -> Result<u8> {
        if self.pos >= self.len {
            let n = transport.receive(&mut self.buf, timeout).await?;
            if n == 0 {
                return Err(Error::Timeout);
            }
            self.len = n;
            self.pos = 0;
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }
}

// ---------------------------------------------------------------------------
// Engine loop
// ---------------------------------------------------------------------------

/// The main loop of the engine IO task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Command submission
/// 3. Byte reading through the matcher
async fn engine_loop(
    mut transport: Box<dyn Transport>,
    registry: Registry,
    config: EngineConfig,
    event_tx: broadcast::Sender<ModemEvent>,
    mut req_rx: mpsc::Receiver<EngineRequest>,
    cancel: CancellationToken,
) {
    let (mut matcher, targets) = build_tables(&registry);
    let mut reader = ByteReader::new();
    let mut pending: Option<Pending> = None;

    loop {
        // A stuck exchange must not wedge the engine: on deadline expiry
        // the outstanding command is errored out and the matcher reset.
        if pending
            .as_ref()
            .map(|p| Instant::now() >= p.deadline)
            .unwrap_or(false)
        {
            debug!("outstanding command timed out, resetting parser state");
            fail_pending(&mut pending, &mut matcher, Error::Timeout);
        }

        let read_timeout = match pending.as_ref() {
            Some(p) => config
                .idle_read_timeout
                .min(p.deadline.saturating_duration_since(Instant::now())),
            None => config.idle_read_timeout,
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("engine task cancelled");
                break;
            }

            req = req_rx.recv() => {
                match req {
                    Some(EngineRequest::Execute { request, timeout, reply }) => {
                        start_execute(
                            &mut *transport,
                            &registry,
                            &mut pending,
                            request,
                            timeout,
                            reply,
                        )
                        .await;
                    }
                    Some(EngineRequest::Shutdown { reply }) => {
                        debug!("engine shutdown requested, returning transport");
                        fail_pending(&mut pending, &mut matcher, Error::ConnectionLost);
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("request channel closed, exiting engine task");
                        break;
                    }
                }
            }

            byte = reader.next_byte(&mut *transport, read_timeout) => {
                match byte {
                    Ok(b) => {
                        if let Some(token) = matcher.feed(b) {
                            dispatch(
                                token,
                                &targets,
                                &registry,
                                &mut *transport,
                                &mut reader,
                                &mut matcher,
                                &mut pending,
                                &event_tx,
                                &config,
                            )
                            .await;
                        }
                    }
                    Err(Error::Timeout) => {
                        // Idle; yield briefly so mocks that fail fast do
                        // not spin the loop hot.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(e) => {
                        debug!(error = %e, "transport read failed");
                        fail_pending(&mut pending, &mut matcher, e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }

    fail_pending(&mut pending, &mut matcher, Error::ConnectionLost);
}

/// Transmit a request and install its rendezvous state.
async fn start_execute(
    transport: &mut dyn Transport,
    registry: &Registry,
    pending: &mut Option<Pending>,
    request: AtRequest,
    timeout: Duration,
    reply: oneshot::Sender<Result<AtResponse>>,
) {
    if pending.is_some() {
        // The handle's slot normally prevents this; guard anyway.
        let _ = reply.send(Err(Error::Busy));
        return;
    }

    let spec = registry.command_spec(request.command);
    debug!(command = spec.name, "executing AT command");

    if let Err(e) = transport.send(&request.bytes).await {
        let _ = reply.send(Err(e));
        return;
    }

    let stage = match spec.kind {
        ResponseKind::Prompt => Stage::AwaitPrompt,
        _ => Stage::AwaitMatch,
    };
    *pending = Some(Pending {
        command: request.command,
        stage,
        payload: request.payload,
        captured: None,
        deadline: Instant::now() + timeout,
        reply,
    });
}

/// Error out the outstanding command, if any, and reset the matcher.
fn fail_pending(pending: &mut Option<Pending>, matcher: &mut Matcher, error: Error) {
    if let Some(p) = pending.take() {
        let _ = p.reply.send(Err(error));
        matcher.reset();
    }
}

/// Complete the outstanding command successfully.
fn complete_pending(pending: &mut Option<Pending>) {
    if let Some(p) = pending.take() {
        let response = p.captured.unwrap_or(AtResponse::Done);
        let _ = p.reply.send(Ok(response));
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// React to a fully matched literal.
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    token: Token,
    targets: &[MatchTarget],
    registry: &Registry,
    transport: &mut dyn Transport,
    reader: &mut ByteReader,
    matcher: &mut Matcher,
    pending: &mut Option<Pending>,
    event_tx: &broadcast::Sender<ModemEvent>,
    config: &EngineConfig,
) {
    match targets[token.0] {
        MatchTarget::TerminalOk => {
            if pending.is_some() {
                complete_pending(pending);
            } else {
                debug!("unsolicited OK, ignoring");
            }
        }

        MatchTarget::TerminalError => {
            if pending.is_some() {
                fail_pending(pending, matcher, Error::Protocol("modem returned ERROR".into()));
            } else {
                debug!("unsolicited ERROR, ignoring");
            }
        }

        MatchTarget::Prompt => {
            let awaiting = pending
                .as_ref()
                .map(|p| p.stage == Stage::AwaitPrompt)
                .unwrap_or(false);
            if !awaiting {
                debug!("prompt with no payload staged, ignoring");
                return;
            }
            let p = pending.as_mut().unwrap();
            let payload = p.payload.take().unwrap_or_default();
            match transport.send(&payload).await {
                Ok(()) => p.stage = Stage::AwaitEcho,
                Err(e) => fail_pending(pending, matcher, e),
            }
        }

        MatchTarget::Command(id) => {
            let expected = pending
                .as_ref()
                .map(|p| {
                    p.command == id
                        && matches!(
                            (registry.command_spec(id).kind, p.stage),
                            (ResponseKind::Prompt, Stage::AwaitEcho)
                                | (ResponseKind::Basic, Stage::AwaitMatch)
                                | (ResponseKind::Value, Stage::AwaitMatch)
                                | (ResponseKind::Fields, Stage::AwaitMatch)
                                | (ResponseKind::Data { .. }, Stage::AwaitMatch)
                        )
                })
                .unwrap_or(false);
            if !expected {
                debug!(
                    command = registry.command_spec(id).name,
                    "unexpected response, ignoring"
                );
                return;
            }

            let kind = registry.command_spec(id).kind;
            let parsed = parse_response_body(kind, transport, reader, config).await;
            match parsed {
                Ok(captured) => {
                    let p = pending.as_mut().unwrap();
                    p.captured = captured;
                    p.stage = Stage::AwaitTerminal;
                }
                Err(e) => fail_pending(pending, matcher, e),
            }
        }

        MatchTarget::Urc(idx) => {
            let urc = registry.urcs()[idx];
            match parse_urc_body(urc.kind, transport, reader, config).await {
                Ok(event) => {
                    debug!(urc = urc.name, "unsolicited result code");
                    let _ = event_tx.send(event);
                }
                Err(e) => {
                    debug!(urc = urc.name, error = %e, "malformed URC, discarding");
                    matcher.reset();
                }
            }
        }
    }
}

/// Pull a command's response body off the stream, per its kind.
///
/// Returns the captured response (or `None` for bodiless kinds); the
/// caller advances the pending command to `AwaitTerminal`.
async fn parse_response_body(
    kind: ResponseKind,
    transport: &mut dyn Transport,
    reader: &mut ByteReader,
    config: &EngineConfig,
) -> Result<Option<AtResponse>> {
    match kind {
        ResponseKind::Basic => Ok(None),

        ResponseKind::Value => {
            let (value, _) = read_number(transport, reader, config).await?;
            Ok(Some(AtResponse::Value(value)))
        }

        ResponseKind::Fields => {
            let mut fields = Vec::new();
            loop {
                let (field, delim) = read_field(transport, reader, config).await?;
                fields.push(String::from_utf8_lossy(protocol::unquote(&field)).into_owned());
                if delim != b',' {
                    break;
                }
            }
            Ok(Some(AtResponse::Fields(fields)))
        }

        // The echo after a streamed payload: `<socket>,<len>`.
        ResponseKind::Prompt => {
            let (socket, delim) = read_socket(transport, reader, config).await?;
            if delim != b',' {
                return Err(Error::Protocol(format!(
                    "missing byte count in transmit echo for {socket}"
                )));
            }
            let (len, _) = read_number(transport, reader, config).await?;
            Ok(Some(AtResponse::Value(len)))
        }

        ResponseKind::Data { with_source } => {
            let (socket, delim) = read_socket(transport, reader, config).await?;
            if delim != b',' {
                return Err(Error::Protocol("truncated data response".into()));
            }

            let source = if with_source {
                let (ip_field, delim) = read_field(transport, reader, config).await?;
                if delim != b',' {
                    return Err(Error::Protocol("missing source port".into()));
                }
                let (port, delim) = read_number(transport, reader, config).await?;
                if delim != b',' {
                    return Err(Error::Protocol("missing byte count".into()));
                }
                let host = String::from_utf8_lossy(protocol::unquote(&ip_field)).into_owned();
                let port = u16::try_from(port)
                    .map_err(|_| Error::Protocol(format!("source port {port} out of range")))?;
                Some(RemoteAddr::new(host, port))
            } else {
                None
            };

            let (len, delim) = read_number(transport, reader, config).await?;
            let len = len as usize;
            if len > config.data_capacity {
                return Err(Error::Overflow(format!(
                    "modem reported {len} bytes, capacity {}",
                    config.data_capacity
                )));
            }

            // A `\r` right after the count means a bodiless notification;
            // a `,` introduces the quoted payload.
            let data = if delim == b',' {
                let quote = reader.next_byte(transport, config.field_timeout).await?;
                if quote != b'"' {
                    return Err(Error::Protocol("payload is not quoted".into()));
                }
                let mut data = vec![0u8; len];
                for slot in data.iter_mut() {
                    *slot = reader.next_byte(transport, config.field_timeout).await?;
                }
                let quote = reader.next_byte(transport, config.field_timeout).await?;
                if quote != b'"' {
                    return Err(Error::Protocol("unterminated payload quote".into()));
                }
                data
            } else {
                Vec::new()
            };

            Ok(Some(AtResponse::Data(SocketData {
                socket,
                source,
                data,
            })))
        }
    }
}

/// Pull a URC's fields off the stream and build the event to broadcast.
async fn parse_urc_body(
    kind: UrcKind,
    transport: &mut dyn Transport,
    reader: &mut ByteReader,
    config: &EngineConfig,
) -> Result<ModemEvent> {
    match kind {
        UrcKind::DataAvailable => {
            let (socket, delim) = read_socket(transport, reader, config).await?;
            if delim != b',' {
                return Err(Error::Protocol("missing length in data URC".into()));
            }
            let (len, _) = read_number(transport, reader, config).await?;
            Ok(ModemEvent::DataAvailable {
                socket,
                len: len as usize,
            })
        }
        UrcKind::SocketClosed => {
            let (socket, _) = read_socket(transport, reader, config).await?;
            Ok(ModemEvent::SocketClosed { socket })
        }
    }
}

// ---------------------------------------------------------------------------
// Field pulls
// ---------------------------------------------------------------------------

/// Read one field up to `,` or a response delimiter. Returns the field
/// bytes and the byte that ended it -- the distinction between `,` and
/// `\r` is significant to every caller.
async fn read_field(
    transport: &mut dyn Transport,
    reader: &mut ByteReader,
    config: &EngineConfig,
) -> Result<(Vec<u8>, u8)> {
    let mut field = Vec::new();
    loop {
        let b = reader.next_byte(transport, config.field_timeout).await?;
        if b == b',' || protocol::is_response_delimiter(b) {
            return Ok((field, if b == b',' { b',' } else { CR }));
        }
        if field.len() >= config.line_capacity {
            return Err(Error::Overflow(format!(
                "field exceeds {} bytes",
                config.line_capacity
            )));
        }
        field.push(b);
    }
}

/// Read one numeric field. Returns the value and its terminating byte.
async fn read_number(
    transport: &mut dyn Transport,
    reader: &mut ByteReader,
    config: &EngineConfig,
) -> Result<(u32, u8)> {
    let (field, delim) = read_field(transport, reader, config).await?;
    Ok((protocol::parse_numeric_token(&field)?, delim))
}

/// Read one socket-index field, enforcing the modem's socket bound.
async fn read_socket(
    transport: &mut dyn Transport,
    reader: &mut ByteReader,
    config: &EngineConfig,
) -> Result<(SocketId, u8)> {
    let (field, delim) = read_field(transport, reader, config).await?;
    Ok((protocol::parse_socket_index(&field)?, delim))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandSpec, UrcSpec};
    use telemlib_test_harness::MockTransport;

    /// A small registry shaped like the real socket command set.
    fn test_registry() -> Registry {
        let mut reg = Registry::new();
        // 0: create -- value response
        reg.command(CommandSpec {
            name: "USOCR",
            expect: b"+USOCR: ",
            kind: ResponseKind::Value,
        });
        // 1: connect -- empty literal, OK-only completion
        reg.command(CommandSpec {
            name: "USOCO",
            expect: b"",
            kind: ResponseKind::Basic,
        });
        // 2: write -- prompt + payload + echo
        reg.command(CommandSpec {
            name: "USOWR",
            expect: b"+USOWR: ",
            kind: ResponseKind::Prompt,
        });
        // 3: read -- data response
        reg.command(CommandSpec {
            name: "USORD",
            expect: b"+USORD: ",
            kind: ResponseKind::Data { with_source: false },
        });
        // 4: read-from -- data response with source address
        reg.command(CommandSpec {
            name: "USORF",
            expect: b"+USORF: ",
            kind: ResponseKind::Data { with_source: true },
        });
        // 5: query -- fields response
        reg.command(CommandSpec {
            name: "UPSND",
            expect: b"+UPSND: ",
            kind: ResponseKind::Fields,
        });
        reg.urc(UrcSpec {
            name: "UUSORD",
            prefix: b"+UUSORD: ",
            kind: UrcKind::DataAvailable,
        });
        reg.urc(UrcSpec {
            name: "UUSOCL",
            prefix: b"+UUSOCL: ",
            kind: UrcKind::SocketClosed,
        });
        reg
    }

    fn request(command: CommandId, line: &str) -> AtRequest {
        AtRequest {
            command,
            bytes: protocol::encode_request(line),
            payload: None,
        }
    }

    fn spawn(mock: MockTransport) -> (AtHandle, broadcast::Receiver<ModemEvent>) {
        let (event_tx, event_rx) = broadcast::channel(16);
        let handle = spawn_engine(
            Box::new(mock),
            test_registry(),
            EngineConfig::default(),
            event_tx,
        );
        (handle, event_rx)
    }

    const TIMEOUT: Duration = Duration::from_millis(500);

    // =======================================================================
    // Literal-then-terminal completion path
    // =======================================================================

    #[tokio::test]
    async fn value_command_completes() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+USOCR=6\r", b"\r\n+USOCR: 3\r\nOK\r\n");

        let (handle, _) = spawn(mock);
        let result = handle.execute(request(0, "+USOCR=6"), TIMEOUT).await;
        assert_eq!(result.unwrap(), AtResponse::Value(3));

        let _ = handle.shutdown().await;
    }

    #[tokio::test]
    async fn fields_command_completes() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+UPSND=0,1\r", b"\r\n+UPSND: 0,1,\"198.51.100.9\"\r\nOK\r\n");

        let (handle, _) = spawn(mock);
        let result = handle.execute(request(5, "+UPSND=0,1"), TIMEOUT).await;
        assert_eq!(
            result.unwrap(),
            AtResponse::Fields(vec!["0".into(), "1".into(), "198.51.100.9".into()])
        );

        let _ = handle.shutdown().await;
    }

    // =======================================================================
    // Empty-literal (OK-only) completion path
    // =======================================================================

    #[tokio::test]
    async fn empty_literal_completes_via_ok() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+USOCO=3,\"198.51.100.7\",4422\r", b"\r\nOK\r\n");

        let (handle, _) = spawn(mock);
        let result = handle
            .execute(request(1, "+USOCO=3,\"198.51.100.7\",4422"), TIMEOUT)
            .await;
        assert_eq!(result.unwrap(), AtResponse::Done);

        let _ = handle.shutdown().await;
    }

    #[tokio::test]
    async fn error_terminal_fails_command() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+USOCO=3,\"198.51.100.7\",4422\r", b"\r\nERROR\r\n");

        let (handle, _) = spawn(mock);
        let result = handle
            .execute(request(1, "+USOCO=3,\"198.51.100.7\",4422"), TIMEOUT)
            .await;
        assert!(matches!(result, Err(Error::Protocol(_))));

        let _ = handle.shutdown().await;
    }

    // =======================================================================
    // Timeout resets the outstanding slot
    // =======================================================================

    #[tokio::test]
    async fn timeout_errors_out_and_frees_engine() {
        let mut mock = MockTransport::new();
        // The modem stays silent; then answers the second attempt.
        mock.expect(b"AT+USOCR=6\r", b"");
        mock.expect(b"AT+USOCR=6\r", b"\r\n+USOCR: 0\r\nOK\r\n");

        let (handle, _) = spawn(mock);

        let timeout = Duration::from_millis(150);
        let start = Instant::now();
        let result = handle.execute(request(0, "+USOCR=6"), timeout).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(start.elapsed() >= timeout);

        // The engine must not be wedged by the dead exchange.
        let result = handle.execute(request(0, "+USOCR=6"), TIMEOUT).await;
        assert_eq!(result.unwrap(), AtResponse::Value(0));

        let _ = handle.shutdown().await;
    }

    // =======================================================================
    // Busy slot: racing senders do not queue
    // =======================================================================

    #[tokio::test]
    async fn second_sender_gets_busy_immediately() {
        let mut mock = MockTransport::new();
        // Only the winner's request is expected; it never gets an answer.
        mock.expect(b"AT+USOCR=6\r", b"");

        let (handle, _) = spawn(mock);
        let handle = Arc::new(handle);

        let winner = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .execute(request(0, "+USOCR=6"), Duration::from_millis(400))
                    .await
            })
        };

        // Give the winner time to claim the slot and transmit.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let start = Instant::now();
        let loser = handle.execute(request(0, "+USOCR=6"), TIMEOUT).await;
        assert!(matches!(loser, Err(Error::Busy)));
        // The refusal is immediate, not queued behind the winner.
        assert!(start.elapsed() < Duration::from_millis(100));

        assert!(matches!(winner.await.unwrap(), Err(Error::Timeout)));
    }

    // =======================================================================
    // Prompt / payload / echo path
    // =======================================================================

    #[tokio::test]
    async fn transmit_command_streams_payload_after_prompt() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+USOWR=3,4\r", b"@");
        mock.expect(b"ping", b"\r\n+USOWR: 3,4\r\nOK\r\n");

        let (handle, _) = spawn(mock);
        let result = handle
            .execute(
                AtRequest {
                    command: 2,
                    bytes: protocol::encode_request("+USOWR=3,4"),
                    payload: Some(b"ping".to_vec()),
                },
                TIMEOUT,
            )
            .await;
        assert_eq!(result.unwrap(), AtResponse::Value(4));

        let _ = handle.shutdown().await;
    }

    // =======================================================================
    // Data responses
    // =======================================================================

    #[tokio::test]
    async fn read_command_returns_payload() {
        let mut mock = MockTransport::new();
        mock.expect(
            b"AT+USORD=3,16\r",
            b"\r\n+USORD: 3,16,\"0123456789abcdef\"\r\nOK\r\n",
        );

        let (handle, _) = spawn(mock);
        let result = handle.execute(request(3, "+USORD=3,16"), TIMEOUT).await;
        match result.unwrap() {
            AtResponse::Data(data) => {
                assert_eq!(data.socket.index(), 3);
                assert!(data.source.is_none());
                assert_eq!(data.data, b"0123456789abcdef");
            }
            other => panic!("expected Data, got {other:?}"),
        }

        let _ = handle.shutdown().await;
    }

    #[tokio::test]
    async fn read_from_command_carries_source() {
        let mut mock = MockTransport::new();
        mock.expect(
            b"AT+USORF=2,8\r",
            b"\r\n+USORF: 2,\"203.0.113.5\",4422,8,\"deadbeef\"\r\nOK\r\n",
        );

        let (handle, _) = spawn(mock);
        let result = handle.execute(request(4, "+USORF=2,8"), TIMEOUT).await;
        match result.unwrap() {
            AtResponse::Data(data) => {
                assert_eq!(data.socket.index(), 2);
                let source = data.source.unwrap();
                assert_eq!(source.host, "203.0.113.5");
                assert_eq!(source.port, 4422);
                assert_eq!(data.data, b"deadbeef");
            }
            other => panic!("expected Data, got {other:?}"),
        }

        let _ = handle.shutdown().await;
    }

    #[tokio::test]
    async fn read_command_rejects_oversized_report() {
        let mut mock = MockTransport::new();
        // The modem claims more bytes than the engine's buffer holds.
        mock.expect(b"AT+USORD=3,600\r", b"\r\n+USORD: 3,600,\"");

        let (event_tx, _) = broadcast::channel(16);
        let mut config = EngineConfig::default();
        config.data_capacity = 512;
        let handle = spawn_engine(Box::new(mock), test_registry(), config, event_tx);

        let result = handle.execute(request(3, "+USORD=3,600"), TIMEOUT).await;
        assert!(matches!(result, Err(Error::Overflow(_))));

        let _ = handle.shutdown().await;
    }

    #[tokio::test]
    async fn read_command_rejects_bad_socket_index() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+USORD=3,4\r", b"\r\n+USORD: 7,4,\"abcd\"\r\nOK\r\n");

        let (handle, _) = spawn(mock);
        let result = handle.execute(request(3, "+USORD=3,4"), TIMEOUT).await;
        assert!(matches!(result, Err(Error::Protocol(_))));

        let _ = handle.shutdown().await;
    }

    // =======================================================================
    // Unsolicited result codes
    // =======================================================================

    #[tokio::test]
    async fn urc_interleaved_with_command_response() {
        let mut mock = MockTransport::new();
        mock.expect(
            b"AT+USOCR=6\r",
            b"\r\n+UUSORD: 4,128\r\n+USOCR: 2\r\nOK\r\n",
        );

        let (handle, mut event_rx) = spawn(mock);
        let result = handle.execute(request(0, "+USOCR=6"), TIMEOUT).await;
        assert_eq!(result.unwrap(), AtResponse::Value(2));

        match event_rx.recv().await.unwrap() {
            ModemEvent::DataAvailable { socket, len } => {
                assert_eq!(socket.index(), 4);
                assert_eq!(len, 128);
            }
            other => panic!("expected DataAvailable, got {other:?}"),
        }

        let _ = handle.shutdown().await;
    }

    #[tokio::test]
    async fn urc_while_idle_emits_event() {
        let mut mock = MockTransport::new();
        mock.push_unsolicited(b"\r\n+UUSOCL: 4\r\n");

        let (handle, mut event_rx) = spawn(mock);
        match event_rx.recv().await.unwrap() {
            ModemEvent::SocketClosed { socket } => assert_eq!(socket.index(), 4),
            other => panic!("expected SocketClosed, got {other:?}"),
        }

        let _ = handle.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_urc_is_discarded() {
        let mut mock = MockTransport::new();
        // Socket index 9 is outside the modem's pool; the URC is dropped
        // and the engine keeps working.
        mock.push_unsolicited(b"\r\n+UUSOCL: 9\r\n");
        mock.expect(b"AT+USOCR=6\r", b"\r\n+USOCR: 1\r\nOK\r\n");

        let (handle, mut event_rx) = spawn(mock);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(event_rx.try_recv().is_err());

        let result = handle.execute(request(0, "+USOCR=6"), TIMEOUT).await;
        assert_eq!(result.unwrap(), AtResponse::Value(1));

        let _ = handle.shutdown().await;
    }

    // =======================================================================
    // Shutdown
    // =======================================================================

    #[tokio::test]
    async fn shutdown_recovers_transport() {
        let mock = MockTransport::new();
        let (handle, _) = spawn(mock);
        let transport = handle.shutdown().await.unwrap();
        assert!(transport.is_connected());
    }
}
