// telemlib test application -- CLI tool for exercising the modem socket
// path and the ISO-TP codec against real hardware or a mock transport.
//
// Usage:
//   telemlib-test-app --port /dev/ttyUSB0 send --host 198.51.100.7 --remote-port 4422 --data ping
//   telemlib-test-app --mock send --data ping
//   telemlib-test-app --mock recv-demo
//   telemlib-test-app --port /dev/ttyUSB0 probe
//
// ISO-TP commands (require the `socketcan` feature and a CAN interface,
// e.g. a vcan0 pair for bench testing):
//   telemlib-test-app isotp-send --interface vcan0 --tx-id 0x7ff --rx-id 0x6ff --data deadbeef
//   telemlib-test-app isotp-recv --interface vcan0 --tx-id 0x6ff --rx-id 0x7ff

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use telemlib::{ModemBuilder, RemoteAddr, SocketProtocol, UbloxModem};
use telemlib_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// telemlib test application -- exercises the modem and ISO-TP paths.
#[derive(Parser)]
#[command(name = "telemlib-test-app", version)]
struct Cli {
    /// Serial port of the cellular modem (e.g. /dev/ttyUSB0).
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate for the modem serial port.
    #[arg(long, global = true, default_value_t = 115_200)]
    baud: u32,

    /// Use a scripted mock transport instead of real hardware.
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Proto {
    Tcp,
    Udp,
}

impl From<Proto> for SocketProtocol {
    fn from(proto: Proto) -> Self {
        match proto {
            Proto::Tcp => SocketProtocol::Tcp,
            Proto::Udp => SocketProtocol::Udp,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a socket, connect it, and send one payload.
    Send {
        /// Remote host to connect to.
        #[arg(long, default_value = "198.51.100.7")]
        host: String,
        /// Remote port to connect to.
        #[arg(long, default_value_t = 4422)]
        remote_port: u16,
        /// Socket protocol.
        #[arg(long, value_enum, default_value_t = Proto::Tcp)]
        proto: Proto,
        /// Payload to send.
        #[arg(long)]
        data: String,
    },

    /// Demonstrate the unsolicited-data receive path (mock only).
    RecvDemo,

    /// Open the modem link and report each socket slot's last error.
    Probe,

    /// Send one ISO-TP message on a CAN interface.
    #[cfg(feature = "socketcan")]
    IsotpSend {
        /// CAN interface name (e.g. can0 or vcan0).
        #[arg(long, default_value = "can0")]
        interface: String,
        /// Identifier to transmit on (hex, e.g. 0x7ff).
        #[arg(long, value_parser = parse_can_id)]
        tx_id: u16,
        /// Identifier the peer transmits on.
        #[arg(long, value_parser = parse_can_id)]
        rx_id: u16,
        /// Payload as a hex string (e.g. deadbeef).
        #[arg(long)]
        data: String,
    },

    /// Receive one ISO-TP message from a CAN interface.
    #[cfg(feature = "socketcan")]
    IsotpRecv {
        /// CAN interface name.
        #[arg(long, default_value = "can0")]
        interface: String,
        /// Identifier to transmit flow control on.
        #[arg(long, value_parser = parse_can_id)]
        tx_id: u16,
        /// Identifier the peer transmits on.
        #[arg(long, value_parser = parse_can_id)]
        rx_id: u16,
        /// Receive deadline in milliseconds.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

#[cfg(feature = "socketcan")]
fn parse_can_id(s: &str) -> std::result::Result<u16, String> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    u16::from_str_radix(raw, 16).map_err(|e| format!("bad CAN id {s:?}: {e}"))
}

// ---------------------------------------------------------------------------
// Modem construction
// ---------------------------------------------------------------------------

/// Build a modem over real serial or a scripted mock.
async fn build_modem(cli: &Cli, mock: Option<MockTransport>) -> Result<UbloxModem> {
    let builder = ModemBuilder::new().command_timeout(Duration::from_secs(2));
    if let Some(mock) = mock {
        return builder
            .build_with_transport(Box::new(mock))
            .await
            .context("building modem over mock transport");
    }
    let port = cli
        .port
        .as_deref()
        .context("--port is required without --mock")?;
    builder
        .serial_port(port)
        .baud_rate(cli.baud)
        .build()
        .await
        .with_context(|| format!("opening modem on {port}"))
}

/// Script the mock exchange for a `send` run.
///
/// The mock carries the exact bytes the subcommand will produce, so a
/// `--mock` run exercises the full engine, matcher, and socket layer
/// without hardware.
fn mock_for_send(host: &str, remote_port: u16, proto: Proto, data: &str) -> MockTransport {
    let mut mock = MockTransport::new();
    match proto {
        Proto::Tcp => {
            mock.expect(b"AT+USOCR=6\r", b"\r\n+USOCR: 0\r\nOK\r\n");
            mock.expect(b"AT+USOSO=0,6,2,10000\r", b"\r\nOK\r\n");
            mock.expect(
                format!("AT+USOCO=0,\"{host}\",{remote_port}\r").as_bytes(),
                b"\r\nOK\r\n",
            );
            mock.expect(format!("AT+USOWR=0,{}\r", data.len()).as_bytes(), b"@");
            mock.expect(
                data.as_bytes(),
                format!("\r\n+USOWR: 0,{}\r\nOK\r\n", data.len()).as_bytes(),
            );
        }
        Proto::Udp => {
            mock.expect(b"AT+USOCR=17\r", b"\r\n+USOCR: 0\r\nOK\r\n");
            mock.expect(
                format!("AT+USOCO=0,\"{host}\",{remote_port}\r").as_bytes(),
                b"\r\nOK\r\n",
            );
            mock.expect(
                format!("AT+USOST=0,\"{host}\",{remote_port},{}\r", data.len()).as_bytes(),
                b"@",
            );
            mock.expect(
                data.as_bytes(),
                format!("\r\n+USOST: 0,{}\r\nOK\r\n", data.len()).as_bytes(),
            );
        }
    }
    mock
}

/// Script the mock exchange for the receive demo.
fn mock_for_recv_demo() -> MockTransport {
    let mut mock = MockTransport::new();
    mock.expect(b"AT+USOCR=6\r", b"\r\n+USOCR: 0\r\nOK\r\n");
    mock.expect(b"AT+USOSO=0,6,2,10000\r", b"\r\nOK\r\n");
    mock.expect(b"AT+USOCO=0,\"198.51.100.7\",4422\r", b"\r\nOK\r\n");
    mock.push_unsolicited(b"\r\n+UUSORD: 0,9\r\n");
    mock.expect(b"AT+USORD=0,9\r", b"\r\n+USORD: 0,9,\"telemetry\"\r\nOK\r\n");
    mock
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run_send(cli: &Cli, host: &str, remote_port: u16, proto: Proto, data: &str) -> Result<()> {
    let mock = cli
        .mock
        .then(|| mock_for_send(host, remote_port, proto, data));
    let modem = build_modem(cli, mock).await?;

    let socket = modem
        .create_socket(proto.into(), RemoteAddr::new(host, remote_port))
        .await
        .context("creating socket")?;
    println!("created {socket}");

    modem.open_socket(socket).await.context("opening socket")?;
    println!("connected to {host}:{remote_port}");

    modem.queue_send(socket, data.as_bytes()).await?;
    modem.service().await.context("draining send ring")?;
    println!("sent {} bytes", data.len());

    modem.shutdown().await.ok();
    Ok(())
}

async fn run_recv_demo(cli: &Cli) -> Result<()> {
    if !cli.mock {
        bail!("recv-demo only runs with --mock");
    }
    let modem = build_modem(cli, Some(mock_for_recv_demo())).await?;

    let socket = modem
        .create_socket(SocketProtocol::Tcp, RemoteAddr::new("198.51.100.7", 4422))
        .await?;
    modem.open_socket(socket).await?;

    // Let the engine pick the unsolicited notification off the wire, then
    // drain it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    modem.service().await?;

    let data = modem.take_received(socket, 256).await?;
    println!(
        "received {} bytes: {}",
        data.len(),
        String::from_utf8_lossy(&data)
    );

    modem.shutdown().await.ok();
    Ok(())
}

async fn run_probe(cli: &Cli) -> Result<()> {
    if cli.mock {
        bail!("probe needs real hardware; run it with --port");
    }
    let modem = build_modem(cli, None).await?;

    for index in 0..=telemlib::SocketId::MAX_INDEX {
        let id = telemlib::SocketId::new(index).expect("index in range");
        match modem.last_socket_error(id).await {
            Ok(code) => println!("{id}: last error {code}"),
            Err(e) => println!("{id}: {e}"),
        }
    }

    modem.shutdown().await.ok();
    Ok(())
}

#[cfg(feature = "socketcan")]
async fn run_isotp_send(interface: &str, tx_id: u16, rx_id: u16, data: &str) -> Result<()> {
    use telemlib::transport::SocketCanBus;
    use telemlib::{IsoTpConfig, IsoTpSession};

    let payload = parse_hex(data)?;
    let bus = SocketCanBus::open(interface)?;
    let mut session = IsoTpSession::new(bus, IsoTpConfig::new(tx_id, rx_id))?;
    session.send(&payload).await.context("ISO-TP send")?;
    println!("sent {} bytes on 0x{tx_id:03X}", payload.len());
    Ok(())
}

#[cfg(feature = "socketcan")]
async fn run_isotp_recv(interface: &str, tx_id: u16, rx_id: u16, timeout_ms: u64) -> Result<()> {
    use telemlib::isotp::MAX_MESSAGE_LEN;
    use telemlib::transport::SocketCanBus;
    use telemlib::{IsoTpConfig, IsoTpSession};

    let bus = SocketCanBus::open(interface)?;
    let mut session = IsoTpSession::new(bus, IsoTpConfig::new(tx_id, rx_id))?;
    let message = session
        .recv(MAX_MESSAGE_LEN, Duration::from_millis(timeout_ms))
        .await
        .context("ISO-TP receive")?;

    let hex: String = message.iter().map(|b| format!("{b:02x}")).collect();
    println!("received {} bytes: {hex}", message.len());
    Ok(())
}

#[cfg(feature = "socketcan")]
fn parse_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        bail!("hex payload has odd length");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).context("bad hex digit"))
        .collect()
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Send {
            host,
            remote_port,
            proto,
            data,
        } => run_send(&cli, host, *remote_port, *proto, data).await,
        Command::RecvDemo => run_recv_demo(&cli).await,
        Command::Probe => run_probe(&cli).await,
        #[cfg(feature = "socketcan")]
        Command::IsotpSend {
            interface,
            tx_id,
            rx_id,
            data,
        } => run_isotp_send(interface, *tx_id, *rx_id, data).await,
        #[cfg(feature = "socketcan")]
        Command::IsotpRecv {
            interface,
            tx_id,
            rx_id,
            timeout_ms,
        } => run_isotp_recv(interface, *tx_id, *rx_id, *timeout_ms).await,
    }
}
