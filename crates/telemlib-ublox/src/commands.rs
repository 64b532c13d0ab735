//! u-blox socket command builders and response helpers.
//!
//! This module provides functions to construct the AT command requests for
//! the u-blox socket interface (create, connect, options, control, write,
//! read, send-to, receive-from, profile query) and to interpret the
//! decoded field responses.
//!
//! All builders are pure -- they produce [`AtRequest`] values without
//! performing any I/O. The caller hands them to an
//! [`AtHandle`](telemlib_at::AtHandle) for execution.
//!
//! # Command reference
//!
//! Based on the u-blox SARA-G3/U2 AT commands manual. Socket indices are
//! 0..=6; request lines are `\r`-terminated; binary payloads are streamed
//! after the `@` prompt.

use telemlib_at::command::{AtRequest, CommandId, CommandSpec, Registry, ResponseKind, UrcKind, UrcSpec};
use telemlib_at::protocol::encode_request;
use telemlib_core::error::{Error, Result};
use telemlib_core::types::{RemoteAddr, SocketId, SocketProtocol};

// ---------------------------------------------------------------
// Socket option and profile constants
// ---------------------------------------------------------------

/// `AT+USOSO` level for TCP-level options.
pub const SOCKET_OPT_LEVEL_TCP: u16 = 6;
/// TCP keep-idle option within [`SOCKET_OPT_LEVEL_TCP`].
pub const SOCKET_OPT_KEEPIDLE: u16 = 2;
/// `AT+UPSND` parameter selecting the profile's primary DNS server.
pub const PROFILE_PARAM_DNS1: u8 = 1;
/// `AT+USOCTL` parameter reporting the last socket error.
pub const SOCKET_CTL_LAST_ERROR: u8 = 1;

/// Command ids for the registered u-blox socket command set.
///
/// Produced once by [`build_registry`]; every builder below needs the id
/// of the command it issues.
#[derive(Debug, Clone, Copy)]
pub struct UbloxCommands {
    pub usocr: CommandId,
    pub usoco: CommandId,
    pub usoso: CommandId,
    pub usoctl: CommandId,
    pub usowr: CommandId,
    pub usord: CommandId,
    pub usost: CommandId,
    pub usorf: CommandId,
    pub upsnd: CommandId,
}

/// Build the engine registry for the u-blox socket command set.
///
/// Registers every solicited response literal and the three socket URCs.
/// `USOCO` and `USOSO` answer with a bare terminal line, so their
/// response literals are empty -- they complete exclusively through the
/// `OK`/`ERROR` path.
pub fn build_registry() -> (Registry, UbloxCommands) {
    let mut reg = Registry::new();

    let cmds = UbloxCommands {
        usocr: reg.command(CommandSpec {
            name: "USOCR",
            expect: b"+USOCR: ",
            kind: ResponseKind::Value,
        }),
        usoco: reg.command(CommandSpec {
            name: "USOCO",
            expect: b"",
            kind: ResponseKind::Basic,
        }),
        usoso: reg.command(CommandSpec {
            name: "USOSO",
            expect: b"",
            kind: ResponseKind::Basic,
        }),
        usoctl: reg.command(CommandSpec {
            name: "USOCTL",
            expect: b"+USOCTL: ",
            kind: ResponseKind::Fields,
        }),
        usowr: reg.command(CommandSpec {
            name: "USOWR",
            expect: b"+USOWR: ",
            kind: ResponseKind::Prompt,
        }),
        usord: reg.command(CommandSpec {
            name: "USORD",
            expect: b"+USORD: ",
            kind: ResponseKind::Data { with_source: false },
        }),
        usost: reg.command(CommandSpec {
            name: "USOST",
            expect: b"+USOST: ",
            kind: ResponseKind::Prompt,
        }),
        usorf: reg.command(CommandSpec {
            name: "USORF",
            expect: b"+USORF: ",
            kind: ResponseKind::Data { with_source: true },
        }),
        upsnd: reg.command(CommandSpec {
            name: "UPSND",
            expect: b"+UPSND: ",
            kind: ResponseKind::Fields,
        }),
    };

    reg.urc(UrcSpec {
        name: "UUSORD",
        prefix: b"+UUSORD: ",
        kind: UrcKind::DataAvailable,
    });
    reg.urc(UrcSpec {
        name: "UUSORF",
        prefix: b"+UUSORF: ",
        kind: UrcKind::DataAvailable,
    });
    reg.urc(UrcSpec {
        name: "UUSOCL",
        prefix: b"+UUSOCL: ",
        kind: UrcKind::SocketClosed,
    });

    (reg, cmds)
}

// ---------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------

/// Build `AT+USOCR=<protocol>` -- create a socket.
pub fn create_socket(cmds: &UbloxCommands, protocol: SocketProtocol) -> AtRequest {
    AtRequest {
        command: cmds.usocr,
        bytes: encode_request(&format!("+USOCR={}", protocol.modem_code())),
        payload: None,
    }
}

/// Build `AT+USOCO=<socket>,"<host>",<port>` -- connect a socket.
pub fn connect_socket(cmds: &UbloxCommands, socket: SocketId, remote: &RemoteAddr) -> AtRequest {
    AtRequest {
        command: cmds.usoco,
        bytes: encode_request(&format!(
            "+USOCO={},\"{}\",{}",
            socket.index(),
            remote.host,
            remote.port
        )),
        payload: None,
    }
}

/// Build `AT+USOSO=<socket>,<level>,<option>,<value>` -- set a socket option.
pub fn set_socket_option(
    cmds: &UbloxCommands,
    socket: SocketId,
    level: u16,
    option: u16,
    value: u32,
) -> AtRequest {
    AtRequest {
        command: cmds.usoso,
        bytes: encode_request(&format!(
            "+USOSO={},{level},{option},{value}",
            socket.index()
        )),
        payload: None,
    }
}

/// Build `AT+USOCTL=<socket>,<param>` -- query socket control information.
pub fn socket_control(cmds: &UbloxCommands, socket: SocketId, param: u8) -> AtRequest {
    AtRequest {
        command: cmds.usoctl,
        bytes: encode_request(&format!("+USOCTL={},{param}", socket.index())),
        payload: None,
    }
}

/// Build `AT+USOWR=<socket>,<len>` -- write to a connected socket.
///
/// The payload is streamed after the modem's `@` prompt.
pub fn write_socket(cmds: &UbloxCommands, socket: SocketId, payload: Vec<u8>) -> AtRequest {
    AtRequest {
        command: cmds.usowr,
        bytes: encode_request(&format!("+USOWR={},{}", socket.index(), payload.len())),
        payload: Some(payload),
    }
}

/// Build `AT+USORD=<socket>,<len>` -- read from a connected socket.
pub fn read_socket(cmds: &UbloxCommands, socket: SocketId, len: usize) -> AtRequest {
    AtRequest {
        command: cmds.usord,
        bytes: encode_request(&format!("+USORD={},{len}", socket.index())),
        payload: None,
    }
}

/// Build `AT+USOST=<socket>,"<host>",<port>,<len>` -- send a datagram.
///
/// The payload is streamed after the modem's `@` prompt.
pub fn send_to(
    cmds: &UbloxCommands,
    socket: SocketId,
    remote: &RemoteAddr,
    payload: Vec<u8>,
) -> AtRequest {
    AtRequest {
        command: cmds.usost,
        bytes: encode_request(&format!(
            "+USOST={},\"{}\",{},{}",
            socket.index(),
            remote.host,
            remote.port,
            payload.len()
        )),
        payload: Some(payload),
    }
}

/// Build `AT+USORF=<socket>,<len>` -- receive a datagram with its source.
pub fn receive_from(cmds: &UbloxCommands, socket: SocketId, len: usize) -> AtRequest {
    AtRequest {
        command: cmds.usorf,
        bytes: encode_request(&format!("+USORF={},{len}", socket.index())),
        payload: None,
    }
}

/// Build `AT+UPSND=<profile>,<param>` -- query a packet-switched profile
/// parameter (used to fetch the network-assigned DNS server).
pub fn query_profile(cmds: &UbloxCommands, profile: u8, param: u8) -> AtRequest {
    AtRequest {
        command: cmds.upsnd,
        bytes: encode_request(&format!("+UPSND={profile},{param}")),
        payload: None,
    }
}

// ---------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------

/// Extract the address string from a `+UPSND: <profile>,<param>,"<addr>"`
/// field response.
pub fn parse_profile_address(fields: &[String]) -> Result<String> {
    match fields {
        [_, _, addr, ..] if !addr.is_empty() => Ok(addr.clone()),
        _ => Err(Error::Protocol(format!(
            "malformed UPSND response: {fields:?}"
        ))),
    }
}

/// Extract the value from a `+USOCTL: <socket>,<param>,<value>` field
/// response.
pub fn parse_control_value(fields: &[String]) -> Result<u32> {
    match fields {
        [_, _, value, ..] => value
            .parse::<u32>()
            .map_err(|_| Error::Protocol(format!("non-numeric USOCTL value {value:?}"))),
        _ => Err(Error::Protocol(format!(
            "malformed USOCTL response: {fields:?}"
        ))),
    }
}
