//! Command descriptors and the engine's request/response vocabulary.
//!
//! The set of response shapes a cellular modem produces is fixed and known
//! at compile time, so commands are modeled as a closed tagged enum of
//! kinds dispatched by pattern match -- no trait objects, no heap-allocated
//! polymorphic command hierarchy. A concrete backend (see `telemlib-ublox`)
//! builds a [`Registry`] of [`CommandSpec`]s and [`UrcSpec`]s once, at
//! driver construction, and refers to commands by index afterwards.

use telemlib_core::types::{RemoteAddr, SocketId};

/// How a command's solicited response is shaped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// No payload on the response line. The response literal may be empty,
    /// in which case the command completes exclusively through the
    /// terminal `OK`/`ERROR` line.
    Basic,

    /// Literal prefix followed by a single numeric field up to `\r`
    /// (e.g. `+USOCR: 3`).
    Value,

    /// Literal prefix followed by comma-separated fields up to `\r`
    /// (e.g. `+UPSND: 0,1,"198.51.100.9"`).
    Fields,

    /// Data-transmit command: the modem answers with an `@` prompt, the
    /// engine streams the staged binary payload, and the modem echoes
    /// `<literal><socket>,<len>` before the terminal line.
    Prompt,

    /// Data-receive command: literal prefix followed by
    /// `<socket>[,"<ip>",<port>],<len>,"<payload>"` pulled directly off
    /// the byte stream.
    Data {
        /// `true` when the response carries the sender's IP and port
        /// (`+USORF`); `false` for connection-oriented reads (`+USORD`).
        with_source: bool,
    },
}

/// Descriptor of one command: its name, the exact response literal to
/// match, and the shape of what follows the literal.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Human-readable name, used only in logs.
    pub name: &'static str,
    /// Response literal the matcher arms for this command. Empty for
    /// commands that answer with a bare terminal line.
    pub expect: &'static [u8],
    /// Response shape.
    pub kind: ResponseKind,
}

/// What an unsolicited result code carries after its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrcKind {
    /// `<socket>,<len>` -- the modem announces unread bytes
    /// (`+UUSORD`, `+UUSORF`).
    DataAvailable,
    /// `<socket>` -- the remote end closed the socket (`+UUSOCL`).
    SocketClosed,
}

/// Descriptor of one unsolicited result code.
///
/// URCs match independently of the in-flight command slot and are
/// immediately terminal: their own match completes them, there is no
/// `OK` to await.
#[derive(Debug, Clone, Copy)]
pub struct UrcSpec {
    /// Human-readable name, used only in logs.
    pub name: &'static str,
    /// Response literal the matcher arms for this URC.
    pub prefix: &'static [u8],
    /// Payload shape after the prefix.
    pub kind: UrcKind,
}

/// Identifier of a command within a [`Registry`].
pub type CommandId = usize;

/// The fixed command/URC table a backend registers with the engine.
#[derive(Debug, Default)]
pub struct Registry {
    commands: Vec<CommandSpec>,
    urcs: Vec<UrcSpec>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Registry {
            commands: Vec::new(),
            urcs: Vec::new(),
        }
    }

    /// Add a command descriptor, returning its [`CommandId`].
    pub fn command(&mut self, spec: CommandSpec) -> CommandId {
        self.commands.push(spec);
        self.commands.len() - 1
    }

    /// Add an unsolicited result code descriptor.
    pub fn urc(&mut self, spec: UrcSpec) {
        self.urcs.push(spec);
    }

    /// Look up a command descriptor.
    pub fn command_spec(&self, id: CommandId) -> &CommandSpec {
        &self.commands[id]
    }

    /// All registered commands, in registration order.
    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    /// All registered URCs, in registration order.
    pub fn urcs(&self) -> &[UrcSpec] {
        &self.urcs
    }
}

/// A request handed to the engine for execution.
#[derive(Debug)]
pub struct AtRequest {
    /// Which command this is, within the engine's registry.
    pub command: CommandId,
    /// The complete request line, including the `AT` prefix and `\r`.
    pub bytes: Vec<u8>,
    /// Binary payload to stream after the `@` prompt. Only meaningful for
    /// [`ResponseKind::Prompt`] commands.
    pub payload: Option<Vec<u8>>,
}

/// Payload block returned by a data-receive command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketData {
    /// Socket the data was read from.
    pub socket: SocketId,
    /// Sender address, present for `+USORF` responses.
    pub source: Option<RemoteAddr>,
    /// The payload bytes.
    pub data: Vec<u8>,
}

/// The decoded outcome of a successfully completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtResponse {
    /// Terminal `OK` with nothing captured.
    Done,
    /// A single numeric value (socket id from `USOCR`, byte count from
    /// `USOWR`/`USOST`).
    Value(u32),
    /// Raw comma-separated fields (`UPSND`, `USOCTL`), quotes stripped.
    Fields(Vec<String>),
    /// A data block from `USORD`/`USORF`.
    Data(SocketData),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_assigns_sequential_ids() {
        let mut reg = Registry::new();
        let a = reg.command(CommandSpec {
            name: "USOCR",
            expect: b"+USOCR: ",
            kind: ResponseKind::Value,
        });
        let b = reg.command(CommandSpec {
            name: "USOCO",
            expect: b"",
            kind: ResponseKind::Basic,
        });
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(reg.command_spec(a).name, "USOCR");
        assert_eq!(reg.command_spec(b).expect, b"");
    }

    #[test]
    fn registry_tracks_urcs() {
        let mut reg = Registry::new();
        reg.urc(UrcSpec {
            name: "UUSORD",
            prefix: b"+UUSORD: ",
            kind: UrcKind::DataAvailable,
        });
        assert_eq!(reg.urcs().len(), 1);
        assert_eq!(reg.urcs()[0].kind, UrcKind::DataAvailable);
    }
}
