//! telemlib-at: the AT command protocol engine.
//!
//! This crate implements the byte-level protocol machinery for driving a
//! Hayes-style cellular modem over an unreliable serial link:
//!
//! - [`protocol`] -- request framing, terminal literals, field parsing
//! - [`matcher`] -- byte-at-a-time prefix matching over response literals
//! - [`command`] -- the closed command/URC descriptor model
//! - [`engine`] -- the IO task tying it all to a
//!   [`Transport`](telemlib_core::Transport)
//!
//! The crate is modem-agnostic: it knows how AT responses are shaped, not
//! which commands exist. Concrete command sets live in backend crates
//! (see `telemlib-ublox`).

pub mod command;
pub mod engine;
pub mod matcher;
pub mod protocol;

pub use command::{
    AtRequest, AtResponse, CommandId, CommandSpec, Registry, ResponseKind, SocketData, UrcKind,
    UrcSpec,
};
pub use engine::{spawn_engine, AtHandle, EngineConfig};
pub use matcher::{Matcher, Token, MAX_EXPECTATIONS};
