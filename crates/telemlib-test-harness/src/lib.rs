//! telemlib-test-harness: mock transports for protocol testing.
//!
//! Provides deterministic stand-ins for the two physical links telemlib
//! drives:
//!
//! - [`MockTransport`] -- scripted byte-level serial link for AT engine
//!   and socket-layer tests
//! - [`MockCanBus`] -- scripted CAN bus for ISO-TP codec tests
//!
//! Both record everything sent through them so tests can assert exact
//! wire traffic.

pub mod mock_can;
pub mod mock_serial;

pub use mock_can::MockCanBus;
pub use mock_serial::MockTransport;
