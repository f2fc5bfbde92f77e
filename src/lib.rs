//! Multi-vehicle MAVLink session manager: registry, receiver scheduler, and command/ACK
//! state machine. Covers the link adapter, parameter store, telemetry state, session,
//! session manager, flight logger, and ack slot; the outward HTTP surface and the physical
//! transport live outside this crate.

pub mod ack;
pub mod config;
pub mod error;
pub mod flight_log;
pub mod link;
pub mod manager;
pub mod modes;
pub mod params;
pub mod session;
pub mod telemetry;

/// Fake MAVLink transport for tests, shared between this crate's own unit tests and any
/// downstream integration tests that need to drive a `Session` without a physical link.
pub mod testutil;

pub use config::Config;
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::Session;
