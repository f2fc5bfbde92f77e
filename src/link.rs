//! Link Adapter — one MAVLink connection, owned exclusively by its Session.
//!
//! The production connection is the synchronous MAVLink wire-codec connection type; tests
//! substitute a fake implementing the same [`MavConnection`] trait over scripted in-memory
//! queues (see `src/testutil.rs`).

use mavlink::common::{self, MavMessage};
use mavlink::{MavConnection, MavHeader, MavlinkVersion};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::SessionError;

/// GCS system/component id this process identifies itself with.
pub const GCS_SYSTEM_ID: u8 = 255;
pub const GCS_COMPONENT_ID: u8 = 190;

/// One MAVLink connection, guarded so a caller thread's `send_*` and the receiver thread's
/// `recv()` cannot tear a frame in flight. Not `Clone`: a `LinkAdapter` is owned by exactly
/// one [`crate::session::Session`].
pub struct LinkAdapter {
    conn: Mutex<Box<dyn MavConnection<MavMessage> + Send>>,
    target: TargetId,
}

// Lets `target_system`/`target_component` be updated from the receiver thread (on first
// HEARTBEAT) and read from caller threads without a second lock; scalar hints, not a
// consistency-critical cut.
struct TargetId {
    seen: AtomicBool,
    system_id: std::sync::atomic::AtomicU8,
    component_id: std::sync::atomic::AtomicU8,
}

impl LinkAdapter {
    /// Opens a connection over the given connection string (`udpin:...`, `serial:...`, etc,
    /// whatever the `mavlink` crate's address grammar accepts).
    pub fn open(conn_string: &str) -> Result<Self, SessionError> {
        let mut conn = mavlink::connect::<MavMessage>(conn_string)
            .map_err(|err| SessionError::Io(io::Error::new(io::ErrorKind::Other, err.to_string())))?;
        conn.set_allow_recv_any_version(true);
        Ok(Self {
            conn: Mutex::new(conn),
            target: TargetId {
                seen: AtomicBool::new(false),
                system_id: std::sync::atomic::AtomicU8::new(0),
                component_id: std::sync::atomic::AtomicU8::new(0),
            },
        })
    }

    /// Wraps an already-open connection; used by tests to inject a fake transport.
    pub fn from_connection(conn: Box<dyn MavConnection<MavMessage> + Send>) -> Self {
        Self {
            conn: Mutex::new(conn),
            target: TargetId {
                seen: AtomicBool::new(false),
                system_id: std::sync::atomic::AtomicU8::new(0),
                component_id: std::sync::atomic::AtomicU8::new(0),
            },
        }
    }

    fn remember_target(&self, header: &MavHeader) {
        if header.system_id == 0 {
            return;
        }
        self.target.system_id.store(header.system_id, Ordering::Relaxed);
        self.target
            .component_id
            .store(header.component_id, Ordering::Relaxed);
        self.target.seen.store(true, Ordering::Relaxed);
    }

    fn target_ids(&self) -> (u8, u8) {
        (
            self.target.system_id.load(Ordering::Relaxed),
            self.target.component_id.load(Ordering::Relaxed),
        )
    }

    /// Non-blocking receive: `Ok(None)` on "nothing this tick" (`WouldBlock`/`TimedOut`),
    /// `Ok(Some(msg))` on a decoded frame. Any other I/O/decode error is logged at `warn`
    /// and swallowed, matching the contract that `recv()` errors never propagate.
    pub fn recv(&self) -> Option<MavMessage> {
        let conn = self.conn.lock().expect("link mutex poisoned");
        match conn.try_recv() {
            Ok((header, message)) => {
                self.remember_target(&header);
                Some(message)
            }
            Err(err) => {
                if !is_non_fatal_read_error(&err) {
                    warn!(error = %err, "link read error");
                }
                None
            }
        }
    }

    /// Blocks up to `timeout` polling for a `HEARTBEAT`, returning the heartbeat data on
    /// success. Used once at connect time.
    pub fn wait_heartbeat(&self, timeout: Duration) -> Result<common::HEARTBEAT_DATA, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(MavMessage::HEARTBEAT(data)) = self.recv() {
                return Ok(data);
            }
            if Instant::now() >= deadline {
                return Err(SessionError::AckTimeout(
                    "Timeout waiting for heartbeat".to_string(),
                ));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Blocks up to `timeout`, returning the first message for which `predicate` returns
    /// true. Used by parameter retrieval and the ACK-wait fallback paths.
    pub fn recv_matching<F>(&self, timeout: Duration, mut predicate: F) -> Option<MavMessage>
    where
        F: FnMut(&MavMessage) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.recv() {
                if predicate(&msg) {
                    return Some(msg);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn send(&self, message: MavMessage) -> Result<(), SessionError> {
        let conn = self.conn.lock().expect("link mutex poisoned");
        conn.send(
            &MavHeader {
                system_id: GCS_SYSTEM_ID,
                component_id: GCS_COMPONENT_ID,
                sequence: 0,
            },
            &message,
        )
        .map(|_| ())
        .map_err(|err| SessionError::Io(io::Error::new(io::ErrorKind::Other, err.to_string())))
    }

    pub fn send_command_long(&self, command: common::MavCmd, params: [f32; 7]) -> Result<(), SessionError> {
        let (target_system, target_component) = self.target_ids();
        self.send(MavMessage::COMMAND_LONG(common::COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system,
            target_component,
            confirmation: 0,
        }))
    }

    /// Sent as `MAV_CMD_DO_SET_MODE` over `COMMAND_LONG` (rather than a bare `SET_MODE`
    /// frame) so it produces the `COMMAND_ACK` the set-mode ACK slot waits on, the same way
    /// arm/takeoff do.
    pub fn set_mode(&self, custom_mode: u32) -> Result<(), SessionError> {
        self.send_command_long(
            common::MavCmd::MAV_CMD_DO_SET_MODE,
            [
                common::MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
                custom_mode as f32,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
            ],
        )
    }

    pub fn param_set(&self, param_id: &str, value: f32) -> Result<(), SessionError> {
        let (target_system, target_component) = self.target_ids();
        self.send(MavMessage::PARAM_SET(common::PARAM_SET_DATA {
            param_value: value,
            target_system,
            target_component,
            param_id: param_id_bytes(param_id),
            param_type: common::MavParamType::MAV_PARAM_TYPE_REAL32,
        }))
    }

    pub fn param_request_list(&self) -> Result<(), SessionError> {
        let (target_system, target_component) = self.target_ids();
        self.send(MavMessage::PARAM_REQUEST_LIST(
            common::PARAM_REQUEST_LIST_DATA {
                target_system,
                target_component,
            },
        ))
    }

    pub fn param_request_read(&self, index: i16) -> Result<(), SessionError> {
        let (target_system, target_component) = self.target_ids();
        self.send(MavMessage::PARAM_REQUEST_READ(
            common::PARAM_REQUEST_READ_DATA {
                param_index: index,
                target_system,
                target_component,
                param_id: [0; 16],
            },
        ))
    }

    pub fn protocol_version(&self) -> MavlinkVersion {
        self.conn.lock().expect("link mutex poisoned").protocol_version()
    }
}

/// MAVLink `param_id` fields are fixed 16-byte arrays, NUL-padded, not length-prefixed.
pub fn param_id_bytes(id: &str) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    for (slot, byte) in bytes.iter_mut().zip(id.as_bytes().iter()) {
        *slot = *byte;
    }
    bytes
}

fn is_non_fatal_read_error(error: &mavlink::error::MessageReadError) -> bool {
    match error {
        mavlink::error::MessageReadError::Io(io_error) => {
            io_error.kind() == io::ErrorKind::WouldBlock || io_error.kind() == io::ErrorKind::TimedOut
        }
        _ => false,
    }
}
