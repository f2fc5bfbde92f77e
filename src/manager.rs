//! Session Manager — the process-wide registry plus the single shared receiver thread.
//!
//! One background thread ticks every registered session's telemetry/parameter/ACK state
//! instead of spawning a thread per connection, so the registry stays responsive to lock-free
//! snapshots even with dozens of vehicles attached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::SessionError;
use crate::session::Session;
use crate::telemetry::TelemetryState;

static MANAGER: OnceLock<Arc<SessionManager>> = OnceLock::new();

/// A registry slot is reserved (`Connecting`) the instant `connect_drone` passes its
/// already-registered check, before the slow I/O of `Session::connect` runs, so a second
/// concurrent call for the same connection string sees the reservation instead of racing
/// through to a duplicate insert.
enum Slot {
    Connecting,
    Ready(Arc<Session>),
}

pub struct SessionManager {
    config: Config,
    registry: Mutex<HashMap<String, Slot>>,
    stop: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

/// Initializes the process-wide singleton on first call, spawning its receiver thread;
/// subsequent calls are no-ops that return the existing instance (an `Arc` clone), matching
/// the "constructed on first use" contract.
pub fn init(config: Config) -> Arc<SessionManager> {
    Arc::clone(MANAGER.get_or_init(|| {
        let stop = Arc::new(AtomicBool::new(false));
        let manager = Arc::new(SessionManager {
            config: config.clone(),
            registry: Mutex::new(HashMap::new()),
            stop: Arc::clone(&stop),
            receiver: Mutex::new(None),
        });
        let tick = config.read_tick();
        let receiver_manager = Arc::clone(&manager);
        let handle = std::thread::spawn(move || receiver_loop(receiver_manager, stop, tick));
        *manager.receiver.lock().expect("receiver handle mutex poisoned") = Some(handle);
        manager
    }))
}

/// Returns the singleton, panicking if [`init`] has not yet run. Only ever called after
/// `main` has initialized the manager, so this is a programmer-error assertion, not a
/// recoverable condition.
pub fn instance() -> Arc<SessionManager> {
    Arc::clone(MANAGER.get().expect("SessionManager::init was not called"))
}

impl SessionManager {
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn get(&self, connection_string: &str) -> Option<Arc<Session>> {
        match self.registry.lock().expect("registry mutex poisoned").get(connection_string) {
            Some(Slot::Ready(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// The registry-level wrapper around `Session::connect`. Reserves the connection string
    /// with a `Slot::Connecting` placeholder under the same lock acquisition that checks for
    /// an existing entry, so a second concurrent call for the same string is rejected instead
    /// of racing through to a duplicate insert while the slow I/O of `Session::connect` runs.
    /// On failure the reservation is removed — there is nothing else to roll back, since
    /// `Session::connect` only returns `Ok` once the session is fully formed.
    pub fn connect_drone(&self, connection_string: &str) -> Result<(), SessionError> {
        {
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            if registry.contains_key(connection_string) {
                return Err(SessionError::DroneAlreadyConnected);
            }
            registry.insert(connection_string.to_string(), Slot::Connecting);
        }
        match Session::connect(connection_string.to_string(), self.config.clone()) {
            Ok(session) => {
                self.registry
                    .lock()
                    .expect("registry mutex poisoned")
                    .insert(connection_string.to_string(), Slot::Ready(Arc::new(session)));
                info!(connection = connection_string, "drone connected");
                Ok(())
            }
            Err(err) => {
                self.registry.lock().expect("registry mutex poisoned").remove(connection_string);
                Err(err)
            }
        }
    }

    pub fn disconnect_drone(&self, connection_string: &str) -> Result<(), SessionError> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        if !matches!(registry.get(connection_string), Some(Slot::Ready(_))) {
            return Err(SessionError::SessionNotFound(connection_string.to_string()));
        }
        let Some(Slot::Ready(session)) = registry.remove(connection_string) else {
            unreachable!("checked Ready above");
        };
        drop(registry);
        session.disconnect()?;
        info!(connection = connection_string, "drone disconnected");
        Ok(())
    }

    pub fn arm(&self, connection_string: &str) -> Result<(), SessionError> {
        self.session(connection_string)?.arm()
    }

    pub fn takeoff(&self, connection_string: &str, height: f32) -> Result<(), SessionError> {
        self.session(connection_string)?.takeoff(height)
    }

    pub fn land(&self, connection_string: &str) -> Result<(), SessionError> {
        self.session(connection_string)?.land()
    }

    pub fn set_mode(&self, connection_string: &str, mode: &str) -> Result<(), SessionError> {
        self.session(connection_string)?.set_mode(mode)
    }

    pub fn set_parameter(&self, connection_string: &str, id: &str, value: f32) -> Result<(), SessionError> {
        self.session(connection_string)?.set_parameter(id, value)
    }

    pub fn get_available_modes(&self, connection_string: &str) -> Result<Vec<String>, SessionError> {
        self.session(connection_string)?.get_available_modes()
    }

    pub fn get_drone_info(&self, connection_string: &str) -> Result<TelemetryState, SessionError> {
        self.session(connection_string)?.get_drone_info()
    }

    pub fn get_all_parameters(&self, connection_string: &str) -> Result<HashMap<String, f32>, SessionError> {
        self.session(connection_string)?.get_all_parameters()
    }

    fn session(&self, connection_string: &str) -> Result<Arc<Session>, SessionError> {
        self.get(connection_string)
            .ok_or_else(|| SessionError::SessionNotFound(connection_string.to_string()))
    }

    /// `get_all_info()`: returns a snapshot of every registered session's telemetry, keyed by
    /// connection string.
    pub fn get_all_info(&self) -> HashMap<String, TelemetryState> {
        let snapshot: Vec<(String, Arc<Session>)> = self
            .registry
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .filter_map(|(conn, slot)| match slot {
                Slot::Ready(session) => Some((conn.clone(), Arc::clone(session))),
                Slot::Connecting => None,
            })
            .collect();
        snapshot
            .into_iter()
            .filter_map(|(conn, session)| session.get_drone_info().ok().map(|info| (conn, info)))
            .collect()
    }

    /// Flips the stop flag, waits for the receiver thread to observe it and join, then
    /// disconnects every still-registered session so no flight log is left without a
    /// terminating line.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.receiver.lock().expect("receiver handle mutex poisoned").take() {
            let _ = handle.join();
        }
        let sessions: Vec<(String, Arc<Session>)> = self
            .registry
            .lock()
            .expect("registry mutex poisoned")
            .drain()
            .filter_map(|(conn, slot)| match slot {
                Slot::Ready(session) => Some((conn, session)),
                Slot::Connecting => None,
            })
            .collect();
        for (connection_string, session) in sessions {
            if let Err(err) = session.disconnect() {
                warn!(connection = %connection_string, error = %err, "error disconnecting session at shutdown");
            }
        }
    }
}

/// Sleep one tick, snapshot the registry under lock, then iterate lock-free, servicing only
/// sessions whose parameter retrieval has already completed (`param_count() > 0`) so the
/// connecting caller's synchronous retrieval phase is never raced.
fn receiver_loop(manager: Arc<SessionManager>, stop: Arc<AtomicBool>, tick: Duration) {
    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(tick);
        let snapshot: Vec<Arc<Session>> = manager
            .registry
            .lock()
            .expect("registry mutex poisoned")
            .values()
            .filter_map(|slot| match slot {
                Slot::Ready(session) => Some(Arc::clone(session)),
                Slot::Connecting => None,
            })
            .collect();
        for session in snapshot {
            session.service_one_tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::SharedFakeLink;
    use mavlink::common::{self, HEARTBEAT_DATA, MavAutopilot, MavModeFlag, MavState, MavType, PARAM_VALUE_DATA};

    fn make_connected_session(connection_string: &str, config: Config) -> Arc<Session> {
        let fake = SharedFakeLink::new();
        fake.push_incoming(mavlink::common::MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        }));
        fake.push_incoming(mavlink::common::MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
            param_value: 1.0,
            param_count: 1,
            param_index: 0,
            param_id: crate::link::param_id_bytes("P"),
            param_type: common::MavParamType::MAV_PARAM_TYPE_REAL32,
        }));
        let session = Session::new(connection_string.to_string(), config);
        let link = crate::link::LinkAdapter::from_connection(fake.boxed());
        session.connect_with_link(link).unwrap();
        Arc::new(session)
    }

    #[test]
    fn get_all_info_returns_every_registered_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.flight_log_dir = dir.path().to_path_buf();

        let manager = SessionManager {
            config: config.clone(),
            registry: Mutex::new(HashMap::new()),
            stop: Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
        };
        manager.registry.lock().unwrap().insert(
            "udp:A".to_string(),
            Slot::Ready(make_connected_session("udp:A", config.clone())),
        );
        manager
            .registry
            .lock()
            .unwrap()
            .insert("udp:B".to_string(), Slot::Ready(make_connected_session("udp:B", config)));

        let info = manager.get_all_info();
        assert_eq!(info.len(), 2, "get_all_info must return every session, not one");
        assert!(info.contains_key("udp:A"));
        assert!(info.contains_key("udp:B"));
    }

    #[test]
    fn disconnect_unknown_session_errors() {
        let manager = SessionManager {
            config: Config::default(),
            registry: Mutex::new(HashMap::new()),
            stop: Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
        };
        assert!(matches!(
            manager.disconnect_drone("udp:missing"),
            Err(SessionError::SessionNotFound(_))
        ));
    }
}
