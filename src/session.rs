//! Session: the command/ACK state machine and owning context for one connected vehicle.
//!
//! Every write-side command (arm, takeoff, set_mode, set_parameter) follows the same
//! send-then-await-ACK shape, backed by the condvar-based [`crate::ack::AckSlot`].

use mavlink::common::{self, MavAutopilot, MavMessage, MavType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::ack::{AckOutcome, AckSlot};
use crate::config::Config;
use crate::error::SessionError;
use crate::flight_log::{EventType, FlightLogger};
use crate::link::LinkAdapter;
use crate::modes;
use crate::params::{self, ParamStore};
use crate::telemetry::TelemetryState;

#[derive(Debug, Default)]
struct ModeContext {
    autopilot: Option<MavAutopilot>,
    vehicle_type: Option<MavType>,
    custom_mode: u32,
}

/// Owns one Link Adapter, one Parameter Store, one Telemetry State, one optional Flight
/// Logger, and the three ACK slots (arm/takeoff/set-mode).
/// Invariant (a): `connected ⇒ link.is_some()`, enforced here by storing `link`/`logger`
/// inside the same `Mutex<Option<_>>` pair and flipping `connected` alongside them.
pub struct Session {
    pub connection_string: String,
    session_id: String,
    config: Config,
    link: Mutex<Option<LinkAdapter>>,
    logger: Mutex<Option<FlightLogger>>,
    connected: AtomicBool,
    telemetry: Mutex<TelemetryState>,
    parameters: Mutex<ParamStore>,
    mode_context: Mutex<ModeContext>,
    last_telemetry_log_ts: Mutex<Option<Instant>>,
    ack_arm: AckSlot,
    ack_takeoff: AckSlot,
    ack_set_mode: AckSlot,
    // Command outer-API serializer: only one command op may run on this Session at a time.
    // The receiver loop never takes this lock.
    command_lock: Mutex<()>,
}

impl Session {
    /// Builds an unconnected `Session`. `pub` so integration tests (a separate crate) can
    /// construct one and drive it straight to `connect_with_link` over a fake transport.
    pub fn new(connection_string: String, config: Config) -> Self {
        Self {
            connection_string,
            session_id: Uuid::new_v4().to_string(),
            config,
            link: Mutex::new(None),
            logger: Mutex::new(None),
            connected: AtomicBool::new(false),
            telemetry: Mutex::new(TelemetryState::default()),
            parameters: Mutex::new(ParamStore::default()),
            mode_context: Mutex::new(ModeContext::default()),
            last_telemetry_log_ts: Mutex::new(None),
            ack_arm: AckSlot::new(),
            ack_takeoff: AckSlot::new(),
            ack_set_mode: AckSlot::new(),
            command_lock: Mutex::new(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Creates a fresh `Session`, opens the link,
    /// waits for a heartbeat, runs full parameter retrieval, then opens the Flight Logger and
    /// marks the session connected. Any failure after opening the link closes it again and
    /// returns the session half-built so the caller (Session Manager) can roll the registry
    /// insertion back — this function never leaves a connected-looking `Session` behind on
    /// error.
    pub fn connect(connection_string: String, config: Config) -> Result<Self, SessionError> {
        let session = Session::new(connection_string, config);
        let link = LinkAdapter::open(&session.connection_string)?;
        session.connect_with_link(link)?;
        Ok(session)
    }

    /// Shared by production `connect` (after opening a real link) and tests (after building a
    /// [`LinkAdapter`] over a [`crate::testutil::FakeLink`]) — the rest of the connect
    /// sequence (heartbeat, parameter retrieval, logger, connected flag) doesn't care how the
    /// link was obtained.
    pub fn connect_with_link(&self, link: LinkAdapter) -> Result<(), SessionError> {
        let heartbeat = link.wait_heartbeat(self.config.heartbeat_timeout)?;
        self.update_mode_context(&MavMessage::HEARTBEAT(heartbeat.clone()));
        self.telemetry
            .lock()
            .expect("telemetry mutex poisoned")
            .update(&MavMessage::HEARTBEAT(heartbeat));

        let mut store = ParamStore::default();
        if let Err(err) = params::retrieve_all_params(&link, &mut store, self.config.param_retrieval_timeout) {
            return Err(err);
        }

        let logger = FlightLogger::open(
            &self.config.flight_log_dir,
            &self.connection_string,
            &self.session_id,
            self.config.compress_flight_logs,
            chrono::Utc::now(),
        )
        .map_err(SessionError::Io)?;
        logger.write(EventType::ConnectionConnected, serde_json::json!({}));

        *self.parameters.lock().expect("parameters mutex poisoned") = store;
        *self.link.lock().expect("link mutex poisoned") = Some(link);
        *self.logger.lock().expect("logger mutex poisoned") = Some(logger);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// `disconnect()`: closes the Flight Logger (emitting SESSION_END), drops the link, and
    /// resets telemetry/parameter state so a later `connect` on the same `Session` starts
    /// clean.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        let _guard = self.command_lock.lock().expect("command mutex poisoned");
        if !self.is_connected() {
            return Err(SessionError::DroneNotConnected);
        }
        if let Some(logger) = self.logger.lock().expect("logger mutex poisoned").take() {
            logger.write(EventType::ConnectionDisconnected, serde_json::json!({}));
            logger.close();
        }
        *self.link.lock().expect("link mutex poisoned") = None;
        *self.telemetry.lock().expect("telemetry mutex poisoned") = TelemetryState::default();
        *self.parameters.lock().expect("parameters mutex poisoned") = ParamStore::default();
        *self.mode_context.lock().expect("mode context mutex poisoned") = ModeContext::default();
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn with_link<T>(&self, f: impl FnOnce(&LinkAdapter) -> Result<T, SessionError>) -> Result<T, SessionError> {
        let guard = self.link.lock().expect("link mutex poisoned");
        let link = guard.as_ref().ok_or(SessionError::DroneNotConnected)?;
        f(link)
    }

    fn log(&self, event_type: EventType, data: serde_json::Value) {
        if let Some(logger) = self.logger.lock().expect("logger mutex poisoned").as_ref() {
            logger.write(event_type, data);
        }
    }

    fn wait_ack(&self, slot: &AckSlot, kind_timeout_msg: &str, kind_denied_msg: &str) -> Result<(), SessionError> {
        match slot.wait(self.config.ack_timeout) {
            AckOutcome::Accepted => Ok(()),
            AckOutcome::Rejected => Err(SessionError::CommandFailed(kind_denied_msg.to_string())),
            AckOutcome::TimedOut => Err(SessionError::AckTimeout(kind_timeout_msg.to_string())),
        }
    }

    /// Arms the vehicle and waits for the matching `COMMAND_ACK`.
    pub fn arm(&self) -> Result<(), SessionError> {
        let _guard = self.command_lock.lock().expect("command mutex poisoned");
        if !self.is_connected() {
            return Err(SessionError::DroneNotConnected);
        }
        self.ack_arm.reset();
        self.with_link(|link| {
            link.send_command_long(
                common::MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            )
        })?;
        let result = self.wait_ack(&self.ack_arm, "Timeout waiting for arming ACK", "Arming failed");
        match &result {
            Ok(()) => self.log(EventType::Command, serde_json::json!({"name": "ARM", "success": true})),
            Err(err) => self.log(
                EventType::Command,
                serde_json::json!({"name": "ARM", "success": false, "error_type": err.kind()}),
            ),
        }
        result
    }

    /// Commands takeoff to `height` metres, logging symmetric to `arm()`.
    pub fn takeoff(&self, height: f32) -> Result<(), SessionError> {
        let _guard = self.command_lock.lock().expect("command mutex poisoned");
        if !self.is_connected() {
            return Err(SessionError::DroneNotConnected);
        }
        self.ack_takeoff.reset();
        self.with_link(|link| {
            link.send_command_long(
                common::MavCmd::MAV_CMD_NAV_TAKEOFF,
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, height],
            )
        })?;
        let result = self.wait_ack(
            &self.ack_takeoff,
            "Timeout waiting for takeoff ACK",
            "Takeoff failed",
        );
        match &result {
            Ok(()) => self.log(EventType::Command, serde_json::json!({"name": "TAKEOFF", "success": true, "height": height})),
            Err(err) => self.log(
                EventType::Command,
                serde_json::json!({"name": "TAKEOFF", "success": false, "error_type": err.kind()}),
            ),
        }
        result
    }

    /// `land()`: fire-and-forget — no ACK slot is touched.
    pub fn land(&self) -> Result<(), SessionError> {
        let _guard = self.command_lock.lock().expect("command mutex poisoned");
        if !self.is_connected() {
            return Err(SessionError::DroneNotConnected);
        }
        let land_mode = self.lookup_mode_number("LAND").unwrap_or(9);
        self.with_link(|link| link.set_mode(land_mode))?;
        self.log(EventType::Command, serde_json::json!({"name": "LAND", "success": true}));
        Ok(())
    }

    fn lookup_mode_number(&self, name: &str) -> Option<u32> {
        let ctx = self.mode_context.lock().expect("mode context mutex poisoned");
        let (autopilot, vehicle_type) = (ctx.autopilot?, ctx.vehicle_type?);
        modes::mode_number(autopilot, vehicle_type, name)
    }

    /// Uppercases and looks up `mode`, returning `ValueError` on an unknown name, then runs
    /// the same ACK-wait shape as arm/takeoff.
    pub fn set_mode(&self, mode: &str) -> Result<(), SessionError> {
        let _guard = self.command_lock.lock().expect("command mutex poisoned");
        if !self.is_connected() {
            return Err(SessionError::DroneNotConnected);
        }
        let upper = mode.to_uppercase();
        let custom_mode = self
            .lookup_mode_number(&upper)
            .ok_or_else(|| SessionError::ValueError(upper.clone()))?;

        self.ack_set_mode.reset();
        self.with_link(|link| link.set_mode(custom_mode))?;
        match self.wait_ack(
            &self.ack_set_mode,
            &format!("Timeout waiting for set_mode({upper}) ACK"),
            &format!("failed setting {upper} mode"),
        ) {
            Ok(()) => {
                self.log(EventType::ModeChange, serde_json::json!({"mode": upper}));
                Ok(())
            }
            Err(err) => {
                self.log(
                    EventType::Command,
                    serde_json::json!({"name": "SET_MODE", "success": false, "error_type": err.kind(), "mode": upper}),
                );
                Err(err)
            }
        }
    }

    /// Records the old value (may be absent), sends `param_set`, then waits for the
    /// parameter store to settle before returning.
    pub fn set_parameter(&self, id: &str, value: f32) -> Result<(), SessionError> {
        let _guard = self.command_lock.lock().expect("command mutex poisoned");
        if !self.is_connected() {
            return Err(SessionError::DroneNotConnected);
        }
        let old_value = self.parameters.lock().expect("parameters mutex poisoned").get(id).ok();

        self.with_link(|link| link.param_set(id, value))?;
        self.wait_param_quiescence();

        self.log(
            EventType::ParameterChange,
            serde_json::json!({"id": id, "old_value": old_value, "new_value": value}),
        );
        Ok(())
    }

    /// Spins on the parameter count at a fine grain, resetting the deadline each time it
    /// grows, and returns once it has been still for the configured quiescence window.
    fn wait_param_quiescence(&self) {
        let quiescence = self.config.param_quiescence;
        let mut last_count = self.parameters.lock().expect("parameters mutex poisoned").param_count();
        let mut deadline = Instant::now() + quiescence;
        loop {
            if Instant::now() >= deadline {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
            let count = self.parameters.lock().expect("parameters mutex poisoned").param_count();
            if count != last_count {
                last_count = count;
                deadline = Instant::now() + quiescence;
            }
        }
    }

    pub fn get_available_modes(&self) -> Result<Vec<String>, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::DroneNotConnected);
        }
        let ctx = self.mode_context.lock().expect("mode context mutex poisoned");
        match (ctx.autopilot, ctx.vehicle_type) {
            (Some(autopilot), Some(vehicle_type)) => Ok(modes::available_mode_names(autopilot, vehicle_type)),
            _ => Ok(Vec::new()),
        }
    }

    pub fn get_drone_info(&self) -> Result<TelemetryState, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::DroneNotConnected);
        }
        Ok(self.telemetry.lock().expect("telemetry mutex poisoned").clone())
    }

    pub fn get_all_parameters(&self) -> Result<std::collections::HashMap<String, f32>, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::DroneNotConnected);
        }
        Ok(self.parameters.lock().expect("parameters mutex poisoned").get_all())
    }

    /// One receiver-loop tick for this session: serviced only once connected and past
    /// parameter retrieval (`param_count() > 0`), so the connecting caller's synchronous
    /// retrieval phase on this same Link Adapter is never raced.
    pub fn service_one_tick(&self) {
        if !self.is_connected() {
            return;
        }
        if self.parameters.lock().expect("parameters mutex poisoned").param_count() == 0 {
            return;
        }
        let msg = self
            .link
            .lock()
            .expect("link mutex poisoned")
            .as_ref()
            .and_then(|link| link.recv());
        if let Some(msg) = msg {
            self.update_info(&msg);
        }
    }

    /// Called only by the Session Manager's receiver loop: routes one message into
    /// Telemetry State, Parameter Store, and the relevant ACK slot, then maybe appends a
    /// rate-limited TELEMETRY log line.
    pub fn update_info(&self, msg: &MavMessage) {
        self.update_mode_context(msg);
        self.parameters.lock().expect("parameters mutex poisoned").update(msg);
        {
            let mut telemetry = self.telemetry.lock().expect("telemetry mutex poisoned");
            telemetry.update(msg);
            telemetry.mode = self.current_mode_name();
        }
        self.dispatch_ack(msg);
        self.maybe_log_telemetry(msg);
    }

    fn update_mode_context(&self, msg: &MavMessage) {
        if let MavMessage::HEARTBEAT(data) = msg {
            let mut ctx = self.mode_context.lock().expect("mode context mutex poisoned");
            if ctx.autopilot.is_none() {
                ctx.autopilot = Some(data.autopilot);
                ctx.vehicle_type = Some(data.mavtype);
            }
            ctx.custom_mode = data.custom_mode;
        }
    }

    fn current_mode_name(&self) -> String {
        let ctx = self.mode_context.lock().expect("mode context mutex poisoned");
        match (ctx.autopilot, ctx.vehicle_type) {
            (Some(autopilot), Some(vehicle_type)) => modes::mode_name(autopilot, vehicle_type, ctx.custom_mode),
            _ => "STABILIZE".to_string(),
        }
    }

    fn dispatch_ack(&self, msg: &MavMessage) {
        let MavMessage::COMMAND_ACK(data) = msg else {
            return;
        };
        let state = match data.result {
            common::MavResult::MAV_RESULT_ACCEPTED => crate::ack::AckState::Accepted,
            common::MavResult::MAV_RESULT_TEMPORARILY_REJECTED | common::MavResult::MAV_RESULT_DENIED => {
                crate::ack::AckState::Denied
            }
            _ => crate::ack::AckState::Failed,
        };
        match data.command {
            common::MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => self.ack_arm.set(state),
            common::MavCmd::MAV_CMD_NAV_TAKEOFF => self.ack_takeoff.set(state),
            common::MavCmd::MAV_CMD_DO_SET_MODE => self.ack_set_mode.set(state),
            _ => {}
        }
    }

    fn maybe_log_telemetry(&self, msg: &MavMessage) {
        let interesting = matches!(
            msg,
            MavMessage::LOCAL_POSITION_NED(_)
                | MavMessage::VFR_HUD(_)
                | MavMessage::BATTERY_STATUS(_)
                | MavMessage::ATTITUDE(_)
        );
        if !interesting {
            return;
        }
        let mut last = self.last_telemetry_log_ts.lock().expect("telemetry ts mutex poisoned");
        let due = match *last {
            Some(previous) => previous.elapsed() >= self.config.telemetry_log_interval,
            None => true,
        };
        if !due {
            return;
        }
        *last = Some(Instant::now());
        drop(last);
        let snapshot = self.telemetry.lock().expect("telemetry mutex poisoned").clone();
        self.log(
            EventType::Telemetry,
            serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::SharedFakeLink;
    use mavlink::common::{COMMAND_ACK_DATA, HEARTBEAT_DATA, MavAutopilot, MavModeFlag, MavResult, MavState, PARAM_VALUE_DATA};
    use std::sync::Arc;

    fn connected_session() -> (Arc<Session>, SharedFakeLink) {
        let fake = SharedFakeLink::new();
        fake.push_incoming(MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 4,
            mavtype: MavType::MAV_TYPE_QUADROTOR,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode: MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        }));
        fake.push_incoming(MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
            param_value: 1.0,
            param_count: 1,
            param_index: 0,
            param_id: crate::link::param_id_bytes("ARMING_CHECK"),
            param_type: common::MavParamType::MAV_PARAM_TYPE_REAL32,
        }));

        let session = Session::new("udp:test".to_string(), Config::default());
        let link = LinkAdapter::from_connection(fake.boxed());
        session.connect_with_link(link).unwrap();
        (Arc::new(session), fake)
    }

    /// Pumps `session.update_info` off whatever the Link Adapter's `recv()` returns, the way
    /// the Session Manager's receiver loop does, until `stop` is set. Standing in for that
    /// loop lets these tests exercise the real ACK-wait path instead of calling
    /// `update_info` by hand.
    fn spawn_pump(session: Arc<Session>, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let msg = session
                    .link
                    .lock()
                    .expect("link mutex poisoned")
                    .as_ref()
                    .and_then(|link| link.recv());
                if let Some(msg) = msg {
                    session.update_info(&msg);
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        })
    }

    #[test]
    fn arm_succeeds_when_fake_replies_accepted() {
        let (session, fake) = connected_session();
        fake.on_send(|msg| match msg {
            MavMessage::COMMAND_LONG(data) if data.command == common::MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => {
                Some(MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                    result: MavResult::MAV_RESULT_ACCEPTED,
                    command: common::MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                    ..Default::default()
                }))
            }
            _ => None,
        });

        let stop = Arc::new(AtomicBool::new(false));
        let pump = spawn_pump(Arc::clone(&session), Arc::clone(&stop));

        let result = session.arm();
        stop.store(true, Ordering::Relaxed);
        pump.join().unwrap();

        assert!(result.is_ok());
    }

    #[test]
    fn arm_denied_fails_with_command_failed() {
        let (session, fake) = connected_session();
        fake.on_send(|msg| match msg {
            MavMessage::COMMAND_LONG(data) if data.command == common::MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => {
                Some(MavMessage::COMMAND_ACK(COMMAND_ACK_DATA {
                    result: MavResult::MAV_RESULT_DENIED,
                    command: common::MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
                    ..Default::default()
                }))
            }
            _ => None,
        });

        let stop = Arc::new(AtomicBool::new(false));
        let pump = spawn_pump(Arc::clone(&session), Arc::clone(&stop));
        let result = session.arm();
        stop.store(true, Ordering::Relaxed);
        pump.join().unwrap();

        assert!(matches!(result, Err(SessionError::CommandFailed(_))));
    }

    #[test]
    fn arm_times_out_without_any_ack() {
        let (session, _fake) = connected_session();
        let start = Instant::now();
        let result = session.arm();
        let elapsed = start.elapsed();
        assert!(matches!(result, Err(SessionError::AckTimeout(_))));
        assert!(elapsed >= Duration::from_millis(450));
    }

    #[test]
    fn set_mode_unknown_fails_without_sending() {
        let (session, fake) = connected_session();
        let result = session.set_mode("FOOBAR");
        assert!(matches!(result, Err(SessionError::ValueError(_))));
        assert!(fake.sent_messages().is_empty());
    }

    #[test]
    fn operations_require_connected_state() {
        let session = Session::new("udp:not-connected".to_string(), Config::default());
        assert!(matches!(session.arm(), Err(SessionError::DroneNotConnected)));
        assert!(matches!(
            session.get_drone_info(),
            Err(SessionError::DroneNotConnected)
        ));
    }
}
