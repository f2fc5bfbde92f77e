//! Telemetry State: the live, continuously-updated snapshot of one vehicle's flight data.

use mavlink::common::{self, MavMessage, MavModeFlag};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct BaseModeFlags {
    pub stabilize: bool,
    pub auto: bool,
    pub manual_input: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct Vfr {
    pub airspeed: f32,
    pub groundspeed: f32,
    pub heading: i16,
    pub throttle: u16,
    pub altitude: f32,
    pub climb: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct Ekf {
    pub velocity_variance: f32,
    pub pos_horiz_variance: f32,
    pub pos_vert_variance: f32,
    pub compass_variance: f32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TelemetryState {
    pub position: Position,
    pub waypoint_distance: f32,
    pub armed: bool,
    pub mode: String,
    pub base_mode_flags: BaseModeFlags,
    pub vfr: Vfr,
    pub attitude: Attitude,
    pub ekf: Ekf,
    pub ekf_ok: bool,
    pub battery_level: i8,
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self {
            position: Position::default(),
            waypoint_distance: 0.0,
            armed: false,
            mode: "STABILIZE".to_string(),
            base_mode_flags: BaseModeFlags::default(),
            vfr: Vfr::default(),
            attitude: Attitude::default(),
            ekf: Ekf::default(),
            ekf_ok: false,
            battery_level: 0,
        }
    }
}

impl TelemetryState {
    /// Dispatches a single MAVLink message, mutating the relevant fields. Only the receiver
    /// loop calls this; unknown message types are ignored.
    pub fn update(&mut self, msg: &MavMessage) {
        match msg {
            MavMessage::LOCAL_POSITION_NED(data) => {
                self.position = Position {
                    x: data.x,
                    y: data.y,
                    z: data.z,
                };
            }
            MavMessage::NAV_CONTROLLER_OUTPUT(data) => {
                self.waypoint_distance = data.wp_dist as f32;
            }
            MavMessage::BATTERY_STATUS(data) => {
                self.battery_level = data.battery_remaining;
            }
            MavMessage::HEARTBEAT(data) if data.mavtype == common::MavType::MAV_TYPE_QUADROTOR => {
                self.armed = data.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                self.base_mode_flags = BaseModeFlags {
                    stabilize: data.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_STABILIZE_ENABLED),
                    auto: data.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_AUTO_ENABLED),
                    manual_input: data
                        .base_mode
                        .contains(MavModeFlag::MAV_MODE_FLAG_MANUAL_INPUT_ENABLED),
                };
            }
            MavMessage::VFR_HUD(data) => {
                self.vfr = Vfr {
                    airspeed: data.airspeed,
                    groundspeed: data.groundspeed,
                    heading: data.heading,
                    throttle: data.throttle,
                    altitude: data.alt,
                    climb: data.climb,
                };
            }
            MavMessage::ATTITUDE(data) => {
                self.attitude = Attitude {
                    roll: data.roll,
                    pitch: data.pitch,
                    yaw: data.yaw,
                };
            }
            MavMessage::EKF_STATUS_REPORT(data) => {
                self.ekf = Ekf {
                    velocity_variance: data.velocity_variance,
                    pos_horiz_variance: data.pos_horiz_variance,
                    pos_vert_variance: data.pos_vert_variance,
                    compass_variance: data.compass_variance,
                };
                self.ekf_ok = data.flags.contains(common::EkfStatusFlags::EKF_ATTITUDE)
                    && data.flags.contains(common::EkfStatusFlags::EKF_VELOCITY_HORIZ)
                    && data.flags.contains(common::EkfStatusFlags::EKF_VELOCITY_VERT)
                    && data.flags.contains(common::EkfStatusFlags::EKF_POS_HORIZ_REL)
                    && data.flags.contains(common::EkfStatusFlags::EKF_PRED_POS_HORIZ_REL);
            }
            _ => {}
        }
    }
}
