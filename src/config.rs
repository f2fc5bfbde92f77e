//! Groups the process's numeric tuning constants (timeouts, poll rate, log directory) behind
//! a single `Default` impl rather than scattering them through the session and receiver loop.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Receiver thread polling rate, in Hz.
    pub read_frequency_hz: u32,
    /// Bound on `wait_heartbeat` during connect.
    pub heartbeat_timeout: Duration,
    /// Bound on an ACK slot wait (arm/takeoff/set_mode).
    pub ack_timeout: Duration,
    /// Idle-quiescence bound on a parameter write wait.
    pub param_quiescence: Duration,
    /// Per-message timeout used during full parameter retrieval.
    pub param_retrieval_timeout: Duration,
    /// Minimum spacing between TELEMETRY flight-log entries for one session.
    pub telemetry_log_interval: Duration,
    /// Directory flight logs are written under, relative to the process CWD unless absolute.
    pub flight_log_dir: std::path::PathBuf,
    /// Whether new flight logs are gzip-compressed by default.
    pub compress_flight_logs: bool,
}

impl Config {
    /// Duration of one receiver-thread tick: `1 / read_frequency_hz`.
    pub fn read_tick(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.read_frequency_hz as f64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_frequency_hz: 4000,
            heartbeat_timeout: Duration::from_secs(3),
            ack_timeout: Duration::from_millis(500),
            param_quiescence: Duration::from_millis(300),
            param_retrieval_timeout: Duration::from_secs(2),
            telemetry_log_interval: Duration::from_secs(1),
            flight_log_dir: std::path::PathBuf::from("flight_logs"),
            compress_flight_logs: true,
        }
    }
}
