//! Error taxonomy surfaced by [`crate::session::Session`] and [`crate::manager::SessionManager`].
//!
//! Variant names and `Display` text mirror the exception kinds the HTTP layer this crate feeds
//! maps to 400 response bodies of shape `{response, type}`; the `type` tag is the variant name
//! itself via [`SessionError::kind`].

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Drone not connected")]
    DroneNotConnected,

    #[error("Drone already connected")]
    DroneAlreadyConnected,

    #[error("{0}")]
    AckTimeout(String),

    #[error("{0}")]
    CommandFailed(String),

    #[error("Unknown mode '{0}'")]
    ValueError(String),

    #[error("parameter '{0}' not found")]
    KeyNotFound(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("MAVLink I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Stable string tag for the API-layer `{response, type}` error body.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::DroneNotConnected => "DroneNotConnectedException",
            SessionError::DroneAlreadyConnected => "DroneAlreadyConnectedException",
            SessionError::AckTimeout(_) => "ACKTimeoutException",
            SessionError::CommandFailed(_) => "CommandFailedException",
            SessionError::ValueError(_) => "ValueError",
            SessionError::KeyNotFound(_) => "KeyNotFound",
            SessionError::SessionNotFound(_) => "KeyNotFound",
            SessionError::Io(_) => "IoError",
        }
    }
}
