use std::time::Duration;

use thiserror::Error;

/// Reasons a platform command can fail. These are reported to whoever issued
/// the command and never retried here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("already flying")]
    AlreadyFlying,

    #[error("not flying")]
    NotFlying,

    #[error("battery too low for takeoff ({0:.0}%)")]
    LowBattery(f32),

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("invalid mode '{0}'")]
    InvalidMode(String),

    #[error("link unavailable: {0}")]
    LinkUnavailable(String),

    #[error("platform rejected command: {0}")]
    Rejected(String),

    #[error("platform did not respond within {0:?}")]
    Timeout(Duration),
}
