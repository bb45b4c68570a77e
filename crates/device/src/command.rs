use crate::driver::{DeviceInfo, MoveCommand};

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceRequest {
    Takeoff,
    Land,
    Move(MoveCommand),
    SetMode(String),
    StartRecording,
    StopRecording,
    Info,

    /// Replace a simulated driver with the real platform.
    UseHardware,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceResponse {
    Done,
    Info(DeviceInfo),
    Switched { driver: &'static str },
}
