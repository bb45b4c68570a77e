use async_trait::async_trait;
use dr_types::DeviceTelemetry;
use serde::Serialize;

use crate::DeviceError;

// stand-in for the real platform
pub mod simulated;

// DJI Tello over its UDP SDK
pub mod tello;

pub use simulated::*;
pub use tello::*;

/// Flight modes a client may select.
pub const FLIGHT_MODES: [&str; 5] = ["manual", "face_tracking", "slam", "path_planning", "neural"];

pub(crate) fn validate_mode(mode: &str) -> Result<(), DeviceError> {
    if FLIGHT_MODES.contains(&mode) {
        Ok(())
    } else {
        Err(DeviceError::InvalidMode(mode.to_owned()))
    }
}

/// Stick inputs as percentages in -100..=100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MoveCommand {
    pub left_right: f32,
    pub forward_backward: f32,
    pub up_down: f32,
    pub yaw: f32,
}

impl MoveCommand {
    pub fn new(left_right: f32, forward_backward: f32, up_down: f32, yaw: f32) -> Self {
        Self {
            left_right,
            forward_backward,
            up_down,
            yaw,
        }
    }

    pub fn clamped(self) -> Self {
        let c = |v: f32| if v.is_finite() { v.clamp(-100.0, 100.0) } else { 0.0 };

        Self {
            left_right: c(self.left_right),
            forward_backward: c(self.forward_backward),
            up_down: c(self.up_down),
            yaw: c(self.yaw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub driver: &'static str,
    pub hardware: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    pub telemetry: DeviceTelemetry,
}

/// The operations the relay needs from a flying platform. Implementations
/// are driven by a single task, so they may assume calls never overlap.
#[async_trait]
pub trait DeviceDriver: Send {
    fn name(&self) -> &'static str;

    fn is_hardware(&self) -> bool;

    async fn takeoff(&mut self) -> Result<(), DeviceError>;

    async fn land(&mut self) -> Result<(), DeviceError>;

    async fn move_by(&mut self, cmd: MoveCommand) -> Result<(), DeviceError>;

    async fn set_mode(&mut self, mode: &str) -> Result<(), DeviceError>;

    async fn start_recording(&mut self) -> Result<(), DeviceError>;

    async fn stop_recording(&mut self) -> Result<(), DeviceError>;

    async fn telemetry(&mut self) -> Result<DeviceTelemetry, DeviceError>;

    fn info(&self) -> DeviceInfo;
}
