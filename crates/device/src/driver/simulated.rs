use async_trait::async_trait;
use dr_types::DeviceTelemetry;
use tokio::time::Instant;
use tracing::*;

use super::{validate_mode, DeviceDriver, DeviceInfo, MoveCommand};
use crate::DeviceError;

/// Height the simulated platform climbs to after takeoff, in meters
const TAKEOFF_ALTITUDE: f32 = 1.0;

const MAX_ALTITUDE: f32 = 30.0;

/// Vertical speed in meters per second
const CLIMB_RATE: f32 = 1.0;

/// Meters of target altitude change for a full stick input
const ALTITUDE_PER_MOVE: f32 = 0.5;

/// Degrees of heading change for a full stick input
const YAW_PER_MOVE: f32 = 30.0;

/// Tilt in degrees for a full stick input
const MAX_TILT: f32 = 15.0;

/// Fraction of tilt that remains after one second without input
const TILT_DECAY: f32 = 0.2;

const MIN_TAKEOFF_BATTERY: f32 = 10.0;

/// Battery drain in percent per second
const DRAIN_FLYING: f32 = 0.05;
const DRAIN_IDLE: f32 = 0.005;

const TEMP_IDLE: f32 = 25.0;
const TEMP_FLYING: f32 = 40.0;

/// Degrees Celsius per second
const TEMP_RATE: f32 = 0.1;

/// A platform that exists only in memory. It keeps the same rules a real
/// airframe would enforce (no takeoff while airborne, no moves on the ground)
/// so clients can be exercised without hardware.
pub struct SimulatedDriver {
    state: DeviceTelemetry,
    target_altitude: f32,
    last_tick: Option<Instant>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::with_state(DeviceTelemetry::default())
    }

    pub fn with_state(state: DeviceTelemetry) -> Self {
        Self {
            target_altitude: state.altitude,
            state,
            last_tick: None,
        }
    }

    /// Advances the simulation to the current instant.
    fn tick(&mut self) {
        let now = Instant::now();
        let dt = self
            .last_tick
            .map_or(0.0, |last_tick| (now - last_tick).as_secs_f32());
        self.last_tick = Some(now);

        if dt <= 0.0 {
            return;
        }

        let s = &mut self.state;

        let delta = self.target_altitude - s.altitude;
        let step = CLIMB_RATE * dt;
        s.altitude = if delta.abs() <= step {
            self.target_altitude
        } else {
            s.altitude + step * delta.signum()
        };

        let decay = TILT_DECAY.powf(dt);
        s.attitude.pitch *= decay;
        s.attitude.roll *= decay;

        let drain = if s.is_flying { DRAIN_FLYING } else { DRAIN_IDLE };
        s.battery = (s.battery - drain * dt).max(0.0);

        let temp_target = if s.is_flying { TEMP_FLYING } else { TEMP_IDLE };
        let temp_delta = temp_target - s.temperature;
        s.temperature += temp_delta.signum() * (TEMP_RATE * dt).min(temp_delta.abs());
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDriver for SimulatedDriver {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn is_hardware(&self) -> bool {
        false
    }

    async fn takeoff(&mut self) -> Result<(), DeviceError> {
        self.tick();

        if self.state.is_flying {
            return Err(DeviceError::AlreadyFlying);
        }

        if self.state.battery < MIN_TAKEOFF_BATTERY {
            return Err(DeviceError::LowBattery(self.state.battery));
        }

        debug!("simulated takeoff");
        self.state.is_flying = true;
        self.target_altitude = TAKEOFF_ALTITUDE;

        Ok(())
    }

    async fn land(&mut self) -> Result<(), DeviceError> {
        self.tick();

        if !self.state.is_flying {
            return Err(DeviceError::NotFlying);
        }

        debug!("simulated landing");
        self.state.is_flying = false;
        self.target_altitude = 0.0;
        self.state.attitude.pitch = 0.0;
        self.state.attitude.roll = 0.0;

        Ok(())
    }

    async fn move_by(&mut self, cmd: MoveCommand) -> Result<(), DeviceError> {
        self.tick();

        if !self.state.is_flying {
            return Err(DeviceError::NotFlying);
        }

        let cmd = cmd.clamped();
        trace!("simulated move {:?}", cmd);

        self.target_altitude = (self.target_altitude + cmd.up_down / 100.0 * ALTITUDE_PER_MOVE)
            .clamp(0.0, MAX_ALTITUDE);

        let a = &mut self.state.attitude;
        a.pitch = cmd.forward_backward / 100.0 * MAX_TILT;
        a.roll = cmd.left_right / 100.0 * MAX_TILT;
        a.yaw = (a.yaw + cmd.yaw / 100.0 * YAW_PER_MOVE).rem_euclid(360.0);

        Ok(())
    }

    async fn set_mode(&mut self, mode: &str) -> Result<(), DeviceError> {
        validate_mode(mode)?;
        self.state.mode = mode.to_owned();
        Ok(())
    }

    async fn start_recording(&mut self) -> Result<(), DeviceError> {
        if self.state.is_recording {
            return Err(DeviceError::AlreadyRecording);
        }
        self.state.is_recording = true;
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<(), DeviceError> {
        if !self.state.is_recording {
            return Err(DeviceError::NotRecording);
        }
        self.state.is_recording = false;
        Ok(())
    }

    async fn telemetry(&mut self) -> Result<DeviceTelemetry, DeviceError> {
        self.tick();
        Ok(self.state.clone())
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            driver: self.name(),
            hardware: false,
            address: None,
            telemetry: self.state.clone(),
        }
    }
}
