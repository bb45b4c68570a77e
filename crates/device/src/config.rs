use std::net::SocketAddr;

use serde::Deserialize;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Simulated,
    Tello,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TelloConfig {
    /// Address of the Tello command port
    #[serde(default = "TelloConfig::default_address")]
    pub address: SocketAddr,

    /// Local port the Tello broadcasts its state to
    #[serde(default = "TelloConfig::default_state_port")]
    pub state_port: u16,

    /// Milliseconds to wait for the platform to acknowledge a command
    #[serde(default = "TelloConfig::default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

impl TelloConfig {
    fn default_address() -> SocketAddr {
        SocketAddr::from(([192, 168, 10, 1], 8889))
    }

    fn default_state_port() -> u16 {
        8890
    }

    fn default_reply_timeout_ms() -> u64 {
        7000
    }
}

impl Default for TelloConfig {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            state_port: Self::default_state_port(),
            reply_timeout_ms: Self::default_reply_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeviceConfig {
    /// Which driver to start with. Clients can still switch a simulated
    /// session over to hardware at runtime.
    #[serde(default)]
    pub kind: DeviceKind,

    #[serde(default)]
    pub tello: TelloConfig,

    /// How often cached telemetry is refreshed from the driver
    #[serde(default = "DeviceConfig::default_telemetry_hz")]
    pub telemetry_hz: f32,
}

impl DeviceConfig {
    fn default_telemetry_hz() -> f32 {
        10.0
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::default(),
            tello: TelloConfig::default(),
            telemetry_hz: Self::default_telemetry_hz(),
        }
    }
}
