use std::path::PathBuf;

use config::{Config, ConfigError};
use dr_device::DeviceConfig;
use dr_relay::{RenderConfig, ServerConfig};
use dr_vision::VisionConfig;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct DroneRelayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub vision: VisionConfig,

    #[serde(default)]
    pub device: DeviceConfig,
}

impl DroneRelayConfig {
    /// Reads the config file at `path`, if any, with `DRONE_RELAY_*`
    /// environment variables layered on top. Nested keys are separated by a
    /// double underscore, e.g. `DRONE_RELAY_SERVER__PORT`.
    pub fn read(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut c = Config::new();

        if let Some(path) = path {
            c.merge(config::File::from(path))?;
        }

        c.merge(config::Environment::with_prefix("DRONE_RELAY").separator("__"))?;

        c.try_into()
    }
}
