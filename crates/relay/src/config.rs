use std::net::{IpAddr, Ipv4Addr};

use dr_vision::SourceConfig;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_address")]
    pub address: IpAddr,

    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,

    /// URL path the WebSocket endpoint is mounted at; empty means `/`
    #[serde(default)]
    pub path: String,

    /// Frames per second sent to each client
    #[serde(default = "default_rate_hz")]
    pub broadcast_hz: f32,

    #[serde(default = "ServerConfig::default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Upper bound on how long a single device command may take
    #[serde(default = "ServerConfig::default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl ServerConfig {
    fn default_address() -> IpAddr {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }

    fn default_port() -> u16 {
        8000
    }

    fn default_jpeg_quality() -> u8 {
        70
    }

    fn default_command_timeout_ms() -> u64 {
        10000
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            port: Self::default_port(),
            path: String::new(),
            broadcast_hz: default_rate_hz(),
            jpeg_quality: Self::default_jpeg_quality(),
            command_timeout_ms: Self::default_command_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f32,

    #[serde(default = "RenderConfig::default_width")]
    pub width: u32,

    #[serde(default = "RenderConfig::default_height")]
    pub height: u32,

    #[serde(default)]
    pub source: SourceConfig,
}

impl RenderConfig {
    fn default_width() -> u32 {
        640
    }

    fn default_height() -> u32 {
        480
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            width: Self::default_width(),
            height: Self::default_height(),
            source: SourceConfig::default(),
        }
    }
}

fn default_rate_hz() -> f32 {
    30.0
}
