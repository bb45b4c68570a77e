//! JSON messages exchanged with clients.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use dr_types::{timestamp, AiStatus, DeviceTelemetry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Params, StatePair};

/// Server to client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Upstream<'a> {
    Connected {
        message: &'a str,
        client_id: u64,
        timestamp: String,
    },
    Frame {
        /// Base64 JPEG
        frame: String,
        sequence: u64,
        width: u32,
        height: u32,
        state: &'a DeviceTelemetry,
        ai: &'a AiStatus,
        mode: &'a str,
        timestamp: String,
    },
    CommandResult {
        command: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<&'a Value>,
        result: Value,
        timestamp: String,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<&'a Value>,
        timestamp: String,
    },
}

impl<'a> Upstream<'a> {
    pub fn connected(client_id: u64) -> Self {
        Upstream::Connected {
            message: "connected to drone relay",
            client_id,
            timestamp: timestamp(),
        }
    }

    pub fn frame(pair: &'a StatePair) -> Self {
        Upstream::Frame {
            frame: BASE64.encode(&pair.frame.jpeg),
            sequence: pair.frame.sequence,
            width: pair.frame.width,
            height: pair.frame.height,
            state: &pair.telemetry.device,
            ai: &pair.telemetry.ai,
            mode: &pair.telemetry.device.mode,
            timestamp: timestamp(),
        }
    }

    pub fn command_result(command: &'a str, id: Option<&'a Value>, result: Value) -> Self {
        Upstream::CommandResult {
            command,
            id,
            result,
            timestamp: timestamp(),
        }
    }

    pub fn error(error: impl ToString, command: Option<&'a str>, id: Option<&'a Value>) -> Self {
        Upstream::Error {
            error: error.to_string(),
            command,
            id,
            timestamp: timestamp(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A command as sent by a client: `{"command": .., "params": {..}, "id": ..}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,

    #[serde(default)]
    pub params: Params,

    /// Opaque correlation value echoed back on the reply
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Lifecycle {
    Connect {
        #[serde(default, alias = "useTello")]
        use_hardware: bool,
    },
    Disconnect,
}

/// Client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connect { use_hardware: bool },
    Disconnect,
    Command(CommandEnvelope),
}

impl Inbound {
    /// Messages typed `connect` or `disconnect` are lifecycle messages;
    /// anything else must be a command envelope.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        match value.get("type").and_then(Value::as_str) {
            Some("connect") | Some("disconnect") => Ok(match Lifecycle::deserialize(value)? {
                Lifecycle::Connect { use_hardware } => Inbound::Connect { use_hardware },
                Lifecycle::Disconnect => Inbound::Disconnect,
            }),
            _ => CommandEnvelope::deserialize(value).map(Inbound::Command),
        }
    }
}
