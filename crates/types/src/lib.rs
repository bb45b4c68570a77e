use std::{fmt, str::FromStr, sync::Arc};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// by default, chrono will format with 10 or so fractional digits but most
// clients only parse 6, so keep timestamps at microsecond precision
pub const ISO_8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

/// Current local time, formatted for the wire.
pub fn timestamp() -> String {
    chrono::Local::now().format(ISO_8601_FORMAT).to_string()
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    /// Pitch in degrees
    pub pitch: f32,

    /// Roll in degrees
    pub roll: f32,

    /// Yaw in degrees
    pub yaw: f32,
}

impl Attitude {
    pub fn new(pitch: f32, roll: f32, yaw: f32) -> Self {
        Attitude { pitch, roll, yaw }
    }
}

/// State reported by the platform driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    /// Remaining charge, 0 to 100
    pub battery: f32,

    /// Height above takeoff point in meters
    pub altitude: f32,

    /// Board temperature in degrees Celsius
    pub temperature: f32,

    pub attitude: Attitude,
    pub is_flying: bool,
    pub is_recording: bool,

    /// Flight mode last accepted by the platform
    pub mode: String,
}

impl Default for DeviceTelemetry {
    fn default() -> Self {
        Self {
            battery: 100.0,
            altitude: 0.0,
            temperature: 25.0,
            attitude: Attitude::default(),
            is_flying: false,
            is_recording: false,
            mode: "manual".to_owned(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid ai mode '{0}'")]
pub struct InvalidAiMode(pub String);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiMode {
    #[default]
    Idle,
    ObjectDetection,
    FaceTracking,
    Exploration,
    FollowMe,
    Autonomous,
}

impl AiMode {
    pub const ALL: [AiMode; 6] = [
        AiMode::Idle,
        AiMode::ObjectDetection,
        AiMode::FaceTracking,
        AiMode::Exploration,
        AiMode::FollowMe,
        AiMode::Autonomous,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AiMode::Idle => "idle",
            AiMode::ObjectDetection => "object_detection",
            AiMode::FaceTracking => "face_tracking",
            AiMode::Exploration => "exploration",
            AiMode::FollowMe => "follow_me",
            AiMode::Autonomous => "autonomous",
        }
    }

    /// The annotation mode that accompanies a platform flight mode.
    pub fn for_flight_mode(mode: &str) -> Self {
        match mode {
            "face_tracking" => AiMode::FaceTracking,
            "slam" => AiMode::Exploration,
            "path_planning" => AiMode::Autonomous,
            "neural" => AiMode::ObjectDetection,
            _ => AiMode::Idle,
        }
    }
}

impl fmt::Display for AiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiMode {
    type Err = InvalidAiMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AiMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| InvalidAiMode(s.to_owned()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiStatus {
    pub enabled: bool,
    pub mode: AiMode,
    pub detected_objects: usize,

    /// Annotation throughput in frames per second
    pub fps: f32,
}

impl Default for AiStatus {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AiMode::Idle,
            detected_objects: 0,
            fps: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,

    /// Bounding box as (x1, y1, x2, y2) in pixels
    pub bbox: [u32; 4],
}

/// Device state plus annotation status for one render tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub device: DeviceTelemetry,
    pub ai: AiStatus,
}

/// An encoded video frame. Cloning is cheap: the image bytes and detections
/// are reference counted.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameBuffer {
    /// JPEG image data
    pub jpeg: Bytes,
    pub width: u32,
    pub height: u32,

    /// Render tick that produced this frame; 0 is reserved for placeholders
    pub sequence: u64,

    /// Objects the annotation pipeline found in this frame
    pub detections: Arc<[Detection]>,
}

impl FrameBuffer {
    /// A frame with no image data, used before anything has been rendered.
    pub fn not_ready() -> Self {
        Self {
            jpeg: Bytes::new(),
            width: 0,
            height: 0,
            sequence: 0,
            detections: Arc::from(Vec::new()),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.sequence == 0
    }
}
