use std::path::PathBuf;

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct VisionConfig {
    /// When false, frames pass through without annotation.
    #[serde(default = "VisionConfig::default_enabled")]
    pub enabled: bool,

    /// Detections below this confidence are discarded
    #[serde(default = "VisionConfig::default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Upper bound on detections reported per frame
    #[serde(default = "VisionConfig::default_max_objects")]
    pub max_objects: usize,
}

impl VisionConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_confidence_threshold() -> f32 {
        0.5
    }

    fn default_max_objects() -> usize {
        10
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            confidence_threshold: Self::default_confidence_threshold(),
            max_objects: Self::default_max_objects(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Generated moving-grid scene
    #[default]
    Synthetic,

    /// Cycles through the images in a directory
    Directory { path: PathBuf },

    /// Live capture through an `ffmpeg` subprocess. Falls back to the
    /// synthetic scene when the camera cannot be opened.
    Camera {
        /// V4L2 device path or bare index, e.g. `/dev/video0` or `0`
        #[serde(default = "default_camera_device")]
        device: String,

        #[serde(default = "default_ffmpeg")]
        ffmpeg: PathBuf,

        /// How long to wait for the first frame before giving up on the camera
        #[serde(default = "default_open_timeout_ms")]
        open_timeout_ms: u64,
    },
}

fn default_camera_device() -> String {
    "/dev/video0".to_owned()
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_open_timeout_ms() -> u64 {
    3000
}
