//! Frame production and annotation for the relay.
//!
//! - `source`: where raw frames come from (synthetic scene, image files or
//!   a camera).
//! - `annotate`: the annotation pipeline that marks detections on a frame.
//! - `encode`: JPEG encoding of finished frames.
//! - `voice`: phrase matching for spoken commands.
//! - `scene`: textual scene descriptions built from detections.

pub mod annotate;
pub mod camera;
pub mod config;
mod draw;
pub mod encode;
pub mod scene;
pub mod source;
pub mod voice;

pub use annotate::{create_pipeline, Annotated, AnnotationPipeline, PassthroughAnnotator, SimulatedAnnotator};
pub use camera::CameraSource;
pub use config::*;
pub use encode::{encode_jpeg, placeholder_frame};
pub use source::{create_source, FrameSource, ImageDirSource, SyntheticFrameSource};
pub use voice::{match_phrase, VoiceAction, VoiceMatch, VOICE_CONFIDENCE_THRESHOLD};

pub use image::{Rgb, RgbImage};
