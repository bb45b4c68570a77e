use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use dr_types::{AiMode, AiStatus, Detection};
use image::RgbImage;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use tracing::*;

use crate::{
    draw::{draw_rect, BOX_COLOR},
    scene, VisionConfig,
};

/// A frame after annotation, with the detections drawn on it.
#[derive(Clone, Debug)]
pub struct Annotated {
    pub image: RgbImage,
    pub detections: Vec<Detection>,
}

/// Marks up frames and reports what it found. Shared between the render loop
/// and command handlers, so implementations synchronize internally.
pub trait AnnotationPipeline: Send + Sync {
    fn annotate(&self, frame: RgbImage) -> anyhow::Result<Annotated>;

    fn status(&self) -> AiStatus;

    fn set_mode(&self, mode: AiMode);

    fn describe_scene(&self, detections: &[Detection]) -> String {
        scene::describe(detections)
    }
}

pub fn create_pipeline(config: &VisionConfig) -> Arc<dyn AnnotationPipeline> {
    if config.enabled {
        Arc::new(SimulatedAnnotator::new(config.clone()))
    } else {
        Arc::new(PassthroughAnnotator::default())
    }
}

/// Object classes the simulated detector picks from, with their base
/// confidence.
const SIMULATED_CLASSES: [(&str, f32); 6] = [
    ("person", 0.95),
    ("car", 0.87),
    ("tree", 0.76),
    ("building", 0.92),
    ("dog", 0.81),
    ("bicycle", 0.73),
];

/// Weight of the newest sample in the smoothed fps figure
const FPS_SMOOTHING: f32 = 0.1;

struct AnnotatorState {
    mode: AiMode,
    rng: StdRng,
    detected: usize,
    fps: f32,
    last_frame: Option<Instant>,
}

/// Produces plausible-looking random detections in place of a real model.
pub struct SimulatedAnnotator {
    config: VisionConfig,
    state: Mutex<AnnotatorState>,
}

impl SimulatedAnnotator {
    pub fn new(config: VisionConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: VisionConfig, rng: StdRng) -> Self {
        Self {
            config,
            state: Mutex::new(AnnotatorState {
                mode: AiMode::Idle,
                rng,
                detected: 0,
                fps: 0.0,
                last_frame: None,
            }),
        }
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, AnnotatorState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("annotator state poisoned"))
    }

    fn detect(&self, rng: &mut StdRng, width: u32, height: u32) -> Vec<Detection> {
        let count = rng.gen_range(1..=5);

        let mut detections = (0..count)
            .filter_map(|_| {
                let (class, base) = SIMULATED_CLASSES.choose(rng)?;
                let confidence = base * rng.gen_range(0.8..=1.0);

                let x1 = rng.gen_range(0..=width.saturating_sub(100));
                let y1 = rng.gen_range(0..=height.saturating_sub(100));
                let x2 = (x1 + rng.gen_range(50..=200)).min(width);
                let y2 = (y1 + rng.gen_range(50..=200)).min(height);

                Some(Detection {
                    class: class.to_string(),
                    confidence,
                    bbox: [x1, y1, x2, y2],
                })
            })
            .filter(|d| d.confidence >= self.config.confidence_threshold)
            .collect::<Vec<_>>();

        detections.truncate(self.config.max_objects);
        detections
    }
}

impl AnnotationPipeline for SimulatedAnnotator {
    fn annotate(&self, mut frame: RgbImage) -> anyhow::Result<Annotated> {
        let (width, height) = frame.dimensions();

        let detections = {
            let mut state = self.lock()?;

            let now = Instant::now();
            if let Some(last) = state.last_frame.replace(now) {
                let dt = (now - last).as_secs_f32();
                if dt > 0.0 {
                    let fps = state.fps;
                    state.fps = fps + (1.0 / dt - fps) * FPS_SMOOTHING;
                }
            }

            let detections = if state.mode == AiMode::Idle {
                Vec::new()
            } else {
                self.detect(&mut state.rng, width, height)
            };

            state.detected = detections.len();
            detections
        };

        trace!("annotating {} detections", detections.len());

        for detection in &detections {
            draw_rect(&mut frame, detection.bbox, 2, BOX_COLOR);
        }

        Ok(Annotated {
            image: frame,
            detections,
        })
    }

    fn status(&self) -> AiStatus {
        match self.state.lock() {
            Ok(state) => AiStatus {
                enabled: true,
                mode: state.mode,
                detected_objects: state.detected,
                fps: state.fps,
            },
            Err(_) => AiStatus::default(),
        }
    }

    fn set_mode(&self, mode: AiMode) {
        match self.state.lock() {
            Ok(mut state) => {
                info!("annotation mode set to {mode}");
                state.mode = mode;
            }
            Err(_) => error!("cannot set annotation mode, state poisoned"),
        }
    }
}

/// Leaves frames untouched. Used when annotation is disabled.
#[derive(Default)]
pub struct PassthroughAnnotator {
    mode: Mutex<AiMode>,
}

impl AnnotationPipeline for PassthroughAnnotator {
    fn annotate(&self, frame: RgbImage) -> anyhow::Result<Annotated> {
        Ok(Annotated {
            image: frame,
            detections: Vec::new(),
        })
    }

    fn status(&self) -> AiStatus {
        AiStatus {
            enabled: false,
            mode: self.mode.lock().map(|m| *m).unwrap_or_default(),
            detected_objects: 0,
            fps: 0.0,
        }
    }

    fn set_mode(&self, mode: AiMode) {
        if let Ok(mut current) = self.mode.lock() {
            *current = mode;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(config: VisionConfig) -> SimulatedAnnotator {
        SimulatedAnnotator::with_rng(config, StdRng::seed_from_u64(7))
    }

    #[test]
    fn idle_mode_detects_nothing() {
        let annotator = seeded(VisionConfig::default());
        let frame = RgbImage::new(320, 240);

        let out = annotator.annotate(frame.clone()).unwrap();

        assert!(out.detections.is_empty());
        assert_eq!(out.image, frame);
        assert_eq!(annotator.status().detected_objects, 0);
    }

    #[test]
    fn detections_respect_threshold_and_limit() {
        let annotator = seeded(VisionConfig {
            enabled: true,
            confidence_threshold: 0.7,
            max_objects: 2,
        });
        annotator.set_mode(AiMode::ObjectDetection);

        for _ in 0..50 {
            let out = annotator.annotate(RgbImage::new(320, 240)).unwrap();

            assert!(out.detections.len() <= 2);
            for d in &out.detections {
                assert!(d.confidence >= 0.7);
                assert!(d.bbox[2] <= 320 && d.bbox[3] <= 240);
                assert!(d.bbox[0] < d.bbox[2] && d.bbox[1] < d.bbox[3]);
            }
            assert_eq!(annotator.status().detected_objects, out.detections.len());
        }
    }

    #[test]
    fn tiny_frames_do_not_panic() {
        let annotator = seeded(VisionConfig::default());
        annotator.set_mode(AiMode::FaceTracking);

        for _ in 0..20 {
            annotator.annotate(RgbImage::new(8, 6)).unwrap();
        }
    }

    #[test]
    fn status_reflects_mode() {
        let annotator = seeded(VisionConfig::default());
        annotator.set_mode(AiMode::Exploration);

        let status = annotator.status();
        assert!(status.enabled);
        assert_eq!(status.mode, AiMode::Exploration);
    }

    #[test]
    fn passthrough_reports_disabled() {
        let annotator = create_pipeline(&VisionConfig {
            enabled: false,
            ..Default::default()
        });
        annotator.set_mode(AiMode::FollowMe);

        let status = annotator.status();
        assert!(!status.enabled);
        assert_eq!(status.mode, AiMode::FollowMe);
    }
}
