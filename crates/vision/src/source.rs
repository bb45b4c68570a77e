use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use image::{imageops::FilterType, Rgb, RgbImage};
use tracing::*;

use crate::{camera, draw::fill_rect, CameraSource, SourceConfig};

/// Produces raw frames for the render loop. Reads may block, so callers run
/// them off the async executor.
pub trait FrameSource: Send {
    /// Short identifier reported to clients, e.g. "synthetic".
    fn name(&self) -> &str;

    fn next_frame(&mut self) -> anyhow::Result<RgbImage>;
}

pub fn create_source(
    config: &SourceConfig,
    width: u32,
    height: u32,
) -> anyhow::Result<Box<dyn FrameSource>> {
    if width == 0 || height == 0 {
        bail!("frame dimensions must be non-zero, got {width}x{height}");
    }

    Ok(match config {
        SourceConfig::Synthetic => Box::new(SyntheticFrameSource::new(width, height)),
        SourceConfig::Directory { path } => Box::new(
            ImageDirSource::open(path, width, height)
                .with_context(|| format!("failed to open image directory {}", path.display()))?,
        ),
        SourceConfig::Camera {
            device,
            ffmpeg,
            open_timeout_ms,
        } => {
            let cmd = camera::ffmpeg_command(ffmpeg, device, width, height);

            match CameraSource::spawn(cmd, width, height, Duration::from_millis(*open_timeout_ms)) {
                Ok(source) => {
                    info!("capturing from camera {device}");
                    Box::new(source)
                }
                Err(err) => {
                    warn!("camera {device} unavailable, using synthetic frames: {err:#}");
                    Box::new(SyntheticFrameSource::new(width, height))
                }
            }
        }
    })
}

const GRID_SIZE: u32 = 50;
const GRID_COLOR: Rgb<u8> = Rgb([30, 30, 30]);
const HORIZON_COLOR: Rgb<u8> = Rgb([255, 120, 0]);
const SKY_TINT: [u8; 3] = [200, 150, 100];

/// Grid speed in pixels per second along each axis
const DRIFT: (f32, f32) = (10.0, 5.0);

/// A moving grid under a tinted sky, standing in for a camera.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    started: Instant,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            started: Instant::now(),
        }
    }

    /// Renders the scene as it looks `elapsed_secs` after start.
    pub fn render(&self, elapsed_secs: f32) -> RgbImage {
        let (w, h) = (self.width, self.height);
        let horizon = h / 2;

        let off_x = (elapsed_secs * DRIFT.0) as u32 % GRID_SIZE;
        let off_y = (elapsed_secs * DRIFT.1) as u32 % GRID_SIZE;

        let mut frame = RgbImage::from_fn(w, h, |x, y| {
            let on_grid = (x + GRID_SIZE - off_x) % GRID_SIZE == 0
                || (y + GRID_SIZE - off_y) % GRID_SIZE == 0;
            let base = if on_grid { GRID_COLOR.0 } else { [0, 0, 0] };

            if y < horizon {
                // blend 70% scene with 30% sky
                let mut px = [0u8; 3];
                for c in 0..3 {
                    px[c] = ((base[c] as u16 * 7 + SKY_TINT[c] as u16 * 3) / 10) as u8;
                }
                Rgb(px)
            } else {
                Rgb(base)
            }
        });

        fill_rect(
            &mut frame,
            [0, horizon.saturating_sub(1), w, (horizon + 1).min(h)],
            HORIZON_COLOR,
        );

        frame
    }
}

impl FrameSource for SyntheticFrameSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn next_frame(&mut self) -> anyhow::Result<RgbImage> {
        Ok(self.render(self.started.elapsed().as_secs_f32()))
    }
}

/// Loops over the image files in a directory in name order, scaling each to
/// the configured size.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
}

fn is_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png")
    )
}

impl ImageDirSource {
    pub fn open(dir: &Path, width: u32, height: u32) -> anyhow::Result<Self> {
        let mut files = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;

        files.retain(|path| path.is_file() && is_image(path));
        files.sort();

        if files.is_empty() {
            bail!("no jpeg or png images found");
        }

        debug!("found {} images in {}", files.len(), dir.display());

        Ok(Self {
            files,
            next: 0,
            width,
            height,
        })
    }
}

impl FrameSource for ImageDirSource {
    fn name(&self) -> &str {
        "directory"
    }

    fn next_frame(&mut self) -> anyhow::Result<RgbImage> {
        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        let image = image::open(path)
            .with_context(|| format!("failed to read {}", path.display()))?
            .to_rgb8();

        if image.dimensions() == (self.width, self.height) {
            Ok(image)
        } else {
            Ok(image::imageops::resize(
                &image,
                self.width,
                self.height,
                FilterType::Triangle,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frame_has_horizon_and_sky() {
        let source = SyntheticFrameSource::new(100, 80);
        let frame = source.render(0.0);

        assert_eq!(frame.dimensions(), (100, 80));
        assert_eq!(*frame.get_pixel(10, 40), HORIZON_COLOR);
        // sky is tinted, ground is dark
        assert_ne!(*frame.get_pixel(10, 10), Rgb([0, 0, 0]));
        assert_eq!(*frame.get_pixel(10, 70), Rgb([0, 0, 0]));
    }

    #[test]
    fn synthetic_grid_drifts_over_time() {
        let source = SyntheticFrameSource::new(100, 80);
        assert_ne!(source.render(0.0), source.render(1.0));
    }

    #[test]
    fn zero_sized_source_is_rejected() {
        assert!(create_source(&SourceConfig::Synthetic, 0, 10).is_err());
    }

    #[test]
    fn unavailable_camera_falls_back_to_synthetic() {
        let config = SourceConfig::Camera {
            device: "/dev/video0".to_owned(),
            ffmpeg: "/nonexistent/ffmpeg".into(),
            open_timeout_ms: 100,
        };

        let mut source = create_source(&config, 32, 24).unwrap();
        assert_eq!(source.name(), "synthetic");
        assert_eq!(source.next_frame().unwrap().dimensions(), (32, 24));
    }

    #[test]
    fn directory_source_cycles_and_scales() {
        let dir = std::env::temp_dir().join(format!("dr-vision-src-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]))
            .save(dir.join("a.png"))
            .unwrap();
        RgbImage::from_pixel(8, 8, Rgb([0, 0, 255]))
            .save(dir.join("b.png"))
            .unwrap();
        std::fs::write(dir.join("notes.txt"), "not an image").unwrap();

        let mut source = ImageDirSource::open(&dir, 4, 4).unwrap();

        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();
        let third = source.next_frame().unwrap();

        assert_eq!(first.dimensions(), (4, 4));
        assert_eq!(*first.get_pixel(0, 0), Rgb([255, 0, 0]));
        assert_eq!(*second.get_pixel(0, 0), Rgb([0, 0, 255]));
        assert_eq!(first, third);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = std::env::temp_dir().join(format!("dr-vision-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        assert!(ImageDirSource::open(&dir, 4, 4).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
