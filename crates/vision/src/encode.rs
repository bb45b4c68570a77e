use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use dr_types::FrameBuffer;
use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};

use crate::draw::fill_rect;

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> anyhow::Result<Bytes> {
    let (w, h) = image.dimensions();
    let mut buf = Vec::with_capacity((w * h / 8) as usize);

    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .context("failed to encode frame as jpeg")?;

    Ok(Bytes::from(buf))
}

/// The frame served before the first render tick completes: a dark
/// background with an amber bar across the middle. Sequence number 0.
pub fn placeholder_frame(width: u32, height: u32, quality: u8) -> anyhow::Result<FrameBuffer> {
    let mut image = RgbImage::from_pixel(width, height, Rgb([16, 16, 16]));
    let bar = height / 20;
    fill_rect(
        &mut image,
        [width / 4, height / 2 - bar / 2, width - width / 4, height / 2 + bar / 2 + 1],
        Rgb([255, 165, 0]),
    );

    Ok(FrameBuffer {
        jpeg: encode_jpeg(&image, quality)?,
        width,
        height,
        sequence: 0,
        detections: Arc::from(Vec::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_valid_jpeg() {
        let image = RgbImage::from_pixel(32, 24, Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&image, 70).unwrap();

        // SOI and EOI markers
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn placeholder_is_sequence_zero() {
        let frame = placeholder_frame(64, 48, 70).unwrap();
        assert!(frame.is_placeholder());
        assert!(!frame.jpeg.is_empty());
        assert_eq!((frame.width, frame.height), (64, 48));
    }
}
