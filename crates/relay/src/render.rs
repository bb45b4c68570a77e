use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use dr_client::Task;
use dr_device::DeviceSession;
use dr_types::{FrameBuffer, TelemetrySnapshot};
use dr_vision::{encode_jpeg, placeholder_frame, AnnotationPipeline, FrameSource};
use tokio::{
    select,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{RenderConfig, SharedState, StateReader};

/// Pulls frames from the source, annotates and encodes them, and publishes
/// each one together with the current telemetry.
pub struct RenderTask {
    period: Duration,
    jpeg_quality: u8,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    pipeline: Arc<dyn AnnotationPipeline>,
    device: DeviceSession,
    state: SharedState,
}

pub fn create_task(
    config: &RenderConfig,
    jpeg_quality: u8,
    source: Box<dyn FrameSource>,
    pipeline: Arc<dyn AnnotationPipeline>,
    device: DeviceSession,
) -> anyhow::Result<RenderTask> {
    let period = dr_client::period_from_hz(config.rate_hz)
        .ok_or_else(|| anyhow::anyhow!("invalid render rate {}", config.rate_hz))?;

    let placeholder = placeholder_frame(config.width, config.height, jpeg_quality)
        .context("failed to render placeholder frame")?;

    Ok(RenderTask {
        period,
        jpeg_quality,
        source: Arc::new(Mutex::new(source)),
        pipeline,
        device,
        state: SharedState::new(placeholder),
    })
}

impl RenderTask {
    pub fn state(&self) -> StateReader {
        self.state.reader()
    }
}

fn render_frame(
    source: &Mutex<Box<dyn FrameSource>>,
    pipeline: &dyn AnnotationPipeline,
    jpeg_quality: u8,
    sequence: u64,
) -> anyhow::Result<FrameBuffer> {
    // a source that panicked mid-frame is still usable for the next one
    let mut source = source.lock().unwrap_or_else(PoisonError::into_inner);

    let raw = source
        .next_frame()
        .with_context(|| format!("{} source failed", source.name()))?;
    drop(source);

    let annotated = pipeline.annotate(raw).context("annotation failed")?;
    let jpeg = encode_jpeg(&annotated.image, jpeg_quality).context("failed to encode frame")?;

    Ok(FrameBuffer {
        jpeg,
        width: annotated.image.width(),
        height: annotated.image.height(),
        sequence,
        detections: annotated.detections.into(),
    })
}

#[async_trait]
impl Task for RenderTask {
    fn name(&self) -> &'static str {
        "render"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let Self {
            period,
            jpeg_quality,
            source,
            pipeline,
            device,
            state,
        } = *self;

        let loop_fut = async move {
            let mut ival = interval(period);
            ival.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // 0 belongs to the placeholder
            let mut sequence = 1u64;

            loop {
                ival.tick().await;

                let source = source.clone();
                let frame_pipeline = pipeline.clone();
                let rendered = tokio::task::spawn_blocking(move || {
                    render_frame(&source, frame_pipeline.as_ref(), jpeg_quality, sequence)
                })
                .await;

                let frame = match rendered {
                    Ok(Ok(frame)) => frame,
                    Ok(Err(err)) => {
                        warn!("render tick {sequence} failed, keeping previous frame: {err:#}");
                        continue;
                    }
                    Err(err) => {
                        warn!("render tick {sequence} panicked, keeping previous frame: {err}");
                        continue;
                    }
                };

                let telemetry = TelemetrySnapshot {
                    device: device.telemetry(),
                    ai: pipeline.status(),
                };

                trace!(
                    "publishing frame {sequence} with {} detections",
                    frame.detections.len()
                );
                state.publish(telemetry, frame);
                sequence += 1;
            }

            #[allow(unreachable_code)]
            Ok::<_, anyhow::Error>(())
        };

        select! {
          _ = cancel.cancelled() => {}
          res = loop_fut => { res? }
        }

        Ok(())
    }
}
