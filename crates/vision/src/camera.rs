use std::{
    io::Read,
    path::Path,
    process::{Child, ChildStdout, Command, Stdio},
    thread,
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use flume::RecvTimeoutError;
use image::RgbImage;
use tracing::*;

use crate::FrameSource;

/// How long a single read waits for the camera before the tick is failed.
const FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// `0` and `/dev/video0` both name the first V4L2 device.
fn device_path(device: &str) -> String {
    match device.parse::<u32>() {
        Ok(index) => format!("/dev/video{index}"),
        Err(_) => device.to_owned(),
    }
}

/// An `ffmpeg` invocation that captures from a V4L2 device and writes raw
/// RGB24 frames of the given size to stdout.
pub fn ffmpeg_command(ffmpeg: &Path, device: &str, width: u32, height: u32) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-f")
        .arg("video4linux2")
        .arg("-i")
        .arg(device_path(device))
        .arg("-vf")
        .arg(format!("scale={width}:{height}"))
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");
    cmd
}

/// Frames read from a child process that streams raw RGB24 to stdout. A
/// reader thread keeps the pipe drained; `next_frame` hands out the newest
/// frame it has.
pub struct CameraSource {
    child: Child,
    frames: flume::Receiver<anyhow::Result<RgbImage>>,
    first: Option<RgbImage>,
}

impl CameraSource {
    /// Starts `cmd` and waits up to `open_timeout` for its first frame.
    pub fn spawn(
        mut cmd: Command,
        width: u32,
        height: u32,
        open_timeout: Duration,
    ) -> anyhow::Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().context("failed to start capture process")?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("capture process has no stdout"))?;

        let (tx, rx) = flume::bounded(2);
        thread::spawn(move || read_frames(stdout, width, height, tx));

        // from here on, dropping the source stops the child
        let mut source = Self {
            child,
            frames: rx,
            first: None,
        };

        match source.frames.recv_timeout(open_timeout) {
            Ok(Ok(frame)) => {
                source.first = Some(frame);
                Ok(source)
            }
            Ok(Err(err)) => Err(err.context("camera produced no frames")),
            Err(RecvTimeoutError::Timeout) => bail!("no frame from camera within {open_timeout:?}"),
            Err(RecvTimeoutError::Disconnected) => bail!("capture process exited"),
        }
    }
}

fn read_frames(
    mut stdout: ChildStdout,
    width: u32,
    height: u32,
    tx: flume::Sender<anyhow::Result<RgbImage>>,
) {
    let mut buf = vec![0u8; width as usize * height as usize * 3];

    loop {
        if let Err(err) = stdout.read_exact(&mut buf) {
            let _ = tx.send(Err(anyhow::Error::new(err).context("camera stream ended")));
            break;
        }

        let frame = RgbImage::from_raw(width, height, buf.clone())
            .ok_or_else(|| anyhow!("short camera frame"));

        if tx.send(frame).is_err() {
            // source dropped
            break;
        }
    }

    trace!("camera reader exiting");
}

impl FrameSource for CameraSource {
    fn name(&self) -> &str {
        "camera"
    }

    fn next_frame(&mut self) -> anyhow::Result<RgbImage> {
        if let Some(frame) = self.first.take() {
            return Ok(frame);
        }

        let mut frame = match self.frames.recv_timeout(FRAME_TIMEOUT) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => bail!("camera stalled"),
            Err(RecvTimeoutError::Disconnected) => bail!("camera stream closed"),
        };

        // skip ahead if the render loop fell behind
        while let Ok(newer) = self.frames.try_recv() {
            frame = newer;
        }

        frame
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn index_names_a_video_device() {
        assert_eq!(device_path("2"), "/dev/video2");
        assert_eq!(device_path("/dev/video1"), "/dev/video1");
    }

    #[test]
    fn reads_raw_frames_then_reports_end_of_stream() {
        // exactly one 4x4 rgb24 frame
        let mut source = CameraSource::spawn(
            shell("exec head -c 48 /dev/zero"),
            4,
            4,
            Duration::from_secs(5),
        )
        .unwrap();

        let frame = source.next_frame().unwrap();
        assert_eq!(frame.dimensions(), (4, 4));
        assert_eq!(frame.get_pixel(3, 3).0, [0, 0, 0]);

        assert!(source.next_frame().is_err());
    }

    #[test]
    fn silent_camera_fails_to_open() {
        let result = CameraSource::spawn(shell("exec sleep 5"), 4, 4, Duration::from_millis(100));
        assert!(result.is_err());
    }
}
