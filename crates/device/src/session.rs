use std::time::Duration;

use dr_client::{ChannelCommandSink, ChannelError, CommandSink};
use dr_types::DeviceTelemetry;
use tokio::sync::watch;

use crate::{DeviceError, DeviceInfo, DeviceRequest, DeviceResponse, MoveCommand};

/// Cloneable handle to the device task. Mutating calls queue behind each
/// other in the task; telemetry reads only touch the cached snapshot.
#[derive(Clone, Debug)]
pub struct DeviceSession {
    cmd_tx: ChannelCommandSink<DeviceRequest, DeviceResponse, DeviceError>,
    telem_rx: watch::Receiver<DeviceTelemetry>,
    timeout: Duration,
}

impl DeviceSession {
    pub fn new(
        cmd_tx: ChannelCommandSink<DeviceRequest, DeviceResponse, DeviceError>,
        telem_rx: watch::Receiver<DeviceTelemetry>,
        timeout: Duration,
    ) -> Self {
        Self {
            cmd_tx,
            telem_rx,
            timeout,
        }
    }

    pub async fn request(&self, request: DeviceRequest) -> Result<DeviceResponse, DeviceError> {
        match self.cmd_tx.command_timeout(request, self.timeout).await {
            Ok(result) => result,
            Err(ChannelError::Timeout) => Err(DeviceError::Timeout(self.timeout)),
            Err(ChannelError::Closed) => Err(DeviceError::LinkUnavailable(
                "device task is not running".to_owned(),
            )),
        }
    }

    pub async fn takeoff(&self) -> Result<(), DeviceError> {
        self.request(DeviceRequest::Takeoff).await.map(|_| ())
    }

    pub async fn land(&self) -> Result<(), DeviceError> {
        self.request(DeviceRequest::Land).await.map(|_| ())
    }

    pub async fn move_by(&self, cmd: MoveCommand) -> Result<(), DeviceError> {
        self.request(DeviceRequest::Move(cmd)).await.map(|_| ())
    }

    pub async fn set_mode(&self, mode: &str) -> Result<(), DeviceError> {
        self.request(DeviceRequest::SetMode(mode.to_owned()))
            .await
            .map(|_| ())
    }

    pub async fn start_recording(&self) -> Result<(), DeviceError> {
        self.request(DeviceRequest::StartRecording).await.map(|_| ())
    }

    pub async fn stop_recording(&self) -> Result<(), DeviceError> {
        self.request(DeviceRequest::StopRecording).await.map(|_| ())
    }

    pub async fn info(&self) -> Result<DeviceInfo, DeviceError> {
        match self.request(DeviceRequest::Info).await? {
            DeviceResponse::Info(info) => Ok(info),
            other => Err(DeviceError::Rejected(format!(
                "unexpected response to info request: {other:?}"
            ))),
        }
    }

    /// Switches the session to the real platform. Returns the name of the
    /// driver now in use.
    pub async fn use_hardware(&self) -> Result<&'static str, DeviceError> {
        match self.request(DeviceRequest::UseHardware).await? {
            DeviceResponse::Switched { driver } => Ok(driver),
            other => Err(DeviceError::Rejected(format!(
                "unexpected response to hardware request: {other:?}"
            ))),
        }
    }

    /// Latest cached telemetry.
    pub fn telemetry(&self) -> DeviceTelemetry {
        self.telem_rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dr_client::Task;
    use tokio::net::UdpSocket;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{create_task, DeviceConfig, TelloConfig};

    fn spawn_simulated() -> (DeviceSession, CancellationToken) {
        let task = create_task(DeviceConfig::default()).unwrap();
        let session = task.session(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        tokio::spawn(Box::new(task).run(cancel.clone()));
        (session, cancel)
    }

    #[tokio::test]
    async fn takeoff_updates_cached_telemetry() {
        let (session, _cancel) = spawn_simulated();

        assert!(!session.telemetry().is_flying);
        session.takeoff().await.unwrap();
        assert!(session.telemetry().is_flying);

        let err = session.takeoff().await.unwrap_err();
        assert_eq!(err, DeviceError::AlreadyFlying);
        assert_eq!(err.to_string(), "already flying");
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() {
        let (session, _cancel) = spawn_simulated();
        let session = Arc::new(session);

        // exactly one of many simultaneous takeoffs may win
        let attempts = (0..16)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.takeoff().await })
            })
            .collect::<Vec<_>>();

        let mut successes = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(()) => successes += 1,
                Err(err) => assert_eq!(err, DeviceError::AlreadyFlying),
            }
        }

        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn info_reports_driver_and_mode() {
        let (session, _cancel) = spawn_simulated();

        session.set_mode("slam").await.unwrap();
        let info = session.info().await.unwrap();

        assert_eq!(info.driver, "simulated");
        assert!(!info.hardware);
        assert_eq!(info.telemetry.mode, "slam");
    }

    #[tokio::test]
    async fn stopped_task_means_link_unavailable() {
        let (session, cancel) = spawn_simulated();
        cancel.cancel();

        // give the task a moment to drop its receiver
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            session.land().await,
            Err(DeviceError::LinkUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn slow_platform_reply_is_not_reported_as_timeout() {
        // acknowledges everything, but takes most of its reply window to do so
        let platform = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let address = platform.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            while let Ok((_, from)) = platform.recv_from(&mut buf).await {
                tokio::time::sleep(Duration::from_millis(600)).await;
                let _ = platform.send_to(b"ok", from).await;
            }
        });

        let state_port = UdpSocket::bind(("127.0.0.1", 0))
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let task = create_task(DeviceConfig {
            tello: TelloConfig {
                address,
                state_port,
                reply_timeout_ms: 700,
            },
            ..Default::default()
        })
        .unwrap();

        // shorter than the platform gets to answer
        let session = task.session(Duration::from_millis(500));
        let cancel = CancellationToken::new();
        tokio::spawn(Box::new(task).run(cancel.clone()));

        assert_eq!(session.use_hardware().await, Ok("tello"));
        assert_eq!(session.info().await.unwrap().driver, "tello");

        cancel.cancel();
    }
}
