use std::time::Duration;

use async_trait::async_trait;
use dr_client::{ChannelCommandSink, ChannelCommandSource, Task};
use dr_types::DeviceTelemetry;
use tokio::{
    select,
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    DeviceConfig, DeviceDriver, DeviceError, DeviceKind, DeviceRequest, DeviceResponse,
    DeviceSession, SimulatedDriver, TelloConfig, TelloDriver,
};

/// Owns the platform driver. Requests arrive over a single channel and are
/// executed one at a time, so the platform never sees interleaved commands.
pub struct DeviceTask {
    kind: DeviceKind,
    tello: TelloConfig,
    telemetry_period: Duration,
    reply_timeout: Duration,
    cmd_tx: ChannelCommandSink<DeviceRequest, DeviceResponse, DeviceError>,
    cmd_rx: ChannelCommandSource<DeviceRequest, DeviceResponse, DeviceError>,
    telem_tx: watch::Sender<DeviceTelemetry>,
    telem_rx: watch::Receiver<DeviceTelemetry>,
}

/// How much longer than the platform's own reply timeout a session waits, so
/// the platform always gets to answer before the caller gives up.
const SESSION_MARGIN: Duration = Duration::from_millis(500);

pub fn create_task(config: DeviceConfig) -> anyhow::Result<DeviceTask> {
    let telemetry_period = dr_client::period_from_hz(config.telemetry_hz)
        .ok_or_else(|| anyhow::anyhow!("invalid device telemetry rate {}", config.telemetry_hz))?;

    let reply_timeout = Duration::from_millis(config.tello.reply_timeout_ms);

    let (cmd_tx, cmd_rx) = flume::bounded(256);
    let (telem_tx, telem_rx) = watch::channel(DeviceTelemetry::default());

    Ok(DeviceTask {
        kind: config.kind,
        tello: config.tello,
        telemetry_period,
        reply_timeout,
        cmd_tx,
        cmd_rx,
        telem_tx,
        telem_rx,
    })
}

impl DeviceTask {
    pub fn cmd(&self) -> ChannelCommandSink<DeviceRequest, DeviceResponse, DeviceError> {
        self.cmd_tx.clone()
    }

    pub fn telemetry(&self) -> watch::Receiver<DeviceTelemetry> {
        self.telem_rx.clone()
    }

    /// A handle for issuing commands, where each command waits at most
    /// `timeout` for the platform. The timeout is never shorter than the
    /// platform reply timeout plus a margin, otherwise a command could be
    /// reported as failed while the platform is still carrying it out.
    pub fn session(&self, timeout: Duration) -> DeviceSession {
        DeviceSession::new(self.cmd(), self.telemetry(), self.session_timeout(timeout))
    }

    fn session_timeout(&self, requested: Duration) -> Duration {
        let floor = self.reply_timeout + SESSION_MARGIN;

        if requested < floor {
            debug!("raising command timeout from {requested:?} to {floor:?}");
            floor
        } else {
            requested
        }
    }
}

async fn refresh(driver: &mut Box<dyn DeviceDriver>, telem_tx: &watch::Sender<DeviceTelemetry>) {
    match driver.telemetry().await {
        Ok(telemetry) => {
            let _ = telem_tx.send(telemetry);
        }
        Err(err) => warn!("could not refresh telemetry from {}: {err}", driver.name()),
    }
}

async fn execute(
    driver: &mut Box<dyn DeviceDriver>,
    tello: &TelloConfig,
    request: DeviceRequest,
) -> Result<DeviceResponse, DeviceError> {
    match request {
        DeviceRequest::Takeoff => driver.takeoff().await.map(|_| DeviceResponse::Done),
        DeviceRequest::Land => driver.land().await.map(|_| DeviceResponse::Done),
        DeviceRequest::Move(cmd) => driver.move_by(cmd).await.map(|_| DeviceResponse::Done),
        DeviceRequest::SetMode(mode) => driver.set_mode(&mode).await.map(|_| DeviceResponse::Done),
        DeviceRequest::StartRecording => {
            driver.start_recording().await.map(|_| DeviceResponse::Done)
        }
        DeviceRequest::StopRecording => driver.stop_recording().await.map(|_| DeviceResponse::Done),
        DeviceRequest::Info => Ok(DeviceResponse::Info(driver.info())),
        DeviceRequest::UseHardware => {
            if !driver.is_hardware() {
                info!("switching to hardware driver");
                // on failure the current driver stays in place
                *driver = Box::new(TelloDriver::connect(tello).await?);
            }

            Ok(DeviceResponse::Switched {
                driver: driver.name(),
            })
        }
    }
}

#[async_trait]
impl Task for DeviceTask {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let Self {
            kind,
            tello,
            telemetry_period,
            cmd_rx,
            telem_tx,
            ..
        } = *self;

        let loop_fut = async move {
            let mut driver: Box<dyn DeviceDriver> = match kind {
                DeviceKind::Simulated => Box::new(SimulatedDriver::new()),
                DeviceKind::Tello => Box::new(
                    TelloDriver::connect(&tello)
                        .await
                        .map_err(|err| anyhow::anyhow!("failed to connect to tello: {err}"))?,
                ),
            };

            info!("device task running with {} driver", driver.name());
            refresh(&mut driver, &telem_tx).await;

            let mut ival = interval(telemetry_period);
            ival.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                select! {
                    _ = ival.tick() => {
                        refresh(&mut driver, &telem_tx).await;
                    }

                    cmd = cmd_rx.recv_async() => {
                        // every sender is gone, nobody can talk to the platform anymore
                        let Ok((request, ret_tx)) = cmd else { break };

                        debug!("executing {:?}", request);
                        let result = execute(&mut driver, &tello, request).await;

                        if let Err(err) = &result {
                            info!("device command failed: {err}");
                        }

                        refresh(&mut driver, &telem_tx).await;
                        let _ = ret_tx.send(result);
                    }
                }
            }

            Ok::<_, anyhow::Error>(())
        };

        select! {
          _ = cancel.cancelled() => {}
          res = loop_fut => { res? }
        }

        Ok(())
    }
}
