use std::time::Duration;

use async_trait::async_trait;
use dr_types::DeviceTelemetry;
use tokio::net::UdpSocket;
use tracing::*;

use super::{validate_mode, DeviceDriver, DeviceInfo, MoveCommand};
use crate::{DeviceError, TelloConfig};

/// Talks to a DJI Tello using its plain-text UDP SDK. Commands go to the
/// command port and are acknowledged with `ok` or `error ...`; the platform
/// pushes `key:value;` state datagrams to a separate port on its own.
pub struct TelloDriver {
    cmd_sock: UdpSocket,
    state_sock: UdpSocket,
    address: String,
    reply_timeout: Duration,
    telemetry: DeviceTelemetry,
}

fn link_err(err: impl std::fmt::Display) -> DeviceError {
    DeviceError::LinkUnavailable(err.to_string())
}

impl TelloDriver {
    pub async fn connect(config: &TelloConfig) -> Result<Self, DeviceError> {
        let cmd_sock = UdpSocket::bind(("0.0.0.0", 0)).await.map_err(link_err)?;
        cmd_sock.connect(config.address).await.map_err(link_err)?;

        let state_sock = UdpSocket::bind(("0.0.0.0", config.state_port))
            .await
            .map_err(link_err)?;

        let mut driver = TelloDriver {
            cmd_sock,
            state_sock,
            address: config.address.to_string(),
            reply_timeout: Duration::from_millis(config.reply_timeout_ms),
            telemetry: DeviceTelemetry::default(),
        };

        info!("entering sdk mode on tello at {}", driver.address);

        // the platform ignores everything until it has seen "command"
        driver
            .send_command("command")
            .await
            .map_err(|err| match err {
                DeviceError::Timeout(_) => {
                    DeviceError::LinkUnavailable(format!("no reply from {}", driver.address))
                }
                other => other,
            })?;

        info!("tello link established");

        Ok(driver)
    }

    /// Throws away replies to earlier commands that arrived after we stopped
    /// waiting for them, so they are not taken as the answer to the next one.
    fn discard_stale_replies(&self) {
        let mut buf = [0u8; 1024];

        loop {
            match self.cmd_sock.try_recv(&mut buf) {
                Ok(n) => debug!(
                    "discarding late tello reply {:?}",
                    String::from_utf8_lossy(&buf[..n]).trim()
                ),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    // e.g. an ICMP unreachable left over from an earlier send
                    trace!("discarding tello socket error: {err}");
                    break;
                }
            }
        }
    }

    /// Sends a command and waits for its acknowledgement.
    async fn send_command(&mut self, command: &str) -> Result<(), DeviceError> {
        debug!("sending tello command: {:?}", command);

        self.discard_stale_replies();

        self.cmd_sock
            .send(command.as_bytes())
            .await
            .map_err(link_err)?;

        let mut buf = [0u8; 1024];
        let n = tokio::time::timeout(self.reply_timeout, self.cmd_sock.recv(&mut buf))
            .await
            .map_err(|_| DeviceError::Timeout(self.reply_timeout))?
            .map_err(link_err)?;

        let reply = String::from_utf8_lossy(&buf[..n]).trim().to_owned();
        trace!("tello replied {:?}", reply);

        if reply == "ok" {
            Ok(())
        } else {
            Err(DeviceError::Rejected(reply))
        }
    }

    /// Sends a command the platform does not acknowledge.
    async fn send_unacked(&mut self, command: &str) -> Result<(), DeviceError> {
        trace!("sending tello command: {:?}", command);
        self.cmd_sock
            .send(command.as_bytes())
            .await
            .map_err(link_err)?;
        Ok(())
    }

    /// Applies every state datagram that has arrived since the last call.
    fn drain_state(&mut self) {
        let mut buf = [0u8; 1024];

        loop {
            match self.state_sock.try_recv(&mut buf) {
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    apply_state(&mut self.telemetry, &text);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("failed to read tello state: {err}");
                    break;
                }
            }
        }
    }
}

/// Folds one `key:value;key:value;` state report into the telemetry.
/// Unknown keys and unparseable values are skipped.
pub fn apply_state(telemetry: &mut DeviceTelemetry, report: &str) {
    let mut temp_low = None;
    let mut temp_high = None;
    let mut attitude = telemetry.attitude;

    for field in report.trim().split(';') {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<f32>() else {
            continue;
        };

        match key.trim() {
            "bat" => telemetry.battery = value.clamp(0.0, 100.0),
            // reported in centimeters
            "h" => telemetry.altitude = value / 100.0,
            "templ" => temp_low = Some(value),
            "temph" => temp_high = Some(value),
            "pitch" => attitude.pitch = value,
            "roll" => attitude.roll = value,
            "yaw" => attitude.yaw = value,
            _ => {}
        }
    }

    telemetry.attitude = attitude;

    match (temp_low, temp_high) {
        (Some(l), Some(h)) => telemetry.temperature = (l + h) / 2.0,
        (Some(t), None) | (None, Some(t)) => telemetry.temperature = t,
        (None, None) => {}
    }
}

/// Formats stick inputs as an SDK `rc` command.
pub fn rc_command(cmd: MoveCommand) -> String {
    let cmd = cmd.clamped();
    format!(
        "rc {} {} {} {}",
        cmd.left_right.round() as i32,
        cmd.forward_backward.round() as i32,
        cmd.up_down.round() as i32,
        cmd.yaw.round() as i32
    )
}

#[async_trait]
impl DeviceDriver for TelloDriver {
    fn name(&self) -> &'static str {
        "tello"
    }

    fn is_hardware(&self) -> bool {
        true
    }

    async fn takeoff(&mut self) -> Result<(), DeviceError> {
        if self.telemetry.is_flying {
            return Err(DeviceError::AlreadyFlying);
        }
        self.send_command("takeoff").await?;
        self.telemetry.is_flying = true;
        Ok(())
    }

    async fn land(&mut self) -> Result<(), DeviceError> {
        if !self.telemetry.is_flying {
            return Err(DeviceError::NotFlying);
        }
        self.send_command("land").await?;
        self.telemetry.is_flying = false;
        Ok(())
    }

    async fn move_by(&mut self, cmd: MoveCommand) -> Result<(), DeviceError> {
        if !self.telemetry.is_flying {
            return Err(DeviceError::NotFlying);
        }
        self.send_unacked(&rc_command(cmd)).await
    }

    async fn set_mode(&mut self, mode: &str) -> Result<(), DeviceError> {
        // flight modes are implemented on the ground side, the platform
        // itself only knows about sticks
        validate_mode(mode)?;
        self.telemetry.mode = mode.to_owned();
        Ok(())
    }

    async fn start_recording(&mut self) -> Result<(), DeviceError> {
        if self.telemetry.is_recording {
            return Err(DeviceError::AlreadyRecording);
        }
        self.send_command("streamon").await?;
        self.telemetry.is_recording = true;
        Ok(())
    }

    async fn stop_recording(&mut self) -> Result<(), DeviceError> {
        if !self.telemetry.is_recording {
            return Err(DeviceError::NotRecording);
        }
        self.send_command("streamoff").await?;
        self.telemetry.is_recording = false;
        Ok(())
    }

    async fn telemetry(&mut self) -> Result<DeviceTelemetry, DeviceError> {
        self.drain_state();
        Ok(self.telemetry.clone())
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            driver: self.name(),
            hardware: true,
            address: Some(self.address.clone()),
            telemetry: self.telemetry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use dr_types::Attitude;

    use super::*;

    #[test]
    fn parses_state_report() {
        let mut telemetry = DeviceTelemetry::default();
        apply_state(
            &mut telemetry,
            "pitch:2;roll:-1;yaw:90;vgx:0;vgy:0;vgz:0;templ:60;temph:62;tof:10;h:120;bat:87;baro:12.3;time:4;agx:0.00;agy:0.00;agz:0.00;\r\n",
        );

        assert_eq!(telemetry.battery, 87.0);
        assert_eq!(telemetry.altitude, 1.2);
        assert_eq!(telemetry.temperature, 61.0);
        assert_eq!(telemetry.attitude, Attitude::new(2.0, -1.0, 90.0));
    }

    #[test]
    fn garbage_state_leaves_telemetry_alone() {
        let mut telemetry = DeviceTelemetry::default();
        apply_state(&mut telemetry, "bat:lots;nonsense;h");
        assert_eq!(telemetry, DeviceTelemetry::default());
    }

    #[test]
    fn rc_command_rounds_and_clamps() {
        assert_eq!(
            rc_command(MoveCommand::new(-20.4, 150.0, 0.6, -100.0)),
            "rc -20 100 1 -100"
        );
    }

    /// Stands in for the platform: acknowledges every command with `reply`.
    async fn fake_tello(reply: &'static str) -> SocketAddr {
        let sock = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = sock.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            while let Ok((_, from)) = sock.recv_from(&mut buf).await {
                let _ = sock.send_to(reply.as_bytes(), from).await;
            }
        });

        addr
    }

    async fn free_udp_port() -> u16 {
        let sock = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        sock.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn connects_and_takes_off() {
        let config = TelloConfig {
            address: fake_tello("ok").await,
            state_port: free_udp_port().await,
            reply_timeout_ms: 1000,
        };

        let mut driver = TelloDriver::connect(&config).await.unwrap();
        driver.takeoff().await.unwrap();
        assert!(driver.telemetry().await.unwrap().is_flying);
        assert_eq!(driver.takeoff().await, Err(DeviceError::AlreadyFlying));
    }

    #[tokio::test]
    async fn rejected_command_is_reported() {
        let config = TelloConfig {
            address: fake_tello("error Motor stop").await,
            state_port: free_udp_port().await,
            reply_timeout_ms: 1000,
        };

        let result = TelloDriver::connect(&config).await;
        assert!(matches!(result, Err(DeviceError::Rejected(reply)) if reply == "error Motor stop"));
    }

    #[tokio::test]
    async fn silent_platform_is_unavailable() {
        // bound but never answers
        let silent = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let config = TelloConfig {
            address: silent.local_addr().unwrap(),
            state_port: free_udp_port().await,
            reply_timeout_ms: 50,
        };

        let result = TelloDriver::connect(&config).await;
        assert!(matches!(result, Err(DeviceError::LinkUnavailable(_))));
    }

    /// Stands in for a platform that answers each command after `delay_for`
    /// with `reply_for`, without waiting for earlier answers to go out.
    async fn scripted_tello(
        delay_for: fn(&str) -> Duration,
        reply_for: fn(&str) -> &'static str,
    ) -> SocketAddr {
        let sock = std::sync::Arc::new(UdpSocket::bind(("127.0.0.1", 0)).await.unwrap());
        let addr = sock.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            while let Ok((n, from)) = sock.recv_from(&mut buf).await {
                let command = String::from_utf8_lossy(&buf[..n]).into_owned();
                let sock = sock.clone();

                tokio::spawn(async move {
                    tokio::time::sleep(delay_for(&command)).await;
                    let _ = sock.send_to(reply_for(&command).as_bytes(), from).await;
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_the_next_command() {
        let config = TelloConfig {
            address: scripted_tello(
                |command| match command {
                    "takeoff" => Duration::from_millis(150),
                    _ => Duration::ZERO,
                },
                |command| match command {
                    "takeoff" => "error takeoff late",
                    "streamon" => "error no video",
                    _ => "ok",
                },
            )
            .await,
            state_port: free_udp_port().await,
            reply_timeout_ms: 100,
        };

        let mut driver = TelloDriver::connect(&config).await.unwrap();

        assert_eq!(
            driver.takeoff().await,
            Err(DeviceError::Timeout(Duration::from_millis(100)))
        );

        // the takeoff answer lands in the socket while nobody is waiting
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(
            driver.start_recording().await,
            Err(DeviceError::Rejected("error no video".to_owned()))
        );
    }
}
