use std::{sync::Arc, time::Instant};

use dr_device::{DeviceError, DeviceSession, MoveCommand};
use dr_types::AiMode;
use dr_vision::{match_phrase, AnnotationPipeline, VoiceAction};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::*;

use crate::StateReader;

/// Loosely typed command parameters.
pub type Params = serde_json::Map<String, Value>;

/// Stick input used for voice-issued moves.
const VOICE_STICK: f32 = 50.0;

/// Failures that mean the request itself was wrong, as opposed to the device
/// refusing it. These are reported as error envelopes.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        DispatchError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

fn number_param(params: &Params, name: &'static str) -> Result<f32, DispatchError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(|n| n as f32)
            .ok_or_else(|| DispatchError::invalid(name, "not representable")),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| DispatchError::invalid(name, format!("'{s}' is not a number"))),
        Some(other) => Err(DispatchError::invalid(
            name,
            format!("expected a number, got {other}"),
        )),
    }
}

fn string_param<'a>(params: &'a Params, name: &'static str) -> Result<&'a str, DispatchError> {
    match params.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(DispatchError::invalid(name, "missing"))
        }
        Some(other) => Err(DispatchError::invalid(
            name,
            format!("expected a string, got {other}"),
        )),
    }
}

/// Like `string_param`, but an absent or null parameter means `default`.
fn string_param_or<'a>(
    params: &'a Params,
    name: &'static str,
    default: &'a str,
) -> Result<&'a str, DispatchError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(_) => string_param(params, name),
    }
}

/// `{"success": true}` or `{"success": false, "error": ..}`.
fn outcome(result: Result<(), DeviceError>) -> Value {
    match result {
        Ok(()) => json!({ "success": true }),
        Err(err) => json!({ "success": false, "error": err.to_string() }),
    }
}

/// Maps commands onto the device session and the annotation pipeline.
#[derive(Clone)]
pub struct CommandDispatcher {
    device: DeviceSession,
    pipeline: Arc<dyn AnnotationPipeline>,
    state: StateReader,
    video_source: String,
    started: Instant,
}

impl CommandDispatcher {
    pub fn new(
        device: DeviceSession,
        pipeline: Arc<dyn AnnotationPipeline>,
        state: StateReader,
        video_source: impl Into<String>,
    ) -> Self {
        Self {
            device,
            pipeline,
            state,
            video_source: video_source.into(),
            started: Instant::now(),
        }
    }

    /// Runs one command. `Ok` carries the result payload, which may itself
    /// report that the device refused the command.
    pub async fn dispatch(&self, command: &str, params: &Params) -> Result<Value, DispatchError> {
        info!("dispatching {command} {params:?}");

        let result = match command {
            "takeoff" => outcome(self.device.takeoff().await),
            "land" => outcome(self.device.land().await),
            "move" => {
                let cmd = MoveCommand::new(
                    number_param(params, "left_right")?,
                    number_param(params, "forward_backward")?,
                    number_param(params, "up_down")?,
                    number_param(params, "yaw")?,
                );
                outcome(self.device.move_by(cmd).await)
            }
            "set_mode" => {
                let mode = string_param_or(params, "mode", "manual")?;
                outcome(self.set_mode(mode).await)
            }
            "recording" => match string_param(params, "action")? {
                "start" => outcome(self.device.start_recording().await),
                "stop" => outcome(self.device.stop_recording().await),
                other => {
                    return Err(DispatchError::invalid(
                        "action",
                        format!("expected 'start' or 'stop', got '{other}'"),
                    ))
                }
            },
            "get_info" => self.info().await,
            "ai_command" => {
                let mode = string_param(params, "mode")?;
                match mode.parse::<AiMode>() {
                    Ok(mode) => {
                        self.pipeline.set_mode(mode);
                        json!({ "success": true, "mode": mode })
                    }
                    Err(err) => json!({ "success": false, "error": err.to_string() }),
                }
            }
            "voice_command" => self.voice(string_param(params, "text")?).await,
            "analyze_scene" => {
                let current = self.state.read();
                let analysis = self.pipeline.describe_scene(&current.frame.detections);
                json!({
                    "success": true,
                    "analysis": analysis,
                    "sequence": current.frame.sequence,
                })
            }
            other => return Err(DispatchError::UnknownCommand(other.to_owned())),
        };

        Ok(result)
    }

    /// Switches the device to the real platform, returning the active driver.
    pub async fn use_hardware(&self) -> Result<&'static str, DeviceError> {
        self.device.use_hardware().await
    }

    /// Changes the flight mode and, once the device accepts it, the matching
    /// annotation mode.
    async fn set_mode(&self, mode: &str) -> Result<(), DeviceError> {
        self.device.set_mode(mode).await?;
        self.pipeline.set_mode(AiMode::for_flight_mode(mode));
        Ok(())
    }

    async fn info(&self) -> Value {
        let device_info = match self.device.info().await {
            Ok(info) => json!(info),
            Err(err) => json!({ "error": err.to_string() }),
        };

        json!({
            "success": true,
            "drone_info": device_info,
            "backend_info": {
                "version": env!("CARGO_PKG_VERSION"),
                "uptime": self.started.elapsed().as_secs_f64(),
                "video_source": self.video_source,
            },
            "ai_info": self.pipeline.status(),
        })
    }

    async fn voice(&self, text: &str) -> Value {
        let matched = match_phrase(text);
        debug!(
            "voice input '{}' matched {:?} at {}",
            matched.original, matched.action, matched.confidence
        );

        let execution = if matched.is_actionable() {
            match self.execute_voice(matched.action).await {
                Some(result) => outcome(result),
                None => json!({ "success": false, "error": "no platform action for this command" }),
            }
        } else {
            Value::Null
        };

        json!({
            "success": true,
            "command": matched,
            "executed": execution.get("success").and_then(Value::as_bool).unwrap_or(false),
            "execution": execution,
        })
    }

    /// `None` when the action has no platform primitive.
    async fn execute_voice(&self, action: VoiceAction) -> Option<Result<(), DeviceError>> {
        let stick = |lr, fb, ud, yaw| MoveCommand::new(lr, fb, ud, yaw);

        let result = match action {
            VoiceAction::Takeoff => self.device.takeoff().await,
            VoiceAction::Land => self.device.land().await,
            VoiceAction::MoveUp => self.device.move_by(stick(0.0, 0.0, VOICE_STICK, 0.0)).await,
            VoiceAction::MoveDown => {
                self.device.move_by(stick(0.0, 0.0, -VOICE_STICK, 0.0)).await
            }
            VoiceAction::MoveLeft => {
                self.device.move_by(stick(-VOICE_STICK, 0.0, 0.0, 0.0)).await
            }
            VoiceAction::MoveRight => self.device.move_by(stick(VOICE_STICK, 0.0, 0.0, 0.0)).await,
            VoiceAction::MoveForward => {
                self.device.move_by(stick(0.0, VOICE_STICK, 0.0, 0.0)).await
            }
            VoiceAction::MoveBackward => {
                self.device.move_by(stick(0.0, -VOICE_STICK, 0.0, 0.0)).await
            }
            VoiceAction::Rotate => self.device.move_by(stick(0.0, 0.0, 0.0, VOICE_STICK)).await,
            VoiceAction::Stop => self.device.move_by(stick(0.0, 0.0, 0.0, 0.0)).await,
            VoiceAction::FollowMe => {
                self.pipeline.set_mode(AiMode::FollowMe);
                Ok(())
            }
            VoiceAction::StartRecording => self.device.start_recording().await,
            VoiceAction::StopRecording => self.device.stop_recording().await,
            VoiceAction::SetModeManual => self.set_mode("manual").await,
            VoiceAction::SetModeFollow => self.set_mode("face_tracking").await,
            VoiceAction::SetModeExplore => self.set_mode("slam").await,
            VoiceAction::TakePhoto | VoiceAction::Unknown => return None,
        };

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dr_client::Task;
    use dr_device::DeviceConfig;
    use dr_types::FrameBuffer;
    use dr_vision::{SimulatedAnnotator, VisionConfig};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::SharedState;

    struct Fixture {
        dispatcher: CommandDispatcher,
        pipeline: Arc<SimulatedAnnotator>,
        cancel: CancellationToken,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    fn fixture() -> Fixture {
        let task = dr_device::create_task(DeviceConfig::default()).unwrap();
        let device = task.session(Duration::from_secs(2));

        let cancel = CancellationToken::new();
        tokio::spawn(Box::new(task).run(cancel.clone()));

        let pipeline = Arc::new(SimulatedAnnotator::new(VisionConfig::default()));
        let state = SharedState::new(FrameBuffer::not_ready());

        Fixture {
            dispatcher: CommandDispatcher::new(
                device,
                pipeline.clone(),
                state.reader(),
                "synthetic",
            ),
            pipeline,
            cancel,
        }
    }

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[tokio::test]
    async fn takeoff_twice_reports_reason() {
        let f = fixture();

        let first = f.dispatcher.dispatch("takeoff", &Params::new()).await.unwrap();
        assert_eq!(first, json!({ "success": true }));

        let second = f.dispatcher.dispatch("takeoff", &Params::new()).await.unwrap();
        assert_eq!(second["success"], false);
        assert_eq!(second["error"], "already flying");
    }

    #[tokio::test]
    async fn move_accepts_loose_numbers() {
        let f = fixture();
        f.dispatcher.dispatch("takeoff", &Params::new()).await.unwrap();

        let result = f
            .dispatcher
            .dispatch(
                "move",
                &params(json!({ "left_right": "25", "yaw": -10.5, "up_down": null })),
            )
            .await
            .unwrap();
        assert_eq!(result["success"], true);

        let err = f
            .dispatcher
            .dispatch("move", &params(json!({ "yaw": "fast" })))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParameter { name: "yaw", .. }));
    }

    #[tokio::test]
    async fn set_mode_updates_annotation_mode() {
        let f = fixture();

        let result = f
            .dispatcher
            .dispatch("set_mode", &params(json!({ "mode": "slam" })))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(f.pipeline.status().mode, AiMode::Exploration);

        // rejected by the device, so the annotation mode stays put
        let result = f
            .dispatcher
            .dispatch("set_mode", &params(json!({ "mode": "warp_speed" })))
            .await
            .unwrap();
        assert_eq!(result["success"], false);
        assert_eq!(f.pipeline.status().mode, AiMode::Exploration);

        let info = f.dispatcher.dispatch("get_info", &Params::new()).await.unwrap();
        assert_eq!(info["drone_info"]["telemetry"]["mode"], "slam");
        assert_eq!(info["ai_info"]["mode"], "exploration");
        assert_eq!(info["backend_info"]["video_source"], "synthetic");

        // no mode means back to manual
        let result = f.dispatcher.dispatch("set_mode", &Params::new()).await.unwrap();
        assert_eq!(result["success"], true);
        let info = f.dispatcher.dispatch("get_info", &Params::new()).await.unwrap();
        assert_eq!(info["drone_info"]["telemetry"]["mode"], "manual");
    }

    #[tokio::test]
    async fn recording_requires_known_action() {
        let f = fixture();

        let started = f
            .dispatcher
            .dispatch("recording", &params(json!({ "action": "start" })))
            .await
            .unwrap();
        assert_eq!(started["success"], true);

        let again = f
            .dispatcher
            .dispatch("recording", &params(json!({ "action": "start" })))
            .await
            .unwrap();
        assert_eq!(again["success"], false);

        let err = f
            .dispatcher
            .dispatch("recording", &params(json!({ "action": "pause" })))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParameter { name: "action", .. }));
    }

    #[tokio::test]
    async fn ai_command_validates_mode() {
        let f = fixture();

        let ok = f
            .dispatcher
            .dispatch("ai_command", &params(json!({ "mode": "follow_me" })))
            .await
            .unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(f.pipeline.status().mode, AiMode::FollowMe);

        let bad = f
            .dispatcher
            .dispatch("ai_command", &params(json!({ "mode": "telepathy" })))
            .await
            .unwrap();
        assert_eq!(bad["success"], false);
        assert_eq!(f.pipeline.status().mode, AiMode::FollowMe);
    }

    #[tokio::test]
    async fn voice_commands_match_and_execute() {
        let f = fixture();

        let exact = f
            .dispatcher
            .dispatch("voice_command", &params(json!({ "text": "Decolar" })))
            .await
            .unwrap();
        assert_eq!(exact["command"]["action"], "takeoff");
        assert_eq!(exact["command"]["confidence"], 1.0);
        assert_eq!(exact["executed"], true);

        // same action, lower confidence; the drone is already up so the
        // device refuses it
        let partial = f
            .dispatcher
            .dispatch(
                "voice_command",
                &params(json!({ "text": "eu quero decolar agora" })),
            )
            .await
            .unwrap();
        assert_eq!(partial["command"]["action"], "takeoff");
        assert!((partial["command"]["confidence"].as_f64().unwrap() - 0.8).abs() < 1e-6);
        assert_eq!(partial["execution"]["error"], "already flying");
    }

    #[tokio::test]
    async fn unrecognized_voice_input_touches_nothing() {
        let f = fixture();

        let result = f
            .dispatcher
            .dispatch("voice_command", &params(json!({ "text": "xyz123" })))
            .await
            .unwrap();
        assert_eq!(result["command"]["action"], "unknown");
        assert_eq!(result["command"]["confidence"], 0.0);
        assert_eq!(result["executed"], false);
        assert_eq!(result["execution"], Value::Null);

        let info = f.dispatcher.dispatch("get_info", &Params::new()).await.unwrap();
        assert_eq!(info["drone_info"]["telemetry"]["is_flying"], false);
    }

    #[tokio::test]
    async fn photo_has_no_platform_action() {
        let f = fixture();

        let result = f
            .dispatcher
            .dispatch("voice_command", &params(json!({ "text": "foto" })))
            .await
            .unwrap();
        assert_eq!(result["command"]["action"], "take_photo");
        assert_eq!(result["executed"], false);
    }

    #[tokio::test]
    async fn analyze_scene_without_frames() {
        let f = fixture();

        let result = f.dispatcher.dispatch("analyze_scene", &Params::new()).await.unwrap();
        assert_eq!(result["analysis"], "No objects detected in the scene.");
        assert_eq!(result["sequence"], 0);
    }

    #[tokio::test]
    async fn unknown_command_is_an_error() {
        let f = fixture();

        let err = f
            .dispatcher
            .dispatch("barrel_roll", &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown command 'barrel_roll'");
    }
}
