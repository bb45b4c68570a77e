use serde::Serialize;

/// Matches below or at this confidence are reported but not executed.
pub const VOICE_CONFIDENCE_THRESHOLD: f32 = 0.7;

const EXACT_CONFIDENCE: f32 = 1.0;
const PARTIAL_CONFIDENCE: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceAction {
    Takeoff,
    Land,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MoveForward,
    MoveBackward,
    Rotate,
    FollowMe,
    Stop,
    TakePhoto,
    StartRecording,
    StopRecording,
    SetModeManual,
    SetModeFollow,
    SetModeExplore,
    Unknown,
}

/// Recognized phrases, in matching priority order.
pub const PHRASES: [(&str, VoiceAction); 17] = [
    ("decolar", VoiceAction::Takeoff),
    ("pousar", VoiceAction::Land),
    ("subir", VoiceAction::MoveUp),
    ("descer", VoiceAction::MoveDown),
    ("esquerda", VoiceAction::MoveLeft),
    ("direita", VoiceAction::MoveRight),
    ("frente", VoiceAction::MoveForward),
    ("trás", VoiceAction::MoveBackward),
    ("girar", VoiceAction::Rotate),
    ("seguir", VoiceAction::FollowMe),
    ("parar", VoiceAction::Stop),
    ("foto", VoiceAction::TakePhoto),
    ("gravar", VoiceAction::StartRecording),
    ("parar gravação", VoiceAction::StopRecording),
    ("modo manual", VoiceAction::SetModeManual),
    ("modo seguir", VoiceAction::SetModeFollow),
    ("modo explorar", VoiceAction::SetModeExplore),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceMatch {
    pub action: VoiceAction,
    pub confidence: f32,

    /// The normalized input text
    pub original: String,
}

impl VoiceMatch {
    /// Whether the match is confident enough to act on.
    pub fn is_actionable(&self) -> bool {
        self.action != VoiceAction::Unknown && self.confidence > VOICE_CONFIDENCE_THRESHOLD
    }
}

/// Maps transcribed speech to an action. An exact (case-insensitive) phrase
/// wins outright; otherwise the first phrase in table order that appears
/// anywhere in the text is used.
pub fn match_phrase(text: &str) -> VoiceMatch {
    let normalized = text.trim().to_lowercase();

    let found = PHRASES
        .iter()
        .find(|(phrase, _)| *phrase == normalized)
        .map(|(_, action)| (*action, EXACT_CONFIDENCE))
        .or_else(|| {
            PHRASES
                .iter()
                .find(|(phrase, _)| normalized.contains(phrase))
                .map(|(_, action)| (*action, PARTIAL_CONFIDENCE))
        });

    let (action, confidence) = found.unwrap_or((VoiceAction::Unknown, 0.0));

    VoiceMatch {
        action,
        confidence,
        original: normalized,
    }
}
