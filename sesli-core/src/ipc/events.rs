//! Event and snapshot types a host forwards to its UI.
//!
//! All types serialize with camelCase fields and lowercase enum tags so they
//! can be passed over any JSON IPC bus unchanged.

use serde::{Deserialize, Serialize};

use crate::platform::Capabilities;

// ---------------------------------------------------------------------------
// Session mode
// ---------------------------------------------------------------------------

/// Exactly one mode is active at any instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Voice mode off. Initial state, and the state after stop or a fatal fault.
    #[default]
    Idle,
    /// Capture is open and the silence segmenter is armed.
    Listening,
    /// An utterance has been dispatched; waiting for the host to reply.
    Processing,
    /// A response is being spoken.
    Speaking,
}

impl SessionMode {
    pub fn is_active(self) -> bool {
        self != Self::Idle
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Broadcast by the session on every observable change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    ModeChanged {
        mode: SessionMode,
        previous: SessionMode,
    },
    /// Live transcript of the turn in progress.
    TranscriptUpdated { finalized: String, interim: String },
    /// A finalized utterance was handed to the transcript callback.
    UtteranceDispatched { text: String },
    /// Fragment `index` (1-based) of `total` started playing.
    FragmentStarted {
        index: usize,
        total: usize,
        text: String,
    },
    PermissionChanged { denied: bool },
    CaptureFault { kind: String, recoverable: bool },
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Observable state surface, refreshed after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub mode: SessionMode,
    pub finalized_transcript: String,
    pub interim_transcript: String,
    pub permission_denied: bool,
    pub capture_active: bool,
    pub playback_active: bool,
    pub speech_rate: f32,
    pub capabilities: Capabilities,
}

impl SessionSnapshot {
    pub fn new(capabilities: Capabilities, speech_rate: f32) -> Self {
        Self {
            mode: SessionMode::Idle,
            finalized_transcript: String::new(),
            interim_transcript: String::new(),
            permission_denied: false,
            capture_active: false,
            playback_active: false,
            speech_rate,
            capabilities,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.capabilities.supports_voice_mode()
    }
}
