//! Platform speech services the session orchestrates but does not implement.
//!
//! A [`Platform`] bundles up to three services:
//!
//! | Service | Trait | Required for voice mode |
//! |---------|-------|-------------------------|
//! | continuous speech-to-text | [`SpeechRecognizer`] | yes |
//! | text-to-speech | [`SpeechSynthesizer`] | yes |
//! | microphone permission prompt | [`MicrophonePermission`] | no |
//!
//! Capabilities are probed once when the session is spawned
//! ([`Platform::probe`]); the controller never checks for a service again.
//!
//! ## Sinks
//!
//! Services report back through a [`RecognitionSink`] or [`SynthesisSink`]
//! handed to them per stream / per utterance. The session detaches a sink
//! before it aborts the stream or cancels the utterance it belongs to, so a
//! late "ended" or "canceled" callback from the platform is dropped instead of
//! racing a fresh start.

pub mod scripted;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::engine::machine::Input;
use crate::voice::VoiceInfo;

// ---------------------------------------------------------------------------
// Recognition
// ---------------------------------------------------------------------------

/// How a capture stream is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    /// BCP-47 language tag.
    pub language: String,
    pub continuous: bool,
    pub interim_results: bool,
}

/// One entry of the stream's cumulative result list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
        }
    }

    pub fn final_result(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
        }
    }
}

/// Callback surface of a live capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// `results` is the full result list of the stream so far; entries before
    /// `result_index` are unchanged since the previous event.
    Results {
        result_index: usize,
        results: Vec<RecognitionResult>,
    },
    SpeechStarted,
    SpeechEnded,
    /// The stream stopped on its own (or after an error).
    Ended,
    Error(RecognitionError),
}

/// Capture faults reported by the recognizer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    #[error("no speech detected")]
    NoSpeech,
    #[error("capture aborted")]
    Aborted,
    #[error("microphone access not allowed")]
    NotAllowed,
    #[error("recognition service not allowed")]
    ServiceNotAllowed,
    #[error("audio capture failed")]
    AudioCapture,
    #[error("network failure")]
    Network,
    #[error("recognizer failed to start: {0}")]
    StartFailed(String),
    #[error("{0}")]
    Other(String),
}

impl RecognitionError {
    /// Permission and hardware faults end the session; everything else is
    /// retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotAllowed | Self::ServiceNotAllowed | Self::AudioCapture
        )
    }

    /// Short machine-readable name used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::Aborted => "aborted",
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::AudioCapture => "audio-capture",
            Self::Network => "network",
            Self::StartFailed(_) => "start-failed",
            Self::Other(_) => "other",
        }
    }
}

/// A continuous speech-to-text service.
pub trait SpeechRecognizer: Send + 'static {
    /// Open a fresh stream that reports through `sink` until aborted or ended.
    ///
    /// # Errors
    /// Returns an error if the stream could not be opened; the session
    /// classifies it like any other capture fault.
    fn start(
        &mut self,
        options: &RecognitionOptions,
        sink: RecognitionSink,
    ) -> Result<(), RecognitionError>;

    /// Abort the current stream, if any. Must tolerate being called when idle.
    fn abort(&mut self);
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// One fragment handed to the synthesis engine.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceRequest {
    pub text: String,
    pub lang: String,
    /// `None` uses the platform default voice.
    pub voice: Option<VoiceInfo>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    #[error("utterance interrupted")]
    Interrupted,
    #[error("utterance canceled")]
    Canceled,
    #[error("synthesis engine error: {0}")]
    Engine(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Finished,
    Failed(SynthesisError),
}

/// A text-to-speech service speaking one utterance at a time.
pub trait SpeechSynthesizer: Send + 'static {
    /// Voices currently installed. May change between calls.
    fn voices(&self) -> Vec<VoiceInfo>;

    /// Start speaking `request`; completion is reported through `sink`.
    ///
    /// # Errors
    /// An error here is treated as a failed fragment, never as fatal.
    fn speak(&mut self, request: UtteranceRequest, sink: SynthesisSink)
        -> Result<(), SynthesisError>;

    /// Stop and discard the current utterance.
    fn cancel(&mut self);

    fn pause(&mut self);

    fn resume(&mut self);
}

// ---------------------------------------------------------------------------
// Permission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionOutcome {
    Granted,
    Denied,
    NoDevice,
}

/// Pre-flight microphone permission probe.
pub trait MicrophonePermission: Send + Sync + 'static {
    /// Ask for microphone access. May block on a user prompt; the session
    /// calls it from a blocking worker thread.
    fn request(&self) -> PermissionOutcome;
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Reporting handle for one capture stream.
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    stream: u64,
    attached: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Input>,
}

impl RecognitionSink {
    pub(crate) fn new(stream: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self {
            stream,
            attached: Arc::new(AtomicBool::new(true)),
            tx,
        }
    }

    /// Deliver `event` to the session. Returns `false` once the sink has been
    /// detached or the session is gone.
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        if !self.is_attached() {
            return false;
        }
        self.tx
            .send(Input::Recognition {
                stream: self.stream,
                event,
            })
            .is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }
}

/// Reporting handle for one synthesis utterance.
#[derive(Debug, Clone)]
pub struct SynthesisSink {
    utterance: u64,
    attached: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Input>,
}

impl SynthesisSink {
    pub(crate) fn new(utterance: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self {
            utterance,
            attached: Arc::new(AtomicBool::new(true)),
            tx,
        }
    }

    pub fn finish(&self) -> bool {
        self.emit(SynthesisOutcome::Finished)
    }

    pub fn fail(&self, error: SynthesisError) -> bool {
        self.emit(SynthesisOutcome::Failed(error))
    }

    pub fn emit(&self, outcome: SynthesisOutcome) -> bool {
        if !self.is_attached() {
            return false;
        }
        self.tx
            .send(Input::Synthesis {
                utterance: self.utterance,
                outcome,
            })
            .is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Platform bundle
// ---------------------------------------------------------------------------

/// Typed capability descriptor, computed once per session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub recognition: bool,
    pub synthesis: bool,
    pub permission_probe: bool,
}

impl Capabilities {
    /// Voice mode needs both directions of speech.
    pub fn supports_voice_mode(&self) -> bool {
        self.recognition && self.synthesis
    }
}

/// The set of speech services available to a session.
#[derive(Default)]
pub struct Platform {
    pub(crate) recognizer: Option<Box<dyn SpeechRecognizer>>,
    pub(crate) synthesizer: Option<Box<dyn SpeechSynthesizer>>,
    pub(crate) permission: Option<Arc<dyn MicrophonePermission>>,
}

impl Platform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recognizer(mut self, recognizer: impl SpeechRecognizer) -> Self {
        self.recognizer = Some(Box::new(recognizer));
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: impl SpeechSynthesizer) -> Self {
        self.synthesizer = Some(Box::new(synthesizer));
        self
    }

    pub fn with_permission(mut self, permission: impl MicrophonePermission) -> Self {
        self.permission = Some(Arc::new(permission));
        self
    }

    pub fn probe(&self) -> Capabilities {
        Capabilities {
            recognition: self.recognizer.is_some(),
            synthesis: self.synthesizer.is_some(),
            permission_probe: self.permission.is_some(),
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("capabilities", &self.probe())
            .finish()
    }
}
