//! # sesli-core
//!
//! Half-duplex voice conversation session manager.
//!
//! ## Architecture
//!
//! ```text
//! SpeechRecognizer ──RecognitionSink──┐
//! SpeechSynthesizer ──SynthesisSink───┤
//! timers / permission probe ──────────┤
//!                                     ▼
//!             control task: SessionMachine::handle(input) → effects
//!                                     │
//!        ┌──────────────┬─────────────┼──────────────┬─────────────────┐
//!   open/abort     speak/cancel   on_transcript   broadcast      snapshot
//!    capture        fragments      (host reply)   SessionEvent   (Mutex)
//! ```
//!
//! Capture is open only in `listening`, playback runs only in `speaking`, and
//! the machine is the single place either is started. Replies pass through
//! `text::cleanse` and `text::chunk_text` before reaching the synthesizer.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod capture;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod platform;
pub mod playback;
pub mod text;
pub mod voice;

// Convenience re-exports for downstream crates
pub use engine::{DiagnosticsSnapshot, SessionConfig, VoiceSession};
pub use error::{Result, SesliError};
pub use ipc::events::{SessionEvent, SessionMode, SessionSnapshot};
pub use platform::{
    Capabilities, MicrophonePermission, PermissionOutcome, Platform, RecognitionError,
    RecognitionEvent, RecognitionOptions, RecognitionResult, RecognitionSink, SpeechRecognizer,
    SpeechSynthesizer, SynthesisError, SynthesisOutcome, SynthesisSink, UtteranceRequest,
};
pub use text::{chunk_text, cleanse, SpeechCleanser};
pub use voice::{select_voice, VoiceInfo};
