//! `VoiceSession`: the public handle of a half-duplex voice conversation.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceSession::spawn()          → capabilities probed, control task running, mode = idle
//!     └─► start_voice_mode()     → permission resolved, capture open, mode = listening
//!         ├─► (silence)          → on_transcript(utterance), mode = processing
//!         ├─► speak(reply)       → fragments spoken, mode = speaking → listening
//!         ├─► stop_speaking()    → synthesis cancelled, mode = listening
//!         └─► stop_voice_mode()  → everything released, mode = idle
//! ```
//!
//! `stop_voice_mode()` and `stop_speaking()` are idempotent and may be called
//! from any state, including while a start is waiting on the permission prompt.
//!
//! ## Threading
//!
//! All state lives in a single spawned control task (see [`driver`]); the
//! handle only sends messages and reads a snapshot behind a
//! `parking_lot::Mutex`. `VoiceSession` is `Send + Sync` and can be shared
//! behind an `Arc`.

mod diagnostics;
mod driver;
pub(crate) mod machine;

pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;

use crate::{
    error::{Result, SesliError},
    ipc::events::{SessionEvent, SessionMode, SessionSnapshot},
    platform::{Capabilities, Platform},
    playback::prosody,
    text::DEFAULT_PROTOCOL_TAGS,
};
use driver::{Driver, Message};
use machine::{Input, SessionMachine};

/// Broadcast channel capacity: events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `VoiceSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Recognition and synthesis language tag. Default: `"tr-TR"`.
    pub language: String,
    /// Silence after the last capture activity that ends an utterance.
    /// Default: 1.8 s.
    pub silence_threshold: Duration,
    /// Speech shorter than this is never dispatched. Default: 0.5 s.
    pub min_speech_duration: Duration,
    /// Base speech rate, clamped to [0.5, 2.0]. Default: 1.0.
    pub speech_rate: f32,
    /// Longest fragment handed to the synthesis engine, in chars. Default: 180.
    pub max_fragment_len: usize,
    /// Pause/resume period against engines that go silent on long
    /// utterances. Default: 10 s.
    pub keep_alive_interval: Duration,
    /// First capture restart delay; doubles while streams keep ending
    /// without results. Default: 300 ms.
    pub restart_delay: Duration,
    /// Cap for the restart delay. Default: 5 s.
    pub max_restart_delay: Duration,
    /// Voice name tried before the built-in preferences.
    pub preferred_voice: Option<String>,
    /// Chat protocol tags whose content is never spoken.
    pub protocol_tags: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: "tr-TR".into(),
            silence_threshold: Duration::from_millis(1_800),
            min_speech_duration: Duration::from_millis(500),
            speech_rate: 1.0,
            max_fragment_len: 180,
            keep_alive_interval: Duration::from_secs(10),
            restart_delay: Duration::from_millis(300),
            max_restart_delay: Duration::from_secs(5),
            preferred_voice: None,
            protocol_tags: DEFAULT_PROTOCOL_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    /// Copy with every value pulled into a usable range.
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let language = match self.language.trim() {
            "" => defaults.language,
            tag => tag.to_string(),
        };
        let restart_delay = self.restart_delay.max(Duration::from_millis(10));

        Self {
            language,
            silence_threshold: self.silence_threshold.max(Duration::from_millis(100)),
            min_speech_duration: self.min_speech_duration,
            speech_rate: prosody::clamp_rate(self.speech_rate),
            max_fragment_len: self.max_fragment_len.max(1),
            keep_alive_interval: self.keep_alive_interval.max(Duration::from_secs(1)),
            restart_delay,
            max_restart_delay: self.max_restart_delay.max(restart_delay),
            preferred_voice: self
                .preferred_voice
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            protocol_tags: self.protocol_tags.clone(),
        }
    }
}

/// Handle to a running voice session.
pub struct VoiceSession {
    commands: mpsc::UnboundedSender<Message>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    events_tx: broadcast::Sender<SessionEvent>,
    capabilities: Capabilities,
    diagnostics: Arc<SessionDiagnostics>,
}

impl VoiceSession {
    /// Probe `platform` and spawn the control task.
    ///
    /// `on_transcript` is called once per finalized utterance, from the
    /// control task; it must not block. Reply by calling [`speak`](Self::speak).
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(config: SessionConfig, platform: Platform, on_transcript: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let config = config.normalized();
        let capabilities = platform.probe();
        info!(?capabilities, language = %config.language, "voice session created");

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(BROADCAST_CAP);
        let snapshot = Arc::new(Mutex::new(SessionSnapshot::new(
            capabilities,
            config.speech_rate,
        )));
        let diagnostics = Arc::new(SessionDiagnostics::default());

        let machine = SessionMachine::new(config.clone(), capabilities, Arc::clone(&diagnostics));
        let driver = Driver::new(
            &config,
            machine,
            platform,
            commands_rx,
            Box::new(on_transcript),
            events_tx.clone(),
            Arc::clone(&snapshot),
        );
        tokio::spawn(driver.run());

        Self {
            commands,
            snapshot,
            events_tx,
            capabilities,
            diagnostics,
        }
    }

    /// Begin voice mode. Resolves once the permission question is settled.
    ///
    /// # Errors
    /// - `SesliError::Unsupported` if the platform lacks recognition or synthesis.
    /// - `SesliError::PermissionDenied` / `SesliError::NoMicrophone` when the
    ///   probe fails; the sticky permission flag is set as well.
    /// - `SesliError::Cancelled` if `stop_voice_mode()` ran first.
    /// - `SesliError::SessionClosed` after `shutdown()`.
    pub async fn start_voice_mode(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Message::Start(reply))
            .map_err(|_| SesliError::SessionClosed)?;
        rx.await.map_err(|_| SesliError::SessionClosed)?
    }

    /// End voice mode and release capture, playback and timers.
    pub fn stop_voice_mode(&self) {
        let _ = self.commands.send(Message::Input(Input::Stop));
    }

    /// Speak the reply to the last utterance. Ignored while voice mode is off.
    pub fn speak(&self, response: impl Into<String>) -> Result<()> {
        self.send(Input::Speak(response.into()))
    }

    /// Interrupt playback and listen again immediately.
    pub fn stop_speaking(&self) {
        let _ = self.commands.send(Message::Input(Input::StopSpeaking));
    }

    /// Change the base speech rate; applies from the next fragment.
    pub fn set_speech_rate(&self, rate: f32) -> Result<()> {
        self.send(Input::SetRate(rate))
    }

    pub fn clear_permission_denied(&self) -> Result<()> {
        self.send(Input::ClearPermissionDenied)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.lock().clone()
    }

    pub fn mode(&self) -> SessionMode {
        self.snapshot.lock().mode
    }

    pub fn permission_denied(&self) -> bool {
        self.snapshot.lock().permission_denied
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether this platform can run voice mode at all.
    pub fn is_supported(&self) -> bool {
        self.capabilities.supports_voice_mode()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Stop voice mode and end the control task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Message::Shutdown(Some(reply))).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, input: Input) -> Result<()> {
        self.commands
            .send(Message::Input(input))
            .map_err(|_| SesliError::SessionClosed)
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        let _ = self.commands.send(Message::Shutdown(None));
    }
}
