//! Pure session state machine.
//!
//! `SessionMachine::handle` takes one [`Input`] plus the current time and
//! returns the [`Effect`]s the driver must perform. It never touches a
//! platform service, a timer or a channel, so every transition can be tested
//! synchronously.
//!
//! ## Guards
//!
//! Every deferred input carries the identity it was issued for:
//!
//! - capture events carry their stream id, dropped unless it is the open stream
//! - synthesis outcomes carry their utterance id, dropped unless it is in flight
//! - timers carry a token, dropped unless it is the one last armed for its kind
//! - permission results carry their attempt id, dropped after a stop
//!
//! A stop or a new transition therefore invalidates everything scheduled
//! before it without having to reach into the timer tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::diagnostics::SessionDiagnostics;
use super::SessionConfig;
use crate::capture::{SegmentDecision, SilenceSegmenter, UtteranceBuffer};
use crate::ipc::events::{SessionEvent, SessionMode, SessionSnapshot};
use crate::platform::{
    Capabilities, PermissionOutcome, RecognitionEvent, SynthesisError, SynthesisOutcome,
    UtteranceRequest,
};
use crate::playback::{prosody, FragmentQueue};
use crate::text::SpeechCleanser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    /// End-of-utterance detection.
    Silence,
    /// Reopen capture after the stream ended or faulted.
    Restart,
    /// Pause between two fragments.
    Gap,
    /// Periodic pause/resume of the synthesis engine.
    KeepAlive,
}

#[derive(Debug)]
pub(crate) enum Input {
    Start,
    PermissionResolved {
        attempt: u64,
        outcome: PermissionOutcome,
    },
    Stop,
    Speak(String),
    StopSpeaking,
    SetRate(f32),
    ClearPermissionDenied,
    Recognition {
        stream: u64,
        event: RecognitionEvent,
    },
    Synthesis {
        utterance: u64,
        outcome: SynthesisOutcome,
    },
    Timer {
        kind: TimerKind,
        token: u64,
    },
}

/// How a `Start` request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartOutcome {
    Started,
    AlreadyActive,
    PermissionDenied,
    NoMicrophone,
    Unsupported,
    Cancelled,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Effect {
    RequestPermission { attempt: u64 },
    OpenCapture { stream: u64 },
    /// Detach the stream's sink; abort the stream when `abort` is set.
    CloseCapture { abort: bool },
    /// `request.voice` is left for the driver to fill from a fresh voice list.
    Speak {
        utterance: u64,
        request: UtteranceRequest,
    },
    /// Detach the utterance's sink, then cancel it.
    CancelSynthesis,
    KeepAlive,
    ArmTimer {
        kind: TimerKind,
        token: u64,
        delay: Duration,
    },
    CancelTimer { kind: TimerKind },
    Dispatch(String),
    StartSettled(StartOutcome),
    Emit(SessionEvent),
}

pub(crate) struct SessionMachine {
    config: SessionConfig,
    capabilities: Capabilities,
    cleanser: SpeechCleanser,
    diagnostics: Arc<SessionDiagnostics>,

    mode: SessionMode,
    permission_denied: bool,
    speech_rate: f32,
    /// Permission attempt awaiting its result.
    starting: Option<u64>,

    capture_stream: Option<u64>,
    stream_had_results: bool,
    restart_failures: u32,
    buffer: UtteranceBuffer,
    segmenter: SilenceSegmenter,

    playback: FragmentQueue,
    utterance: Option<u64>,

    timers: HashMap<TimerKind, u64>,
    next_id: u64,
    effects: Vec<Effect>,
}

impl SessionMachine {
    pub(crate) fn new(
        config: SessionConfig,
        capabilities: Capabilities,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Self {
        let config = config.normalized();
        Self {
            cleanser: SpeechCleanser::new(&config.protocol_tags),
            segmenter: SilenceSegmenter::new(config.min_speech_duration),
            speech_rate: config.speech_rate,
            config,
            capabilities,
            diagnostics,
            mode: SessionMode::Idle,
            permission_denied: false,
            starting: None,
            capture_stream: None,
            stream_had_results: false,
            restart_failures: 0,
            buffer: UtteranceBuffer::new(),
            playback: FragmentQueue::new(),
            utterance: None,
            timers: HashMap::new(),
            next_id: 0,
            effects: Vec::new(),
        }
    }

    pub(crate) fn handle(&mut self, input: Input, now: Instant) -> Vec<Effect> {
        match input {
            Input::Start => self.on_start(),
            Input::PermissionResolved { attempt, outcome } => {
                self.on_permission(attempt, outcome)
            }
            Input::Stop => self.on_stop(),
            Input::Speak(text) => self.on_speak(&text),
            Input::StopSpeaking => self.on_stop_speaking(),
            Input::SetRate(rate) => {
                self.speech_rate = prosody::clamp_rate(rate);
                debug!(rate = self.speech_rate, "speech rate updated");
            }
            Input::ClearPermissionDenied => self.set_permission_denied(false),
            Input::Recognition { stream, event } => self.on_recognition(stream, event, now),
            Input::Synthesis { utterance, outcome } => self.on_synthesis(utterance, outcome),
            Input::Timer { kind, token } => self.on_timer(kind, token, now),
        }

        debug_assert!(
            !(self.capture_stream.is_some() && self.utterance.is_some()),
            "capture and playback active together"
        );
        std::mem::take(&mut self.effects)
    }

    pub(crate) fn mode(&self) -> SessionMode {
        self.mode
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            finalized_transcript: self.buffer.finalized(),
            interim_transcript: self.buffer.interim().to_string(),
            permission_denied: self.permission_denied,
            capture_active: self.capture_stream.is_some(),
            playback_active: self.utterance.is_some(),
            speech_rate: self.speech_rate,
            capabilities: self.capabilities,
        }
    }

    // ── Start / stop ─────────────────────────────────────────────────────────

    fn on_start(&mut self) {
        if self.mode.is_active() {
            self.settle(StartOutcome::AlreadyActive);
            return;
        }
        if self.starting.is_some() {
            // Joins the pending attempt.
            return;
        }
        if !self.capabilities.supports_voice_mode() {
            warn!(capabilities = ?self.capabilities, "voice mode unsupported on this platform");
            self.settle(StartOutcome::Unsupported);
            return;
        }
        if self.capabilities.permission_probe {
            let attempt = self.next_id();
            self.starting = Some(attempt);
            debug!(attempt, "requesting microphone permission");
            self.effects.push(Effect::RequestPermission { attempt });
            return;
        }
        self.begin_session();
        self.settle(StartOutcome::Started);
    }

    fn on_permission(&mut self, attempt: u64, outcome: PermissionOutcome) {
        if self.starting != Some(attempt) {
            debug!(attempt, "stale permission result ignored");
            return;
        }
        self.starting = None;

        match outcome {
            PermissionOutcome::Granted => {
                self.begin_session();
                self.settle(StartOutcome::Started);
            }
            PermissionOutcome::Denied => {
                warn!("microphone permission denied");
                self.set_permission_denied(true);
                self.settle(StartOutcome::PermissionDenied);
            }
            PermissionOutcome::NoDevice => {
                warn!("no microphone available");
                self.set_permission_denied(true);
                self.settle(StartOutcome::NoMicrophone);
            }
        }
    }

    fn begin_session(&mut self) {
        info!(language = %self.config.language, "voice mode started");
        self.set_permission_denied(false);
        self.buffer.clear();
        self.segmenter.reset();
        self.restart_failures = 0;
        self.set_mode(SessionMode::Listening);
        self.open_capture();
    }

    fn on_stop(&mut self) {
        if self.starting.take().is_some() {
            self.settle(StartOutcome::Cancelled);
        }
        if self.mode.is_active() {
            info!("voice mode stopped");
        }
        self.teardown();
    }

    /// Release everything and return to idle. Safe from any state.
    fn teardown(&mut self) {
        for kind in [
            TimerKind::Silence,
            TimerKind::Restart,
            TimerKind::Gap,
            TimerKind::KeepAlive,
        ] {
            self.disarm(kind);
        }
        self.close_capture(true);
        self.cancel_synthesis();
        self.playback.clear();
        self.clear_transcript();
        self.segmenter.reset();
        self.restart_failures = 0;
        self.set_mode(SessionMode::Idle);
    }

    // ── Capture ──────────────────────────────────────────────────────────────

    fn open_capture(&mut self) {
        if self.mode != SessionMode::Listening || self.capture_stream.is_some() {
            return;
        }
        let stream = self.next_id();
        self.capture_stream = Some(stream);
        self.stream_had_results = false;
        self.buffer.begin_stream();
        debug!(stream, "opening capture stream");
        self.effects.push(Effect::OpenCapture { stream });
    }

    fn close_capture(&mut self, abort: bool) {
        if let Some(stream) = self.capture_stream.take() {
            debug!(stream, abort, "closing capture stream");
            self.effects.push(Effect::CloseCapture { abort });
        }
    }

    fn on_recognition(&mut self, stream: u64, event: RecognitionEvent, now: Instant) {
        if self.capture_stream != Some(stream) {
            debug!(stream, "event from stale capture stream ignored");
            return;
        }

        match event {
            RecognitionEvent::Results {
                result_index,
                results,
            } => {
                if !results.is_empty() {
                    self.stream_had_results = true;
                    self.restart_failures = 0;
                }
                let changed = self.buffer.ingest(result_index, &results);
                self.segmenter.note_activity(now);
                self.arm(TimerKind::Silence, self.config.silence_threshold);
                if changed {
                    self.emit(SessionEvent::TranscriptUpdated {
                        finalized: self.buffer.finalized(),
                        interim: self.buffer.interim().to_string(),
                    });
                }
            }
            RecognitionEvent::SpeechStarted => {
                self.segmenter.note_activity(now);
                self.arm(TimerKind::Silence, self.config.silence_threshold);
            }
            RecognitionEvent::SpeechEnded => {
                self.arm(TimerKind::Silence, self.config.silence_threshold);
            }
            RecognitionEvent::Ended => {
                debug!(stream, "capture stream ended");
                self.close_capture(false);
                self.schedule_restart();
            }
            RecognitionEvent::Error(error) => {
                SessionDiagnostics::bump(&self.diagnostics.capture_faults);
                let recoverable = !error.is_fatal();
                self.emit(SessionEvent::CaptureFault {
                    kind: error.kind().to_string(),
                    recoverable,
                });
                if recoverable {
                    debug!(%error, "recoverable capture fault");
                    self.close_capture(true);
                    self.schedule_restart();
                } else {
                    warn!(%error, "capture fault ends the session");
                    self.set_permission_denied(true);
                    self.teardown();
                }
            }
        }
    }

    /// Reopen capture later, backing off while streams keep ending empty.
    fn schedule_restart(&mut self) {
        if self.mode != SessionMode::Listening {
            return;
        }
        if self.stream_had_results {
            self.restart_failures = 0;
        }
        let factor = 1u32 << self.restart_failures.min(16);
        let delay = self
            .config
            .restart_delay
            .saturating_mul(factor)
            .min(self.config.max_restart_delay);
        if !self.stream_had_results {
            self.restart_failures = self.restart_failures.saturating_add(1);
        }
        debug!(?delay, failures = self.restart_failures, "capture restart scheduled");
        self.arm(TimerKind::Restart, delay);
    }

    fn on_silence(&mut self, now: Instant) {
        if self.mode != SessionMode::Listening {
            return;
        }
        let text = self.buffer.utterance();
        match self.segmenter.decide(&text, now) {
            SegmentDecision::Dispatch => {
                info!(chars = text.chars().count(), "utterance finalized");
                SessionDiagnostics::bump(&self.diagnostics.utterances_dispatched);
                self.disarm(TimerKind::Restart);
                self.close_capture(true);
                self.clear_transcript();
                self.set_mode(SessionMode::Processing);
                self.emit(SessionEvent::UtteranceDispatched { text: text.clone() });
                self.effects.push(Effect::Dispatch(text));
            }
            SegmentDecision::Duplicate => {
                SessionDiagnostics::bump(&self.diagnostics.duplicates_suppressed);
                debug!("repeated utterance suppressed");
            }
            decision => debug!(?decision, "silence lapsed without dispatch"),
        }
    }

    // ── Playback ─────────────────────────────────────────────────────────────

    fn on_speak(&mut self, response: &str) {
        if !self.mode.is_active() {
            warn!("speak ignored while voice mode is off");
            return;
        }

        self.cancel_synthesis();
        self.disarm(TimerKind::Gap);
        self.disarm(TimerKind::KeepAlive);
        self.disarm(TimerKind::Silence);
        self.disarm(TimerKind::Restart);
        self.close_capture(true);
        self.clear_transcript();
        self.set_mode(SessionMode::Speaking);

        let total =
            self.playback
                .load(&self.cleanser, response, self.config.max_fragment_len);
        if total == 0 {
            debug!("response has nothing to speak");
            self.finish_playback();
            return;
        }

        info!(fragments = total, "speaking response");
        self.arm(TimerKind::KeepAlive, self.config.keep_alive_interval);
        self.speak_next();
    }

    fn speak_next(&mut self) {
        let Some(text) = self.playback.advance().map(str::to_owned) else {
            self.finish_playback();
            return;
        };

        let utterance = self.next_id();
        self.utterance = Some(utterance);
        let request = UtteranceRequest {
            rate: prosody::fragment_rate(self.speech_rate, &text),
            pitch: prosody::fragment_pitch(&text),
            volume: 1.0,
            lang: self.config.language.clone(),
            voice: None,
            text: text.clone(),
        };
        debug!(utterance, rate = request.rate, pitch = request.pitch, "fragment queued");
        self.effects.push(Effect::Speak { utterance, request });
        self.emit(SessionEvent::FragmentStarted {
            index: self.playback.position(),
            total: self.playback.total(),
            text,
        });
    }

    fn on_synthesis(&mut self, utterance: u64, outcome: SynthesisOutcome) {
        if self.utterance != Some(utterance) || self.mode != SessionMode::Speaking {
            debug!(utterance, "stale synthesis outcome ignored");
            return;
        }
        self.utterance = None;
        let spoken = self.playback.current().unwrap_or_default().to_string();

        match outcome {
            SynthesisOutcome::Finished => {
                SessionDiagnostics::bump(&self.diagnostics.fragments_spoken);
                self.after_fragment(&spoken);
            }
            SynthesisOutcome::Failed(SynthesisError::Interrupted | SynthesisError::Canceled) => {
                warn!(utterance, "fragment interrupted by the platform");
                self.finish_playback();
            }
            SynthesisOutcome::Failed(SynthesisError::Engine(message)) => {
                warn!(utterance, %message, "synthesis failed, skipping fragment");
                SessionDiagnostics::bump(&self.diagnostics.synthesis_errors);
                self.after_fragment(&spoken);
            }
        }
    }

    fn after_fragment(&mut self, spoken: &str) {
        if self.playback.has_pending() {
            self.arm(TimerKind::Gap, prosody::pause_after(spoken));
        } else {
            self.finish_playback();
        }
    }

    fn on_stop_speaking(&mut self) {
        if self.mode != SessionMode::Speaking {
            debug!(mode = %self.mode, "stop speaking ignored");
            return;
        }
        info!("playback interrupted");
        self.cancel_synthesis();
        self.finish_playback();
    }

    /// Leave `Speaking` and listen again right away.
    fn finish_playback(&mut self) {
        self.disarm(TimerKind::Gap);
        self.disarm(TimerKind::KeepAlive);
        self.playback.clear();
        self.segmenter.complete();
        self.clear_transcript();
        self.set_mode(SessionMode::Listening);
        self.open_capture();
    }

    fn cancel_synthesis(&mut self) {
        if let Some(utterance) = self.utterance.take() {
            debug!(utterance, "cancelling synthesis");
            self.effects.push(Effect::CancelSynthesis);
        }
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    fn arm(&mut self, kind: TimerKind, delay: Duration) {
        let token = self.next_id();
        self.timers.insert(kind, token);
        self.effects.push(Effect::ArmTimer { kind, token, delay });
    }

    fn disarm(&mut self, kind: TimerKind) {
        if self.timers.remove(&kind).is_some() {
            self.effects.push(Effect::CancelTimer { kind });
        }
    }

    fn on_timer(&mut self, kind: TimerKind, token: u64, now: Instant) {
        if self.timers.get(&kind) != Some(&token) {
            debug!(?kind, token, "stale timer ignored");
            return;
        }
        self.timers.remove(&kind);

        match kind {
            TimerKind::Silence => self.on_silence(now),
            TimerKind::Restart => {
                if self.mode == SessionMode::Listening && self.capture_stream.is_none() {
                    SessionDiagnostics::bump(&self.diagnostics.capture_restarts);
                    self.open_capture();
                }
            }
            TimerKind::Gap => {
                if self.mode == SessionMode::Speaking && self.utterance.is_none() {
                    self.speak_next();
                }
            }
            TimerKind::KeepAlive => {
                if self.mode == SessionMode::Speaking {
                    if self.utterance.is_some() {
                        self.effects.push(Effect::KeepAlive);
                    }
                    self.arm(TimerKind::KeepAlive, self.config.keep_alive_interval);
                }
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn set_mode(&mut self, mode: SessionMode) {
        if self.mode == mode {
            return;
        }
        let previous = std::mem::replace(&mut self.mode, mode);
        info!(from = %previous, to = %mode, "mode changed");
        self.emit(SessionEvent::ModeChanged { mode, previous });
    }

    fn set_permission_denied(&mut self, denied: bool) {
        if self.permission_denied != denied {
            self.permission_denied = denied;
            self.emit(SessionEvent::PermissionChanged { denied });
        }
    }

    fn clear_transcript(&mut self) {
        if !self.buffer.is_empty() {
            self.buffer.clear();
            self.emit(SessionEvent::TranscriptUpdated {
                finalized: String::new(),
                interim: String::new(),
            });
        }
    }

    fn settle(&mut self, outcome: StartOutcome) {
        self.effects.push(Effect::StartSettled(outcome));
    }

    fn emit(&mut self, event: SessionEvent) {
        self.effects.push(Effect::Emit(event));
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}
