//! Control task: runs the session machine and performs its effects.
//!
//! One task owns the machine and every platform handle. Host commands arrive
//! on one channel; platform callbacks, timer expiries and permission results
//! arrive on another. Both are drained strictly one input at a time, so
//! transitions never interleave.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Span};

use super::machine::{Effect, Input, SessionMachine, StartOutcome, TimerKind};
use super::SessionConfig;
use crate::error::{Result, SesliError};
use crate::ipc::events::{SessionEvent, SessionMode, SessionSnapshot};
use crate::platform::{
    MicrophonePermission, PermissionOutcome, Platform, RecognitionError, RecognitionEvent,
    RecognitionOptions, RecognitionSink, SpeechRecognizer, SpeechSynthesizer, SynthesisError,
    SynthesisOutcome, SynthesisSink,
};
use crate::voice::select_voice_preferring;

/// Host callback receiving each finalized utterance.
pub(crate) type TranscriptCallback = Box<dyn Fn(String) + Send + Sync>;

pub(crate) enum Message {
    Start(oneshot::Sender<Result<()>>),
    Input(Input),
    Shutdown(Option<oneshot::Sender<()>>),
}

pub(crate) struct Driver {
    machine: SessionMachine,
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    synthesizer: Option<Box<dyn SpeechSynthesizer>>,
    permission: Option<Arc<dyn MicrophonePermission>>,
    recognition_options: RecognitionOptions,
    preferred_voice: Option<String>,

    commands: mpsc::UnboundedReceiver<Message>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs: mpsc::UnboundedReceiver<Input>,

    capture_sink: Option<RecognitionSink>,
    synthesis_sink: Option<SynthesisSink>,
    timers: HashMap<TimerKind, JoinHandle<()>>,
    pending_starts: Vec<oneshot::Sender<Result<()>>>,
    /// Span of the turn in progress, from dispatch until voice mode ends.
    turn_span: Option<Span>,
    turns: u64,

    on_transcript: TranscriptCallback,
    events_tx: broadcast::Sender<SessionEvent>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
}

impl Driver {
    pub(crate) fn new(
        config: &SessionConfig,
        machine: SessionMachine,
        platform: Platform,
        commands: mpsc::UnboundedReceiver<Message>,
        on_transcript: TranscriptCallback,
        events_tx: broadcast::Sender<SessionEvent>,
        snapshot: Arc<Mutex<SessionSnapshot>>,
    ) -> Self {
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        let Platform {
            recognizer,
            synthesizer,
            permission,
        } = platform;

        Self {
            machine,
            recognizer,
            synthesizer,
            permission,
            recognition_options: RecognitionOptions {
                language: config.language.clone(),
                continuous: true,
                interim_results: true,
            },
            preferred_voice: config.preferred_voice.clone(),
            commands,
            inputs_tx,
            inputs,
            capture_sink: None,
            synthesis_sink: None,
            timers: HashMap::new(),
            pending_starts: Vec::new(),
            turn_span: None,
            turns: 0,
            on_transcript,
            events_tx,
            snapshot,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("session control task started");
        loop {
            let input = tokio::select! {
                biased;
                message = self.commands.recv() => match message {
                    Some(Message::Start(reply)) => {
                        self.pending_starts.push(reply);
                        Input::Start
                    }
                    Some(Message::Input(input)) => input,
                    Some(Message::Shutdown(reply)) => {
                        self.shutdown();
                        if let Some(reply) = reply {
                            let _ = reply.send(());
                        }
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(input) = self.inputs.recv() => input,
            };
            self.process(input);
        }
        debug!("session control task finished");
    }

    /// Feed `input` and every follow-up it causes through the machine.
    fn process(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            let span = self.turn_span.clone().unwrap_or_else(Span::none);
            let _enter = span.enter();

            let effects = self.machine.handle(input, Instant::now());
            *self.snapshot.lock() = self.machine.snapshot();
            if self.machine.mode() == SessionMode::Idle {
                self.turn_span = None;
            }
            for effect in effects {
                if let Some(follow_up) = self.apply(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    fn apply(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::RequestPermission { attempt } => {
                self.request_permission(attempt);
                None
            }
            Effect::OpenCapture { stream } => self.open_capture(stream),
            Effect::CloseCapture { abort } => {
                if let Some(sink) = self.capture_sink.take() {
                    sink.detach();
                }
                if abort {
                    if let Some(recognizer) = self.recognizer.as_mut() {
                        recognizer.abort();
                    }
                }
                None
            }
            Effect::Speak {
                utterance,
                mut request,
            } => {
                let Some(synthesizer) = self.synthesizer.as_mut() else {
                    return Some(Input::Synthesis {
                        utterance,
                        outcome: SynthesisOutcome::Failed(SynthesisError::Engine(
                            "no synthesizer".into(),
                        )),
                    });
                };
                // Voice lists load lazily on most engines; query per fragment.
                let voices = synthesizer.voices();
                request.voice = select_voice_preferring(
                    &voices,
                    &request.lang,
                    self.preferred_voice.as_deref(),
                )
                .cloned();

                let sink = SynthesisSink::new(utterance, self.inputs_tx.clone());
                self.synthesis_sink = Some(sink.clone());
                match synthesizer.speak(request, sink) {
                    Ok(()) => None,
                    Err(error) => {
                        if let Some(sink) = self.synthesis_sink.take() {
                            sink.detach();
                        }
                        Some(Input::Synthesis {
                            utterance,
                            outcome: SynthesisOutcome::Failed(error),
                        })
                    }
                }
            }
            Effect::CancelSynthesis => {
                if let Some(sink) = self.synthesis_sink.take() {
                    sink.detach();
                }
                if let Some(synthesizer) = self.synthesizer.as_mut() {
                    synthesizer.cancel();
                }
                None
            }
            Effect::KeepAlive => {
                if let Some(synthesizer) = self.synthesizer.as_mut() {
                    debug!("synthesis keep-alive");
                    synthesizer.pause();
                    synthesizer.resume();
                }
                None
            }
            Effect::ArmTimer { kind, token, delay } => {
                let tx = self.inputs_tx.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Input::Timer { kind, token });
                });
                if let Some(previous) = self.timers.insert(kind, handle) {
                    previous.abort();
                }
                None
            }
            Effect::CancelTimer { kind } => {
                if let Some(handle) = self.timers.remove(&kind) {
                    handle.abort();
                }
                None
            }
            Effect::Dispatch(text) => {
                self.turns += 1;
                let span = info_span!("turn", turn = self.turns);
                span.in_scope(|| debug!(chars = text.chars().count(), "utterance handed to host"));
                self.turn_span = Some(span);
                (self.on_transcript)(text);
                None
            }
            Effect::StartSettled(outcome) => {
                for reply in self.pending_starts.drain(..) {
                    let _ = reply.send(start_result(outcome));
                }
                None
            }
            Effect::Emit(event) => {
                let _ = self.events_tx.send(event);
                None
            }
        }
    }

    fn open_capture(&mut self, stream: u64) -> Option<Input> {
        let sink = RecognitionSink::new(stream, self.inputs_tx.clone());
        let started = match self.recognizer.as_mut() {
            Some(recognizer) => recognizer.start(&self.recognition_options, sink.clone()),
            None => Err(RecognitionError::StartFailed("no recognizer".into())),
        };
        match started {
            Ok(()) => {
                self.capture_sink = Some(sink);
                None
            }
            Err(error) => {
                warn!(%error, stream, "capture stream failed to open");
                sink.detach();
                Some(Input::Recognition {
                    stream,
                    event: RecognitionEvent::Error(error),
                })
            }
        }
    }

    /// The prompt may block, so it runs on the blocking pool; the answer comes
    /// back as an ordinary input.
    fn request_permission(&self, attempt: u64) {
        // Only requested when the platform probed with a permission service.
        if let Some(permission) = self.permission.clone() {
            let tx = self.inputs_tx.clone();
            tokio::spawn(async move {
                let outcome = match tokio::task::spawn_blocking(move || permission.request()).await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("permission probe failed ({e}), treating as denied");
                        PermissionOutcome::Denied
                    }
                };
                let _ = tx.send(Input::PermissionResolved { attempt, outcome });
            });
        }
    }

    fn shutdown(&mut self) {
        self.process(Input::Stop);
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        for reply in self.pending_starts.drain(..) {
            let _ = reply.send(Err(SesliError::SessionClosed));
        }
    }
}

fn start_result(outcome: StartOutcome) -> Result<()> {
    match outcome {
        StartOutcome::Started | StartOutcome::AlreadyActive => Ok(()),
        StartOutcome::PermissionDenied => Err(SesliError::PermissionDenied),
        StartOutcome::NoMicrophone => Err(SesliError::NoMicrophone),
        StartOutcome::Unsupported => Err(SesliError::Unsupported),
        StartOutcome::Cancelled => Err(SesliError::Cancelled),
    }
}
