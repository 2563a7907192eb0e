//! In-memory speech services driven by hand.
//!
//! Each service is a cheap clonable handle over shared state: hand one clone
//! to [`Platform`](super::Platform) and keep another to feed recognition
//! results, complete utterances and inspect what the session asked for.
//! Used by the test suite and by hosts rehearsing a flow without audio.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{
    MicrophonePermission, PermissionOutcome, RecognitionError, RecognitionEvent,
    RecognitionOptions, RecognitionResult, RecognitionSink, SpeechRecognizer, SpeechSynthesizer,
    SynthesisError, SynthesisSink, UtteranceRequest,
};
use crate::voice::VoiceInfo;

// ---------------------------------------------------------------------------
// Recognizer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecognizerState {
    sink: Option<RecognitionSink>,
    options: Option<RecognitionOptions>,
    results: Vec<RecognitionResult>,
    starts: usize,
    aborts: usize,
    fail_next_start: Option<RecognitionError>,
}

/// Recognizer whose result stream is fed by the caller.
///
/// Mirrors browser engines: results accumulate per stream, a trailing interim
/// entry is replaced by the next update, and aborting a stream fires a final
/// `Ended` through the (by then detached) sink.
#[derive(Clone, Default)]
pub struct ScriptedRecognizer {
    state: Arc<Mutex<RecognizerState>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the trailing interim entry (or append one).
    pub fn interim(&self, text: &str) -> bool {
        let mut state = self.state.lock();
        if state.results.last().is_some_and(|r| !r.is_final) {
            state.results.pop();
        }
        state.results.push(RecognitionResult::interim(text));
        Self::emit_results(&state)
    }

    /// Finalize `text`, replacing the trailing interim entry if present.
    pub fn final_result(&self, text: &str) -> bool {
        let mut state = self.state.lock();
        if state.results.last().is_some_and(|r| !r.is_final) {
            state.results.pop();
        }
        state.results.push(RecognitionResult::final_result(text));
        Self::emit_results(&state)
    }

    pub fn speech_started(&self) -> bool {
        self.emit(RecognitionEvent::SpeechStarted)
    }

    pub fn speech_ended(&self) -> bool {
        self.emit(RecognitionEvent::SpeechEnded)
    }

    /// End the stream spontaneously, as platforms do after a session limit.
    pub fn end_stream(&self) -> bool {
        let sink = {
            let mut state = self.state.lock();
            state.results.clear();
            state.sink.take()
        };
        sink.is_some_and(|s| s.emit(RecognitionEvent::Ended))
    }

    /// Report `error` followed by the end of the stream.
    pub fn fail(&self, error: RecognitionError) -> bool {
        let sink = {
            let mut state = self.state.lock();
            state.results.clear();
            state.sink.take()
        };
        match sink {
            Some(sink) => {
                let delivered = sink.emit(RecognitionEvent::Error(error));
                sink.emit(RecognitionEvent::Ended);
                delivered
            }
            None => false,
        }
    }

    /// Make the next `start()` call fail with `error`.
    pub fn fail_next_start(&self, error: RecognitionError) {
        self.state.lock().fail_next_start = Some(error);
    }

    /// A stream is open and its sink still attached.
    pub fn is_capturing(&self) -> bool {
        self.state
            .lock()
            .sink
            .as_ref()
            .is_some_and(RecognitionSink::is_attached)
    }

    pub fn starts(&self) -> usize {
        self.state.lock().starts
    }

    pub fn aborts(&self) -> usize {
        self.state.lock().aborts
    }

    pub fn last_options(&self) -> Option<RecognitionOptions> {
        self.state.lock().options.clone()
    }

    fn emit(&self, event: RecognitionEvent) -> bool {
        let state = self.state.lock();
        state.sink.as_ref().is_some_and(|s| s.emit(event))
    }

    fn emit_results(state: &RecognizerState) -> bool {
        let Some(sink) = state.sink.as_ref() else {
            return false;
        };
        let result_index = state.results.len().saturating_sub(1);
        sink.emit(RecognitionEvent::Results {
            result_index,
            results: state.results.clone(),
        })
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn start(
        &mut self,
        options: &RecognitionOptions,
        sink: RecognitionSink,
    ) -> Result<(), RecognitionError> {
        let mut state = self.state.lock();
        state.starts += 1;
        if let Some(error) = state.fail_next_start.take() {
            debug!(%error, "scripted recognizer refusing start");
            return Err(error);
        }
        state.options = Some(options.clone());
        state.results.clear();
        state.sink = Some(sink);
        Ok(())
    }

    fn abort(&mut self) {
        let sink = {
            let mut state = self.state.lock();
            state.aborts += 1;
            state.results.clear();
            state.sink.take()
        };
        if let Some(sink) = sink {
            sink.emit(RecognitionEvent::Ended);
        }
    }
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SynthesizerState {
    voices: Vec<VoiceInfo>,
    current: Option<SynthesisSink>,
    requests: Vec<UtteranceRequest>,
    cancels: usize,
    pauses: usize,
    resumes: usize,
    auto_finish: bool,
}

/// Synthesizer that records every request and completes utterances on demand.
#[derive(Clone, Default)]
pub struct ScriptedSynthesizer {
    state: Arc<Mutex<SynthesizerState>>,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_voices(voices: Vec<VoiceInfo>) -> Self {
        let synth = Self::default();
        synth.set_voices(voices);
        synth
    }

    /// Finish every utterance as soon as it is spoken.
    pub fn auto_finishing() -> Self {
        let synth = Self::default();
        synth.state.lock().auto_finish = true;
        synth
    }

    pub fn set_voices(&self, voices: Vec<VoiceInfo>) {
        self.state.lock().voices = voices;
    }

    /// Complete the utterance being spoken.
    pub fn finish_current(&self) -> bool {
        let sink = self.state.lock().current.take();
        sink.is_some_and(|s| s.finish())
    }

    /// Fail the utterance being spoken.
    pub fn fail_current(&self, error: SynthesisError) -> bool {
        let sink = self.state.lock().current.take();
        sink.is_some_and(|s| s.fail(error))
    }

    /// An utterance is in flight and its sink still attached.
    pub fn is_speaking(&self) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(SynthesisSink::is_attached)
    }

    pub fn requests(&self) -> Vec<UtteranceRequest> {
        self.state.lock().requests.clone()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|r| r.text.clone())
            .collect()
    }

    pub fn cancels(&self) -> usize {
        self.state.lock().cancels
    }

    pub fn pauses(&self) -> usize {
        self.state.lock().pauses
    }

    pub fn resumes(&self) -> usize {
        self.state.lock().resumes
    }
}

impl SpeechSynthesizer for ScriptedSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        self.state.lock().voices.clone()
    }

    fn speak(
        &mut self,
        request: UtteranceRequest,
        sink: SynthesisSink,
    ) -> Result<(), SynthesisError> {
        let mut state = self.state.lock();
        state.requests.push(request);
        if state.auto_finish {
            sink.finish();
        } else {
            state.current = Some(sink);
        }
        Ok(())
    }

    fn cancel(&mut self) {
        let sink = {
            let mut state = self.state.lock();
            state.cancels += 1;
            state.current.take()
        };
        if let Some(sink) = sink {
            sink.fail(SynthesisError::Canceled);
        }
    }

    fn pause(&mut self) {
        self.state.lock().pauses += 1;
    }

    fn resume(&mut self) {
        self.state.lock().resumes += 1;
    }
}

// ---------------------------------------------------------------------------
// Permission
// ---------------------------------------------------------------------------

/// Permission probe answering with a fixed outcome that can be changed later.
#[derive(Clone)]
pub struct ScriptedPermission {
    outcome: Arc<Mutex<PermissionOutcome>>,
    requests: Arc<Mutex<usize>>,
}

impl ScriptedPermission {
    pub fn new(outcome: PermissionOutcome) -> Self {
        Self {
            outcome: Arc::new(Mutex::new(outcome)),
            requests: Arc::new(Mutex::new(0)),
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionOutcome::Granted)
    }

    pub fn set_outcome(&self, outcome: PermissionOutcome) {
        *self.outcome.lock() = outcome;
    }

    pub fn requests(&self) -> usize {
        *self.requests.lock()
    }
}

impl MicrophonePermission for ScriptedPermission {
    fn request(&self) -> PermissionOutcome {
        *self.requests.lock() += 1;
        *self.outcome.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::machine::Input;
    use tokio::sync::mpsc;

    fn options() -> RecognitionOptions {
        RecognitionOptions {
            language: "tr-TR".into(),
            continuous: true,
            interim_results: true,
        }
    }

    #[test]
    fn results_accumulate_and_interim_is_replaced() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut recognizer = ScriptedRecognizer::new();
        let handle = recognizer.clone();
        recognizer
            .start(&options(), RecognitionSink::new(1, tx))
            .expect("start");

        assert!(handle.interim("mer"));
        assert!(handle.final_result("merhaba"));
        assert!(handle.interim("nasıl"));

        let mut last = None;
        while let Ok(Input::Recognition { event, .. }) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(RecognitionEvent::Results {
                result_index: 1,
                results: vec![
                    RecognitionResult::final_result("merhaba"),
                    RecognitionResult::interim("nasıl"),
                ],
            })
        );
    }

    #[test]
    fn abort_closes_stream_and_counts() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut recognizer = ScriptedRecognizer::new();
        recognizer
            .start(&options(), RecognitionSink::new(1, tx))
            .expect("start");
        assert!(recognizer.is_capturing());
        recognizer.abort();
        assert!(!recognizer.is_capturing());
        assert_eq!(recognizer.aborts(), 1);
        assert!(!recognizer.interim("ignored"));
    }

    #[test]
    fn failing_start_is_reported_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut recognizer = ScriptedRecognizer::new();
        recognizer.fail_next_start(RecognitionError::Network);
        assert_eq!(
            recognizer.start(&options(), RecognitionSink::new(1, tx.clone())),
            Err(RecognitionError::Network)
        );
        assert!(recognizer
            .start(&options(), RecognitionSink::new(2, tx))
            .is_ok());
        assert_eq!(recognizer.starts(), 2);
    }

    #[test]
    fn synthesizer_records_and_finishes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut synth = ScriptedSynthesizer::new();
        let request = UtteranceRequest {
            text: "Merhaba".into(),
            lang: "tr-TR".into(),
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        };
        synth
            .speak(request, SynthesisSink::new(9, tx))
            .expect("speak");
        assert!(synth.is_speaking());
        assert!(synth.finish_current());
        assert!(!synth.is_speaking());
        assert_eq!(synth.spoken_texts(), vec!["Merhaba"]);
        assert!(matches!(
            rx.try_recv(),
            Ok(Input::Synthesis { utterance: 9, .. })
        ));
    }
}
