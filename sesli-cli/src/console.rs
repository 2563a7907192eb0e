//! Line-based console platform.
//!
//! Typed lines play the part of recognized speech and spoken fragments are
//! printed, paced like real synthesis. Lines starting with `/` are console
//! commands and never reach the recognizer.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sesli_core::{
    MicrophonePermission, PermissionOutcome, RecognitionError, RecognitionEvent,
    RecognitionOptions, RecognitionResult, RecognitionSink, SpeechRecognizer, SpeechSynthesizer,
    SynthesisError, SynthesisSink, UtteranceRequest, VoiceInfo,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Commands typed at the console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    On,
    Off,
    Interrupt,
    Rate(f32),
    ClearPermission,
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().trim_start_matches('/').split_whitespace();
        let command = match parts.next()?.to_ascii_lowercase().as_str() {
            "on" | "start" => Self::On,
            "off" | "stop" => Self::Off,
            "sus" | "interrupt" | "skip" => Self::Interrupt,
            "rate" | "hiz" | "hız" => Self::Rate(parts.next()?.parse().ok()?),
            "izin" | "allow" => Self::ClearPermission,
            "status" | "durum" => Self::Status,
            "help" | "yardim" | "yardım" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            _ => return None,
        };
        Some(command)
    }
}

pub const HELP: &str = "\
commands:
  /on            start voice mode
  /off           stop voice mode
  /sus           interrupt the current reply
  /rate <0.5-2>  change speech rate
  /fault <kind>  simulate a capture fault (no-speech, aborted, not-allowed, audio-capture, network)
  /end           end the capture stream as a platform would
  /izin          clear the microphone-denied flag
  /status        print session state and counters
  /quit          exit";

// ---------------------------------------------------------------------------
// Recognizer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Stream {
    sink: Option<RecognitionSink>,
    results: Vec<RecognitionResult>,
}

/// Recognizer fed by the stdin reader.
#[derive(Clone, Default)]
pub struct ConsoleRecognizer {
    stream: Arc<Mutex<Stream>>,
}

impl ConsoleRecognizer {
    /// Treat `line` as one finalized phrase. Returns `false` if not listening.
    fn hear(&self, line: &str) -> bool {
        let mut stream = self.stream.lock();
        let Some(sink) = stream.sink.clone() else {
            return false;
        };
        stream.results.push(RecognitionResult::final_result(line));
        sink.emit(RecognitionEvent::SpeechStarted);
        sink.emit(RecognitionEvent::Results {
            result_index: stream.results.len() - 1,
            results: stream.results.clone(),
        });
        sink.emit(RecognitionEvent::SpeechEnded)
    }

    fn fault(&self, error: RecognitionError) -> bool {
        let sink = {
            let mut stream = self.stream.lock();
            stream.results.clear();
            stream.sink.take()
        };
        match sink {
            Some(sink) => {
                sink.emit(RecognitionEvent::Error(error));
                sink.emit(RecognitionEvent::Ended)
            }
            None => false,
        }
    }

    fn end(&self) -> bool {
        let sink = {
            let mut stream = self.stream.lock();
            stream.results.clear();
            stream.sink.take()
        };
        sink.is_some_and(|s| s.emit(RecognitionEvent::Ended))
    }
}

impl SpeechRecognizer for ConsoleRecognizer {
    fn start(
        &mut self,
        options: &RecognitionOptions,
        sink: RecognitionSink,
    ) -> Result<(), RecognitionError> {
        debug!(language = %options.language, "console capture open");
        let mut stream = self.stream.lock();
        stream.results.clear();
        stream.sink = Some(sink);
        println!("  🎙  listening…");
        Ok(())
    }

    fn abort(&mut self) {
        let mut stream = self.stream.lock();
        stream.results.clear();
        stream.sink = None;
    }
}

fn parse_fault(kind: &str) -> Option<RecognitionError> {
    let error = match kind.trim() {
        "no-speech" => RecognitionError::NoSpeech,
        "aborted" => RecognitionError::Aborted,
        "not-allowed" => RecognitionError::NotAllowed,
        "service-not-allowed" => RecognitionError::ServiceNotAllowed,
        "audio-capture" => RecognitionError::AudioCapture,
        "network" => RecognitionError::Network,
        _ => return None,
    };
    Some(error)
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

/// Prints fragments and finishes them after a reading-speed delay.
pub struct ConsoleSynthesizer {
    chars_per_second: f32,
    current: Option<(SynthesisSink, JoinHandle<()>)>,
}

impl ConsoleSynthesizer {
    pub fn new(chars_per_second: f32) -> Self {
        Self {
            chars_per_second,
            current: None,
        }
    }

    fn duration_for(&self, text: &str, rate: f32) -> Duration {
        let chars = text.chars().count() as f32;
        Duration::from_secs_f32(chars / (self.chars_per_second * rate.max(0.1)))
    }
}

impl SpeechSynthesizer for ConsoleSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![
            VoiceInfo::new("Console Yelda", "tr-TR", true),
            VoiceInfo::new("Console Samantha", "en-US", true),
            VoiceInfo::new("Console Anna", "de-DE", true),
        ]
    }

    fn speak(
        &mut self,
        request: UtteranceRequest,
        sink: SynthesisSink,
    ) -> Result<(), SynthesisError> {
        let voice = request
            .voice
            .as_ref()
            .map(|v| v.name.as_str())
            .unwrap_or("default");
        println!(
            "  🔊 {}   [{voice}, rate {:.2}, pitch {:.2}]",
            request.text, request.rate, request.pitch
        );

        let delay = self.duration_for(&request.text, request.rate);
        let finisher = sink.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            finisher.finish();
        });
        self.current = Some((sink, handle));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some((sink, handle)) = self.current.take() {
            handle.abort();
            sink.fail(SynthesisError::Canceled);
        }
    }

    fn pause(&mut self) {
        debug!("console synthesis paused");
    }

    fn resume(&mut self) {
        debug!("console synthesis resumed");
    }
}

// ---------------------------------------------------------------------------
// Permission
// ---------------------------------------------------------------------------

pub struct ConsolePermission(pub PermissionOutcome);

impl MicrophonePermission for ConsolePermission {
    fn request(&self) -> PermissionOutcome {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Stdin reader
// ---------------------------------------------------------------------------

/// Read stdin on a dedicated thread until EOF; speech goes to `recognizer`,
/// commands to the returned channel.
pub fn spawn_stdin_reader(recognizer: ConsoleRecognizer) -> mpsc::UnboundedReceiver<ConsoleCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(kind) = trimmed.strip_prefix("/fault") {
                match parse_fault(kind) {
                    Some(error) if recognizer.fault(error.clone()) => {
                        println!("  (simulated {})", error.kind());
                    }
                    Some(_) => println!("  (not listening)"),
                    None => println!("  unknown fault kind"),
                }
                continue;
            }
            if trimmed == "/end" {
                if !recognizer.end() {
                    println!("  (not listening)");
                }
                continue;
            }
            if trimmed.starts_with('/') {
                match ConsoleCommand::parse(trimmed) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    None => println!("  unknown command, try /help"),
                }
                continue;
            }

            if !recognizer.hear(trimmed) {
                println!("  (not listening, line ignored)");
            }
        }
        let _ = tx.send(ConsoleCommand::Quit);
    });
    rx
}
