use std::time::Duration;

use sesli_core::platform::scripted::{ScriptedPermission, ScriptedRecognizer, ScriptedSynthesizer};
use sesli_core::{
    PermissionOutcome, Platform, RecognitionError, SessionConfig, SessionEvent, SessionMode,
    SesliError, SynthesisError, VoiceInfo, VoiceSession,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(30);

struct Harness {
    session: VoiceSession,
    recognizer: ScriptedRecognizer,
    synth: ScriptedSynthesizer,
    permission: ScriptedPermission,
    transcripts: mpsc::UnboundedReceiver<String>,
    events: broadcast::Receiver<SessionEvent>,
    modes: Vec<SessionMode>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let recognizer = ScriptedRecognizer::new();
        let synth = ScriptedSynthesizer::new();
        let permission = ScriptedPermission::granted();
        let platform = Platform::new()
            .with_recognizer(recognizer.clone())
            .with_synthesizer(synth.clone())
            .with_permission(permission.clone());

        let (tx, transcripts) = mpsc::unbounded_channel();
        let session = VoiceSession::spawn(config, platform, move |text| {
            let _ = tx.send(text);
        });
        let events = session.subscribe_events();

        Self {
            session,
            recognizer,
            synth,
            permission,
            transcripts,
            events,
            modes: Vec::new(),
        }
    }

    async fn start(&mut self) {
        self.session.start_voice_mode().await.expect("start voice mode");
        assert!(self.recognizer.is_capturing());
    }

    async fn next_event(&mut self) -> SessionEvent {
        let event = recv_event_with_timeout(&mut self.events, WAIT).await;
        if let SessionEvent::ModeChanged { mode, .. } = &event {
            self.modes.push(*mode);
        }
        event
    }

    async fn wait_for_mode(&mut self, wanted: SessionMode) {
        loop {
            if let SessionEvent::ModeChanged { mode, .. } = self.next_event().await {
                if mode == wanted {
                    return;
                }
            }
        }
    }

    async fn wait_for_fragment(&mut self) -> String {
        loop {
            if let SessionEvent::FragmentStarted { text, .. } = self.next_event().await {
                return text;
            }
        }
    }

    async fn next_transcript(&mut self) -> String {
        timeout(WAIT, self.transcripts.recv())
            .await
            .expect("timed out waiting for transcript")
            .expect("transcript channel closed")
    }

    /// Say `text`, let the silence threshold pass, return the dispatched text.
    async fn say(&mut self, text: &str) -> String {
        assert!(self.recognizer.final_result(text), "capture is not open");
        self.next_transcript().await
    }

    fn assert_exclusive(&self) {
        assert!(
            !(self.recognizer.is_capturing() && self.synth.is_speaking()),
            "capture and playback active together"
        );
    }
}

async fn recv_event_with_timeout(
    rx: &mut broadcast::Receiver<SessionEvent>,
    wait: Duration,
) -> SessionEvent {
    let deadline = Instant::now() + wait;
    loop {
        match timeout(deadline.saturating_duration_since(Instant::now()), rx.recv()).await {
            Ok(Ok(event)) => return event,
            Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) => panic!("event channel closed unexpectedly"),
            Err(_) => panic!("timed out waiting for session event"),
        }
    }
}

fn short_fragments() -> SessionConfig {
    SessionConfig {
        max_fragment_len: 20,
        ..SessionConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn permission_denied_keeps_session_idle() {
    let mut h = Harness::new(SessionConfig::default());
    h.permission.set_outcome(PermissionOutcome::Denied);

    let err = h.session.start_voice_mode().await.expect_err("start must fail");
    assert!(matches!(err, SesliError::PermissionDenied));
    assert_eq!(h.session.mode(), SessionMode::Idle);
    assert!(h.session.permission_denied());
    assert_eq!(h.recognizer.starts(), 0);

    sleep(Duration::from_secs(5)).await;
    assert!(h.transcripts.try_recv().is_err());

    h.session.clear_permission_denied().expect("clear");
    loop {
        if let SessionEvent::PermissionChanged { denied: false } = h.next_event().await {
            break;
        }
    }
    assert!(!h.session.permission_denied());

    h.permission.set_outcome(PermissionOutcome::Granted);
    h.start().await;
    assert_eq!(h.permission.requests(), 2);
    assert_eq!(h.session.mode(), SessionMode::Listening);
}

#[tokio::test(start_paused = true)]
async fn missing_microphone_is_reported_separately() {
    let h = Harness::new(SessionConfig::default());
    h.permission.set_outcome(PermissionOutcome::NoDevice);
    let err = h.session.start_voice_mode().await.expect_err("start must fail");
    assert!(matches!(err, SesliError::NoMicrophone));
    assert!(h.session.permission_denied());
}

#[tokio::test(start_paused = true)]
async fn silence_dispatches_accumulated_utterance_once() {
    let mut h = Harness::new(SessionConfig::default());
    h.start().await;

    assert!(h.recognizer.interim("merhaba"));
    assert!(h.recognizer.final_result("merhaba nasılsın"));

    assert_eq!(h.next_transcript().await, "merhaba nasılsın");
    assert_eq!(h.session.mode(), SessionMode::Processing);
    assert!(!h.recognizer.is_capturing());

    sleep(Duration::from_secs(10)).await;
    assert!(h.transcripts.try_recv().is_err());
    assert_eq!(h.session.diagnostics_snapshot().utterances_dispatched, 1);
}

#[tokio::test(start_paused = true)]
async fn speech_pauses_shorter_than_threshold_do_not_split_the_utterance() {
    let mut h = Harness::new(SessionConfig::default());
    h.start().await;

    assert!(h.recognizer.final_result("yarın"));
    sleep(Duration::from_millis(1_000)).await;
    assert!(h.recognizer.speech_started());
    assert!(h.recognizer.final_result("saat üçte"));

    assert_eq!(h.next_transcript().await, "yarın saat üçte");
}

#[tokio::test(start_paused = true)]
async fn repeated_utterance_is_suppressed() {
    let mut h = Harness::new(SessionConfig::default());
    h.start().await;
    assert_eq!(h.say("tamam").await, "tamam");

    h.session.speak("Peki.").expect("speak");
    h.wait_for_fragment().await;
    assert!(h.synth.finish_current());
    h.wait_for_mode(SessionMode::Listening).await;

    assert!(h.recognizer.final_result("tamam"));
    sleep(Duration::from_secs(5)).await;
    assert!(h.transcripts.try_recv().is_err());
    assert_eq!(h.session.mode(), SessionMode::Listening);
    assert_eq!(h.session.diagnostics_snapshot().duplicates_suppressed, 1);
}

#[tokio::test(start_paused = true)]
async fn reply_is_cleansed_chunked_and_capture_resumes() {
    let mut h = Harness::new(short_fragments());
    h.start().await;
    h.say("bir tablo göster").await;

    h.session
        .speak("Çok **uzun** bir | tablo | olmayan | yanıt. İkinci cümle burada!")
        .expect("speak");

    let expected = ["Çok uzun bir tablo", "olmayan yanıt.", "İkinci cümle burada!"];
    for fragment in expected {
        assert_eq!(h.wait_for_fragment().await, fragment);
        assert_eq!(h.session.mode(), SessionMode::Speaking);
        h.assert_exclusive();
        assert!(!h.recognizer.is_capturing());
        assert!(h.synth.finish_current());
    }

    h.wait_for_mode(SessionMode::Listening).await;
    assert!(h.recognizer.is_capturing());
    assert_eq!(
        h.modes,
        vec![
            SessionMode::Listening,
            SessionMode::Processing,
            SessionMode::Speaking,
            SessionMode::Listening,
        ]
    );

    let requests = h.synth.requests();
    assert_eq!(h.synth.spoken_texts(), expected);
    assert!(requests.iter().all(|r| r.lang == "tr-TR"));
    assert!((requests[2].pitch - 1.05).abs() < 1e-6);
    assert!((requests[0].rate - 1.05).abs() < 1e-6);
    assert_eq!(h.session.diagnostics_snapshot().fragments_spoken, 3);
}

#[tokio::test(start_paused = true)]
async fn fragments_wait_for_the_punctuation_pause() {
    let mut h = Harness::new(short_fragments());
    h.start().await;
    h.say("anlat").await;

    h.session.speak("Birinci cümle. İkinci cümle.").expect("speak");
    h.wait_for_fragment().await;
    assert!(h.synth.finish_current());

    sleep(Duration::from_millis(350)).await;
    assert_eq!(h.synth.requests().len(), 1);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.synth.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_speaking_resumes_capture_immediately() {
    let mut h = Harness::new(SessionConfig::default());
    h.start().await;
    h.say("uzun bir cevap ver").await;

    h.session.speak("Bu cevap uzun sürecek.").expect("speak");
    h.wait_for_fragment().await;

    sleep(Duration::from_secs(25)).await;
    assert_eq!(h.synth.pauses(), 2);
    assert_eq!(h.synth.resumes(), 2);

    let before = Instant::now();
    h.session.stop_speaking();
    h.wait_for_mode(SessionMode::Listening).await;
    assert!(before.elapsed() < Duration::from_millis(50));
    assert!(h.recognizer.is_capturing());
    assert!(!h.synth.is_speaking());
    assert_eq!(h.synth.cancels(), 1);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.synth.pauses(), 2, "keep-alive must stop with playback");
}

#[tokio::test(start_paused = true)]
async fn synthesis_error_skips_to_next_fragment() {
    let mut h = Harness::new(short_fragments());
    h.start().await;
    h.say("devam").await;

    h.session.speak("Birinci cümle. İkinci cümle.").expect("speak");
    h.wait_for_fragment().await;
    assert!(h.synth.fail_current(SynthesisError::Engine("audio sink lost".into())));

    assert_eq!(h.wait_for_fragment().await, "İkinci cümle.");
    assert!(h.synth.finish_current());
    h.wait_for_mode(SessionMode::Listening).await;

    let diag = h.session.diagnostics_snapshot();
    assert_eq!(diag.synthesis_errors, 1);
    assert_eq!(diag.fragments_spoken, 1);
}

#[tokio::test(start_paused = true)]
async fn empty_reply_goes_straight_back_to_listening() {
    let mut h = Harness::new(SessionConfig::default());
    h.start().await;
    h.say("sorgu çalıştır").await;

    h.session.speak("<data>{\"rows\":[]}</data>").expect("speak");
    h.wait_for_mode(SessionMode::Speaking).await;
    h.wait_for_mode(SessionMode::Listening).await;
    assert!(h.synth.requests().is_empty());
    assert!(h.recognizer.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn stop_voice_mode_is_idempotent_and_releases_everything() {
    let mut h = Harness::new(SessionConfig::default());
    h.session.stop_voice_mode();
    h.session.stop_voice_mode();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.session.mode(), SessionMode::Idle);

    h.start().await;
    h.say("merhaba").await;
    h.session.speak("Merhaba, size nasıl yardımcı olabilirim?").expect("speak");
    h.wait_for_fragment().await;

    h.session.stop_voice_mode();
    h.session.stop_voice_mode();
    h.wait_for_mode(SessionMode::Idle).await;
    assert!(!h.recognizer.is_capturing());
    assert!(!h.synth.is_speaking());
    assert_eq!(h.synth.cancels(), 1);
    assert!(!h.synth.finish_current());

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.session.mode(), SessionMode::Idle);
    assert_eq!(h.synth.pauses(), 0);

    h.start().await;
    assert_eq!(h.session.mode(), SessionMode::Listening);
}

#[tokio::test(start_paused = true)]
async fn recoverable_fault_restarts_capture_and_keeps_turn_text() {
    let mut h = Harness::new(SessionConfig::default());
    h.start().await;

    assert!(h.recognizer.final_result("birinci kısım"));
    assert!(h.recognizer.fail(RecognitionError::NoSpeech));
    loop {
        if let SessionEvent::CaptureFault { kind, recoverable } = h.next_event().await {
            assert_eq!(kind, "no-speech");
            assert!(recoverable);
            break;
        }
    }

    sleep(Duration::from_millis(400)).await;
    assert_eq!(h.recognizer.starts(), 2);
    assert!(h.recognizer.is_capturing());

    assert_eq!(h.say("ikinci kısım").await, "birinci kısım ikinci kısım");
    assert!(!h.session.permission_denied());
}

#[tokio::test(start_paused = true)]
async fn spontaneous_stream_end_restarts_with_backoff() {
    let h = Harness::new(SessionConfig::default());
    h.session.start_voice_mode().await.expect("start");

    assert!(h.recognizer.end_stream());
    sleep(Duration::from_millis(350)).await;
    assert_eq!(h.recognizer.starts(), 2);

    assert!(h.recognizer.end_stream());
    sleep(Duration::from_millis(350)).await;
    assert_eq!(h.recognizer.starts(), 2, "second restart waits twice as long");
    sleep(Duration::from_millis(300)).await;
    assert_eq!(h.recognizer.starts(), 3);
    assert_eq!(h.session.diagnostics_snapshot().capture_restarts, 2);
}

#[tokio::test(start_paused = true)]
async fn unfinalized_speech_survives_a_stream_end() {
    let mut h = Harness::new(SessionConfig::default());
    h.start().await;

    assert!(h.recognizer.interim("merhaba nasılsın"));
    assert!(h.recognizer.end_stream());

    sleep(Duration::from_millis(400)).await;
    assert_eq!(h.recognizer.starts(), 2);
    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.finalized_transcript, "merhaba nasılsın");
    assert_eq!(snapshot.interim_transcript, "");

    assert_eq!(h.next_transcript().await, "merhaba nasılsın");
    assert_eq!(h.session.mode(), SessionMode::Processing);
}

#[tokio::test(start_paused = true)]
async fn fatal_fault_ends_session_without_restart() {
    let mut h = Harness::new(SessionConfig::default());
    h.start().await;

    assert!(h.recognizer.fail(RecognitionError::AudioCapture));
    h.wait_for_mode(SessionMode::Idle).await;
    assert!(h.session.permission_denied());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.recognizer.starts(), 1);
    assert!(!h.recognizer.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn voices_are_requeried_for_every_fragment() {
    let mut h = Harness::new(short_fragments());
    h.synth
        .set_voices(vec![VoiceInfo::new("Samantha", "en-US", true)]);
    h.start().await;
    h.say("oku").await;

    h.session.speak("Birinci cümle. İkinci cümle.").expect("speak");
    h.wait_for_fragment().await;
    h.synth.set_voices(vec![
        VoiceInfo::new("Samantha", "en-US", true),
        VoiceInfo::new("Yelda", "tr-TR", true),
    ]);
    assert!(h.synth.finish_current());
    h.wait_for_fragment().await;

    let requests = h.synth.requests();
    assert!(requests[0].voice.is_none());
    assert_eq!(
        requests[1].voice.as_ref().map(|v| v.name.as_str()),
        Some("Yelda")
    );
}

#[tokio::test(start_paused = true)]
async fn speech_rate_applies_from_next_fragment() {
    let mut h = Harness::new(short_fragments());
    h.start().await;
    h.say("yavaş konuş").await;

    h.session.speak("Birinci cümle. İkinci cümle.").expect("speak");
    h.wait_for_fragment().await;
    h.session.set_speech_rate(0.1).expect("rate");
    assert!(h.synth.finish_current());
    h.wait_for_fragment().await;

    let requests = h.synth.requests();
    assert!((requests[0].rate - 1.05).abs() < 1e-6);
    assert!((requests[1].rate - 0.525).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn unsupported_platform_refuses_to_start() {
    let session = VoiceSession::spawn(
        SessionConfig::default(),
        Platform::new().with_recognizer(ScriptedRecognizer::new()),
        |_| {},
    );
    assert!(!session.is_supported());
    assert!(!session.snapshot().is_supported());
    let err = session.start_voice_mode().await.expect_err("unsupported");
    assert!(matches!(err, SesliError::Unsupported));
    assert_eq!(session.mode(), SessionMode::Idle);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_session() {
    let mut h = Harness::new(SessionConfig::default());
    h.start().await;
    h.session.shutdown().await;

    assert!(!h.recognizer.is_capturing());
    let err = h.session.start_voice_mode().await.expect_err("closed");
    assert!(matches!(err, SesliError::SessionClosed));
    assert!(matches!(
        h.session.speak("geç kaldı"),
        Err(SesliError::SessionClosed)
    ));
}
