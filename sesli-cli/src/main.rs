//! Sesli rehearsal console.
//!
//! Runs a voice session against a line-based console platform: type a line
//! to "say" it, watch the reply being spoken fragment by fragment, and type
//! `/help` for commands.

mod console;
mod responder;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use console::{ConsoleCommand, ConsolePermission, ConsoleRecognizer, ConsoleSynthesizer};
use sesli_core::{PermissionOutcome, Platform, SesliError, SessionEvent, VoiceSession};
use settings::{default_settings_path, load_settings, normalize_language, save_settings};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "sesli", version, about = "Half-duplex voice conversation console")]
struct Cli {
    /// Settings file (defaults to the per-user app data directory).
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Recognition and synthesis language, e.g. tr-TR or en.
    #[arg(short, long)]
    language: Option<String>,

    /// Base speech rate between 0.5 and 2.0.
    #[arg(long)]
    rate: Option<f32>,

    /// Simulate a denied microphone permission.
    #[arg(long, conflicts_with = "no_mic")]
    deny_mic: bool,

    /// Simulate a machine with no capture device.
    #[arg(long)]
    no_mic: bool,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save_settings: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sesli=info,sesli_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();
    if let Some(language) = cli.language.as_deref() {
        settings.language = normalize_language(language);
    }
    if let Some(rate) = cli.rate {
        settings.speech_rate = rate;
    }
    settings.normalize();
    if cli.save_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
    }

    let permission = if cli.deny_mic {
        PermissionOutcome::Denied
    } else if cli.no_mic {
        PermissionOutcome::NoDevice
    } else {
        PermissionOutcome::Granted
    };
    let recognizer = ConsoleRecognizer::default();
    let platform = Platform::new()
        .with_recognizer(recognizer.clone())
        .with_synthesizer(ConsoleSynthesizer::new(settings.chars_per_second))
        .with_permission(ConsolePermission(permission));

    let (utterance_tx, mut utterances) = mpsc::unbounded_channel::<String>();
    let session = Arc::new(VoiceSession::spawn(
        settings.session_config(),
        platform,
        move |text| {
            let _ = utterance_tx.send(text);
        },
    ));
    let mut events = session.subscribe_events();
    let mut commands = console::spawn_stdin_reader(recognizer);

    println!("{}", console::HELP);
    start(&session).await;

    let response_delay = Duration::from_millis(settings.response_delay_ms);
    let mut turn = 0usize;
    loop {
        tokio::select! {
            Some(text) = utterances.recv() => {
                turn += 1;
                println!("  ✉  \"{text}\"");
                let session = Arc::clone(&session);
                let language = settings.language.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(response_delay).await;
                    let reply = responder::compose_reply(&text, turn, &language);
                    if let Err(e) = session.speak(reply) {
                        warn!("reply dropped: {e}");
                    }
                });
            }
            command = commands.recv() => {
                match command.unwrap_or(ConsoleCommand::Quit) {
                    ConsoleCommand::Quit => break,
                    ConsoleCommand::On => start(&session).await,
                    ConsoleCommand::Off => session.stop_voice_mode(),
                    ConsoleCommand::Interrupt => session.stop_speaking(),
                    ConsoleCommand::Rate(rate) => {
                        if let Err(e) = session.set_speech_rate(rate) {
                            warn!("rate change failed: {e}");
                        }
                    }
                    ConsoleCommand::ClearPermission => {
                        if let Err(e) = session.clear_permission_denied() {
                            warn!("could not clear permission flag: {e}");
                        }
                    }
                    ConsoleCommand::Status => print_status(&session)?,
                    ConsoleCommand::Help => println!("{}", console::HELP),
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    let diagnostics = session.diagnostics_snapshot();
    info!(?diagnostics, "session closed");
    Ok(())
}

async fn start(session: &VoiceSession) {
    match session.start_voice_mode().await {
        Ok(()) => {}
        Err(SesliError::PermissionDenied) => println!(
            "  microphone access was denied; allow it and type /izin, then /on"
        ),
        Err(SesliError::NoMicrophone) => println!("  no microphone found; connect one and type /on"),
        Err(SesliError::Unsupported) => println!("  voice mode is not available on this platform"),
        Err(e) => warn!("voice mode did not start: {e}"),
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::ModeChanged { mode, .. } => println!("  [{mode}]"),
        SessionEvent::TranscriptUpdated { finalized, interim } => {
            println!("  … {finalized} {interim}");
        }
        SessionEvent::FragmentStarted { index, total, .. } => {
            println!("  ({index}/{total})");
        }
        SessionEvent::PermissionChanged { denied } => {
            println!("  microphone permission {}", if *denied { "denied" } else { "cleared" });
        }
        SessionEvent::CaptureFault { kind, recoverable } => {
            let outcome = if *recoverable { "restarting" } else { "voice mode stopped" };
            println!("  capture fault: {kind} ({outcome})");
        }
        SessionEvent::UtteranceDispatched { .. } => {}
    }
}

fn print_status(session: &VoiceSession) -> anyhow::Result<()> {
    let snapshot = serde_json::to_string_pretty(&session.snapshot())?;
    let diagnostics = serde_json::to_string_pretty(&session.diagnostics_snapshot())?;
    println!("{snapshot}\n{diagnostics}");
    Ok(())
}
