//! Persistent console settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sesli_core::text::DEFAULT_PROTOCOL_TAGS;
use sesli_core::SessionConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub language: String,
    pub silence_threshold_ms: u64,
    pub min_speech_ms: u64,
    pub speech_rate: f32,
    pub max_fragment_len: usize,
    pub keep_alive_secs: u64,
    pub preferred_voice: Option<String>,
    pub protocol_tags: Vec<String>,
    /// Simulated responder latency.
    pub response_delay_ms: u64,
    /// Console synthesis pacing at rate 1.0.
    pub chars_per_second: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            language: "tr-TR".into(),
            silence_threshold_ms: 1_800,
            min_speech_ms: 500,
            speech_rate: 1.0,
            max_fragment_len: 180,
            keep_alive_secs: 10,
            preferred_voice: None,
            protocol_tags: DEFAULT_PROTOCOL_TAGS.iter().map(|t| t.to_string()).collect(),
            response_delay_ms: 600,
            chars_per_second: 18.0,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.language = normalize_language(&self.language);
        self.silence_threshold_ms = self.silence_threshold_ms.clamp(300, 10_000);
        self.min_speech_ms = self.min_speech_ms.min(5_000);
        self.speech_rate = if self.speech_rate.is_finite() {
            self.speech_rate.clamp(0.5, 2.0)
        } else {
            1.0
        };
        self.max_fragment_len = self.max_fragment_len.clamp(20, 1_000);
        self.keep_alive_secs = self.keep_alive_secs.clamp(1, 60);
        self.preferred_voice = self
            .preferred_voice
            .as_ref()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self.protocol_tags = normalize_protocol_tags(&self.protocol_tags);
        self.response_delay_ms = self.response_delay_ms.min(30_000);
        self.chars_per_second = if self.chars_per_second.is_finite() {
            self.chars_per_second.clamp(5.0, 200.0)
        } else {
            18.0
        };
    }

    /// Environment variables win over the settings file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(language) = std::env::var("SESLI_LANGUAGE") {
            self.language = language;
        }
        if let Some(ms) = std::env::var("SESLI_SILENCE_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
        {
            self.silence_threshold_ms = ms;
        }
        self.normalize();
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            language: self.language.clone(),
            silence_threshold: Duration::from_millis(self.silence_threshold_ms),
            min_speech_duration: Duration::from_millis(self.min_speech_ms),
            speech_rate: self.speech_rate,
            max_fragment_len: self.max_fragment_len,
            keep_alive_interval: Duration::from_secs(self.keep_alive_secs),
            preferred_voice: self.preferred_voice.clone(),
            protocol_tags: self.protocol_tags.clone(),
            ..SessionConfig::default()
        }
    }
}

pub fn normalize_language(raw: &str) -> String {
    let tag = raw.trim().replace('_', "-");
    match tag.to_ascii_lowercase().as_str() {
        "" | "tr" | "turkish" | "türkçe" => "tr-TR".into(),
        "en" | "english" => "en-US".into(),
        "de" | "german" | "deutsch" => "de-DE".into(),
        _ => tag,
    }
}

fn normalize_protocol_tags(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in raw {
        let normalized = tag.trim().to_ascii_lowercase();
        if normalized.is_empty() || out.contains(&normalized) {
            continue;
        }
        out.push(normalized);
    }
    out
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Sesli")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("sesli")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("sesli-settings-{}-{name}", std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn normalize_clamps_and_dedupes() {
        let mut settings = AppSettings {
            language: " en ".into(),
            silence_threshold_ms: 50,
            speech_rate: 4.0,
            max_fragment_len: 3,
            keep_alive_secs: 0,
            preferred_voice: Some("  ".into()),
            protocol_tags: vec!["Query".into(), "query".into(), " ".into(), "sql".into()],
            chars_per_second: f32::NAN,
            ..AppSettings::default()
        };
        settings.normalize();

        assert_eq!(settings.language, "en-US");
        assert_eq!(settings.silence_threshold_ms, 300);
        assert_eq!(settings.speech_rate, 2.0);
        assert_eq!(settings.max_fragment_len, 20);
        assert_eq!(settings.keep_alive_secs, 1);
        assert!(settings.preferred_voice.is_none());
        assert_eq!(settings.protocol_tags, vec!["query", "sql"]);
        assert_eq!(settings.chars_per_second, 18.0);
    }

    #[test]
    fn unknown_language_tags_pass_through() {
        assert_eq!(normalize_language("fr_FR"), "fr-FR");
        assert_eq!(normalize_language(""), "tr-TR");
    }

    #[test]
    fn missing_or_corrupt_file_yields_defaults() {
        let path = scratch_path("missing");
        assert_eq!(load_settings(&path), AppSettings::default());

        let corrupt = scratch_path("corrupt");
        fs::create_dir_all(corrupt.parent().expect("parent")).expect("mkdir");
        fs::write(&corrupt, "{ not json").expect("write");
        assert_eq!(load_settings(&corrupt), AppSettings::default());
        let _ = fs::remove_dir_all(corrupt.parent().expect("parent"));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let path = scratch_path("partial");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, r#"{ "language": "de", "silenceThresholdMs": 1200 }"#).expect("write");

        let settings = load_settings(&path);
        assert_eq!(settings.language, "de-DE");
        assert_eq!(settings.silence_threshold_ms, 1_200);
        assert_eq!(settings.min_speech_ms, 500);
        let _ = fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn saved_settings_load_back() {
        let path = scratch_path("saved");
        let settings = AppSettings {
            preferred_voice: Some("Yelda".into()),
            response_delay_ms: 0,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).expect("save");
        assert_eq!(load_settings(&path), settings);
        let _ = fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn session_config_carries_timings() {
        let settings = AppSettings {
            silence_threshold_ms: 2_000,
            min_speech_ms: 600,
            ..AppSettings::default()
        };
        let config = settings.session_config();
        assert_eq!(config.silence_threshold, Duration::from_millis(2_000));
        assert_eq!(config.min_speech_duration, Duration::from_millis(600));
        assert_eq!(config.language, "tr-TR");
    }
}
