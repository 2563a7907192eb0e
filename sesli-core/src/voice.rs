//! Synthesis voice selection.
//!
//! The platform voice list can change at any time (voices load lazily in most
//! engines), so selection is a pure function over a snapshot and callers
//! re-query the platform before every fragment instead of caching a choice.

use serde::{Deserialize, Serialize};

/// One synthesis voice as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceInfo {
    /// Display name, e.g. `"Microsoft Emel Online"` or `"Yelda"`.
    pub name: String,
    /// BCP-47 language tag, e.g. `"tr-TR"`.
    pub lang: String,
    /// Installed locally and usable offline.
    pub local_service: bool,
    /// The platform's own default voice.
    pub is_default: bool,
}

impl VoiceInfo {
    pub fn new(name: impl Into<String>, lang: impl Into<String>, local_service: bool) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
            local_service,
            is_default: false,
        }
    }
}

/// Well-sounding voices known per language, best first.
pub fn preferred_voice_names(language: &str) -> &'static [&'static str] {
    match language_prefix(language).as_str() {
        "tr" => &["Yelda", "Microsoft Emel", "Microsoft Tolga", "Google Türkçe"],
        "en" => &["Samantha", "Microsoft Aria", "Google US English", "Daniel"],
        "de" => &["Anna", "Microsoft Katja", "Google Deutsch"],
        _ => &[],
    }
}

/// Pick the best voice for `language` from `available`.
pub fn select_voice<'a>(available: &'a [VoiceInfo], language: &str) -> Option<&'a VoiceInfo> {
    select_voice_preferring(available, language, None)
}

/// Like [`select_voice`], trying a host-configured voice name first.
///
/// Priority: the configured name, then the built-in preferred names (both
/// restricted to local voices), then any local voice, then any voice of the
/// language. Returns `None` when no voice matches the language at all, in
/// which case the platform default is used.
pub fn select_voice_preferring<'a>(
    available: &'a [VoiceInfo],
    language: &str,
    preferred: Option<&str>,
) -> Option<&'a VoiceInfo> {
    let prefix = language_prefix(language);
    let matching: Vec<&VoiceInfo> = available
        .iter()
        .filter(|v| language_prefix(&v.lang) == prefix)
        .collect();

    if matching.is_empty() {
        return None;
    }

    let named = preferred
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .into_iter()
        .chain(preferred_voice_names(language).iter().copied());

    for name in named {
        let needle = name.to_lowercase();
        if let Some(voice) = matching
            .iter()
            .copied()
            .find(|v| v.local_service && v.name.to_lowercase().contains(&needle))
        {
            return Some(voice);
        }
    }

    matching
        .iter()
        .find(|v| v.local_service)
        .or_else(|| matching.first())
        .copied()
}

fn language_prefix(tag: &str) -> String {
    tag.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}
