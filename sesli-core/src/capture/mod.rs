//! Capture pipeline state: the utterance buffer for the turn in progress.
//!
//! The buffer outlives individual capture streams. A platform that ends its
//! stream mid-turn (session limits, "no speech" faults) gets a fresh stream,
//! and text from the earlier stream, finalized or not, is kept so the
//! utterance is dispatched whole.

pub mod segmenter;

pub use segmenter::{SegmentDecision, SilenceSegmenter};

use crate::platform::RecognitionResult;

/// Finalized and interim transcript text of the current turn.
#[derive(Debug, Default, Clone)]
pub struct UtteranceBuffer {
    finalized: Vec<String>,
    interim: String,
    /// Results of the current stream already appended to `finalized`.
    consumed: usize,
}

impl UtteranceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new stream starts its result list from zero. Interim text the old
    /// stream never finalized is kept as finalized text of this turn.
    pub fn begin_stream(&mut self) {
        self.consumed = 0;
        let interim = std::mem::take(&mut self.interim);
        if !interim.is_empty() {
            self.finalized.push(interim);
        }
    }

    /// Apply one result event. Returns `true` if the visible text changed.
    pub fn ingest(&mut self, result_index: usize, results: &[RecognitionResult]) -> bool {
        let before = (self.finalized.len(), self.interim.clone());
        let mut interim = Vec::new();

        for (index, result) in results.iter().enumerate().skip(result_index) {
            let text = result.transcript.trim();
            if result.is_final {
                if index >= self.consumed {
                    if !text.is_empty() {
                        self.finalized.push(text.to_string());
                    }
                    self.consumed = index + 1;
                }
            } else if !text.is_empty() {
                interim.push(text);
            }
        }

        self.interim = interim.join(" ");
        before != (self.finalized.len(), self.interim.clone())
    }

    pub fn finalized(&self) -> String {
        self.finalized.join(" ")
    }

    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Finalized plus interim text, whitespace-normalized.
    pub fn utterance(&self) -> String {
        self.finalized
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.interim.as_str()))
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.interim.is_empty()
    }

    pub fn clear(&mut self) {
        self.finalized.clear();
        self.interim.clear();
        self.consumed = 0;
    }
}
