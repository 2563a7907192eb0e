//! Silence segmenter: decides when a spoken utterance is over.
//!
//! The timer itself is owned by the session controller; this type holds the
//! per-turn bookkeeping consulted when the timer fires.

use std::time::Duration;

use tokio::time::Instant;

/// Result of a silence timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDecision {
    /// Hand the utterance to the responder.
    Dispatch,
    /// Nothing was recognized.
    Empty,
    /// Speech has not lasted the minimum duration yet.
    TooShort,
    /// A previous utterance is still being answered.
    InFlight,
    /// Same text as the last dispatched utterance.
    Duplicate,
}

#[derive(Debug)]
pub struct SilenceSegmenter {
    min_speech: Duration,
    first_activity: Option<Instant>,
    last_dispatched: Option<String>,
    in_flight: bool,
}

impl SilenceSegmenter {
    pub fn new(min_speech: Duration) -> Self {
        Self {
            min_speech,
            first_activity: None,
            last_dispatched: None,
            in_flight: false,
        }
    }

    /// Record speech activity; only the first one of a turn is kept.
    pub fn note_activity(&mut self, now: Instant) {
        self.first_activity.get_or_insert(now);
    }

    pub fn decide(&mut self, text: &str, now: Instant) -> SegmentDecision {
        if text.is_empty() {
            return SegmentDecision::Empty;
        }
        let elapsed = self
            .first_activity
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();
        if elapsed < self.min_speech {
            return SegmentDecision::TooShort;
        }
        if self.in_flight {
            return SegmentDecision::InFlight;
        }
        if self.last_dispatched.as_deref() == Some(text) {
            return SegmentDecision::Duplicate;
        }

        self.in_flight = true;
        self.last_dispatched = Some(text.to_string());
        self.first_activity = None;
        SegmentDecision::Dispatch
    }

    /// The dispatched utterance has been answered; a new turn begins.
    pub fn complete(&mut self) {
        self.in_flight = false;
        self.first_activity = None;
    }

    /// Forget everything, including the last dispatched text.
    pub fn reset(&mut self) {
        self.complete();
        self.last_dispatched = None;
    }
}
