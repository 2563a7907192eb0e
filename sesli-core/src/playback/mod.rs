//! Playback pipeline state: the fragment queue of one response.

pub mod prosody;

use std::collections::VecDeque;

use crate::text::{chunk_text, SpeechCleanser};

/// Ordered fragments of the response being spoken.
#[derive(Debug, Default)]
pub struct FragmentQueue {
    pending: VecDeque<String>,
    current: Option<String>,
    total: usize,
    started: usize,
}

impl FragmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cleanse and chunk `response`, replacing whatever was queued.
    /// Returns the number of fragments; zero means nothing to speak.
    pub fn load(&mut self, cleanser: &SpeechCleanser, response: &str, max_len: usize) -> usize {
        let spoken = cleanser.clean(response);
        self.pending = chunk_text(&spoken, max_len).into();
        self.current = None;
        self.total = self.pending.len();
        self.started = 0;
        self.total
    }

    /// Move the next fragment into the current slot.
    pub fn advance(&mut self) -> Option<&str> {
        self.current = self.pending.pop_front();
        if self.current.is_some() {
            self.started += 1;
        }
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// 1-based position of the current fragment.
    pub fn position(&self) -> usize {
        self.started
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
        self.total = 0;
        self.started = 0;
    }
}
