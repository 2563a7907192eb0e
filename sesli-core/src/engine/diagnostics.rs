//! Session counters for observability.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub utterances_dispatched: AtomicUsize,
    pub duplicates_suppressed: AtomicUsize,
    pub capture_restarts: AtomicUsize,
    pub capture_faults: AtomicUsize,
    pub fragments_spoken: AtomicUsize,
    pub synthesis_errors: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            utterances_dispatched: self.utterances_dispatched.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            capture_restarts: self.capture_restarts.load(Ordering::Relaxed),
            capture_faults: self.capture_faults.load(Ordering::Relaxed),
            fragments_spoken: self.fragments_spoken.load(Ordering::Relaxed),
            synthesis_errors: self.synthesis_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub utterances_dispatched: usize,
    pub duplicates_suppressed: usize,
    pub capture_restarts: usize,
    pub capture_faults: usize,
    pub fragments_spoken: usize,
    pub synthesis_errors: usize,
}
