//! Pure text helpers feeding the playback pipeline.
//!
//! A response travels `cleanse → chunk_text` before any fragment reaches the
//! synthesis engine. Neither step has side effects.

pub mod chunk;
pub mod cleanse;

pub use chunk::chunk_text;
pub use cleanse::{cleanse, SpeechCleanser, DEFAULT_PROTOCOL_TAGS};
