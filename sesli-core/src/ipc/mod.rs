//! IPC types a host forwards to its UI.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! emit them on whatever event bus it uses.

pub mod events;
