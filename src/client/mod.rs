//! Client layer: the engine handle.
//!
//! High-level API. [`ProximityEngine::start`] wires the supervisor, the
//! orchestrator, and the retry coordinator together behind one handle.

mod config;
mod engine;

pub use config::*;
pub use engine::*;
