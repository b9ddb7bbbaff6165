//! Core data model, defaults, errors, and collaborator traits.
//!
//! This module has no runtime dependencies and is always compiled.

mod constants;
mod error;
mod traits;
mod types;

pub use constants::*;
pub use error::*;
pub use traits::*;
pub use types::*;
