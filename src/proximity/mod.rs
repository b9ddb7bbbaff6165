//! Proximity computation and its recomputation throttle.
//!
//! - [`ProximityComputer`]: pure function from (user, roster) to an ordered
//!   [`ProximitySnapshot`]
//! - [`ProximityCache`]: remembers the last computation and answers
//!   "is recomputation needed?"
//! - [`geo`]: haversine distance and bearing helpers

mod cache;
mod computer;
pub mod geo;

pub use cache::*;
pub use computer::*;
