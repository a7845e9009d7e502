//! Footprint conflict detection between concurrently active tasks.

#![warn(missing_docs)]

mod footprint;
mod detector;

pub use footprint::{compare_footprints, FootprintInference, Overlap};
pub use detector::{ConflictDetector, ConflictError, Result};
