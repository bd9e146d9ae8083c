//! Subject tracking.
//!
//! - `Tracker`: backend trait, frame in, at most one box out
//! - `StubTracker`, `MotionTracker`, `TractTracker` (feature `backend-tract`)
//! - `TrackingSampler`: decimated tracking plus position telemetry

mod backend;
mod backends;
mod result;
mod sampler;

pub use backend::Tracker;
pub use backends::{MotionTracker, StubTracker};
#[cfg(feature = "backend-tract")]
pub use backends::TractTracker;
pub use result::{BoundingBox, Position};
pub use sampler::{TrackingSampler, DEFAULT_SAMPLE_EVERY};
