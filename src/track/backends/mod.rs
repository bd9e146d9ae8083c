pub mod motion;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use motion::MotionTracker;
pub use stub::StubTracker;

#[cfg(feature = "backend-tract")]
pub use tract::TractTracker;
