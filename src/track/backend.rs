use anyhow::Result;

use crate::frame::Frame;
use crate::track::result::BoundingBox;

/// Subject tracker backend.
///
/// Given a frame, a tracker reports at most one tracked subject. Backends are
/// opaque to the pipeline: it only needs the box to derive a position.
pub trait Tracker: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Locate the tracked subject in `frame`, if present.
    fn track(&mut self, frame: &Frame) -> Result<Option<BoundingBox>>;

    /// Optional warm-up hook, run once before the capture loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
