use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::frame::Frame;
use crate::track::backend::Tracker;
use crate::track::result::BoundingBox;

/// Stub tracker for testing. Replays a script of results, then reports nothing.
#[derive(Default)]
pub struct StubTracker {
    script: VecDeque<Option<BoundingBox>>,
    calls: Arc<AtomicUsize>,
}

impl StubTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: impl IntoIterator<Item = Option<BoundingBox>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `track` invocations.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Tracker for StubTracker {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn track(&mut self, _frame: &Frame) -> Result<Option<BoundingBox>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.pop_front().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn stub_tracker_replays_script() {
        let hit = BoundingBox::from_corners(0.0, 0.0, 10.0, 10.0, 0.9);
        let mut tracker = StubTracker::scripted([Some(hit), None]);
        let calls = tracker.calls();
        let frame = Frame::new(RgbImage::new(8, 8), 0);

        assert_eq!(tracker.track(&frame).unwrap(), Some(hit));
        assert_eq!(tracker.track(&frame).unwrap(), None);
        assert_eq!(tracker.track(&frame).unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
