use crate::frame::Frame;
use crate::track::backend::Tracker;
use crate::track::result::Position;
use crate::transport::PositionSink;

/// Default decimation: track one frame in ten.
pub const DEFAULT_SAMPLE_EVERY: u32 = 10;

/// Runs the tracker on every Nth decoded frame and publishes the position.
///
/// Position only moves when the tracker reports a subject; a miss republishes
/// the last known position so the logger keeps a steady cadence.
pub struct TrackingSampler {
    tracker: Box<dyn Tracker>,
    sink: Box<dyn PositionSink>,
    every: u64,
    tick: u64,
    position: Position,
}

impl TrackingSampler {
    pub fn new(tracker: Box<dyn Tracker>, sink: Box<dyn PositionSink>, every: u32) -> Self {
        Self {
            tracker,
            sink,
            every: u64::from(every.max(1)),
            tick: 0,
            position: Position::default(),
        }
    }

    /// Account for one decoded frame. Returns the published position on
    /// sampled ticks.
    pub fn observe(&mut self, frame: &Frame) -> Option<Position> {
        let sampled = self.tick % self.every == 0;
        self.tick += 1;
        if !sampled {
            return None;
        }

        match self.tracker.track(frame) {
            Ok(Some(bbox)) => self.position = bbox.center(),
            Ok(None) => {}
            Err(err) => log::warn!("tracker {} failed: {:#}", self.tracker.name(), err),
        }
        log::debug!("tracked position {} (frame {})", self.position, frame.seq());

        if let Err(err) = self.sink.publish(self.position) {
            log::warn!("position telemetry failed: {:#}", err);
        }
        Some(self.position)
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Decoded frames observed so far.
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn tracker_name(&self) -> &'static str {
        self.tracker.name()
    }

    pub fn warm_up(&mut self) -> anyhow::Result<()> {
        self.tracker.warm_up()
    }
}
