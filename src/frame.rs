//! Decoded frames and the bounded frame buffer between capture and streaming.
//!
//! - `Frame`: Immutable decoded RGB image. Cloning shares the pixel data.
//! - `FrameRingBuffer`: Bounded FIFO with hysteresis-gated readiness. Not synchronized.
//! - `FrameQueue`: The shared, lock-protected buffer plus the readiness signal that
//!   viewers block on.
//!
//! Readiness is a two-state machine driven by the fill level:
//!
//! ```text
//!   Filling --(len >= ready_at)--> Ready --(len <= resume_at)--> Filling
//!      ^                                                           |
//!      +-------------------------- clear() ------------------------+
//! ```
//!
//! The gap between the two thresholds keeps a viewer from flapping between
//! streaming and waiting when the producer and consumer run at similar rates.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Default buffer capacity: one minute of video at 30 fps.
pub const DEFAULT_CAPACITY: usize = 1800;

/// Fill level at which viewers may start draining the buffer.
pub const DEFAULT_READY_AT: usize = 300;

/// Fill level at or below which viewers wait for the buffer to refill.
pub const DEFAULT_RESUME_AT: usize = 30;

/// Maximum backlog a viewer tolerates before shedding the oldest frames.
pub const DEFAULT_SOFT_LIMIT: usize = 900;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A decoded color image produced by the capture loop.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image: Arc::new(image),
            seq,
        }
    }

    /// Decode one JPEG segment extracted from the capture stream.
    pub fn decode_jpeg(bytes: &[u8], seq: u64) -> Result<Self> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
            .context("decode jpeg segment")?
            .into_rgb8();
        Ok(Self::new(image, seq))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Packed RGB8 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Sequence number assigned by the decoder.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Re-encode for the wire.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64 * 1024);
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(self.image.as_ref())
            .context("encode jpeg")?;
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// FrameRingBuffer: bounded FIFO with readiness hysteresis
// ----------------------------------------------------------------------------

/// Capacity and thresholds for a `FrameRingBuffer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLimits {
    pub capacity: usize,
    pub ready_at: usize,
    pub resume_at: usize,
    pub soft_limit: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ready_at: DEFAULT_READY_AT,
            resume_at: DEFAULT_RESUME_AT,
            soft_limit: DEFAULT_SOFT_LIMIT,
        }
    }
}

impl BufferLimits {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(anyhow!("buffer capacity must be greater than zero"));
        }
        if self.resume_at >= self.ready_at {
            return Err(anyhow!(
                "buffer resume_at ({}) must be below ready_at ({})",
                self.resume_at,
                self.ready_at
            ));
        }
        if self.ready_at > self.capacity {
            return Err(anyhow!(
                "buffer ready_at ({}) must not exceed capacity ({})",
                self.ready_at,
                self.capacity
            ));
        }
        if self.soft_limit >= self.capacity {
            return Err(anyhow!(
                "buffer soft_limit ({}) must be below capacity ({})",
                self.soft_limit,
                self.capacity
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    #[default]
    Filling,
    Ready,
}

/// Bounded FIFO of decoded frames.
///
/// Callers provide synchronization; see `FrameQueue` for the shared wrapper.
pub struct FrameRingBuffer {
    frames: VecDeque<Frame>,
    limits: BufferLimits,
    readiness: Readiness,
    evicted: u64,
}

impl FrameRingBuffer {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            frames: VecDeque::with_capacity(limits.capacity),
            limits,
            readiness: Readiness::Filling,
            evicted: 0,
        }
    }

    /// Append a frame. At capacity the oldest frame is evicted and returned.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.frames.len() >= self.limits.capacity {
            self.evicted += 1;
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        self.update_readiness();
        evicted
    }

    /// Remove the oldest frame.
    pub fn pop(&mut self) -> Option<Frame> {
        let frame = self.frames.pop_front();
        self.update_readiness();
        frame
    }

    /// Drop every buffered frame and return to `Filling`. Returns the number dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        self.readiness = Readiness::Filling;
        dropped
    }

    /// Drop the oldest frames so that at most `soft_limit` frames queue behind
    /// the head. Returns the number dropped.
    pub fn shed_backlog(&mut self) -> usize {
        let backlog = self.frames.len().saturating_sub(1);
        if backlog <= self.limits.soft_limit {
            return 0;
        }
        let excess = backlog - self.limits.soft_limit;
        self.frames.drain(..excess);
        self.evicted += excess as u64;
        self.update_readiness();
        excess
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == Readiness::Ready
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn limits(&self) -> BufferLimits {
        self.limits
    }

    /// Frames dropped by capacity eviction or backlog shedding since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn update_readiness(&mut self) {
        let len = self.frames.len();
        self.readiness = match self.readiness {
            Readiness::Filling if len >= self.limits.ready_at => Readiness::Ready,
            Readiness::Ready if len <= self.limits.resume_at => Readiness::Filling,
            current => current,
        };
    }
}

impl Default for FrameRingBuffer {
    fn default() -> Self {
        Self::new(BufferLimits::default())
    }
}

// ----------------------------------------------------------------------------
// FrameQueue: shared buffer + readiness signal
// ----------------------------------------------------------------------------

/// Point-in-time view of the shared buffer.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct BufferStats {
    pub len: usize,
    pub capacity: usize,
    pub readiness: Readiness,
    pub evicted: u64,
}

/// The frame buffer shared by the capture loop and the viewers.
///
/// Every method holds the lock for exactly one buffer operation.
pub struct FrameQueue {
    buffer: Mutex<FrameRingBuffer>,
    ready: Condvar,
}

impl FrameQueue {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            buffer: Mutex::new(FrameRingBuffer::new(limits)),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, FrameRingBuffer>> {
        self.buffer
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))
    }

    pub fn push(&self, frame: Frame) -> Result<()> {
        let became_ready = {
            let mut buffer = self.lock()?;
            let was_ready = buffer.is_ready();
            buffer.push(frame);
            !was_ready && buffer.is_ready()
        };
        if became_ready {
            self.ready.notify_all();
        }
        Ok(())
    }

    pub fn pop(&self) -> Result<Option<Frame>> {
        Ok(self.lock()?.pop())
    }

    /// Shed backlog past the soft limit, then pop the head, under one lock.
    pub fn shed_and_pop(&self) -> Result<(usize, Option<Frame>)> {
        let mut buffer = self.lock()?;
        let shed = buffer.shed_backlog();
        Ok((shed, buffer.pop()))
    }

    pub fn clear(&self) -> Result<usize> {
        Ok(self.lock()?.clear())
    }

    pub fn is_ready(&self) -> Result<bool> {
        Ok(self.lock()?.is_ready())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn stats(&self) -> Result<BufferStats> {
        let buffer = self.lock()?;
        Ok(BufferStats {
            len: buffer.len(),
            capacity: buffer.limits().capacity,
            readiness: buffer.readiness(),
            evicted: buffer.evicted(),
        })
    }

    /// Block until the buffer is `Ready` or `timeout` elapses. Returns readiness.
    pub fn wait_ready(&self, timeout: Duration) -> Result<bool> {
        let buffer = self.lock()?;
        let (buffer, _) = self
            .ready
            .wait_timeout_while(buffer, timeout, |buffer| !buffer.is_ready())
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
        Ok(buffer.is_ready())
    }

    /// Wake every waiting viewer, e.g. on shutdown.
    pub fn wake_all(&self) {
        self.ready.notify_all();
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(BufferLimits::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_frame(seq: u64) -> Frame {
        Frame::new(RgbImage::new(4, 4), seq)
    }

    fn fill(buffer: &mut FrameRingBuffer, count: usize) {
        for _ in 0..count {
            let seq = buffer.len() as u64;
            buffer.push(make_test_frame(seq));
        }
    }

    #[test]
    fn ring_buffer_enforces_capacity_and_evicts_oldest() {
        let mut buffer = FrameRingBuffer::default();
        for seq in 0..(DEFAULT_CAPACITY as u64 + 25) {
            buffer.push(make_test_frame(seq));
            assert!(buffer.len() <= DEFAULT_CAPACITY);
        }
        assert_eq!(buffer.len(), DEFAULT_CAPACITY);
        assert_eq!(buffer.evicted(), 25);
        assert_eq!(buffer.pop().unwrap().seq(), 25);
    }

    #[test]
    fn readiness_follows_hysteresis() {
        let mut buffer = FrameRingBuffer::default();
        fill(&mut buffer, DEFAULT_READY_AT - 1);
        assert!(!buffer.is_ready());

        fill(&mut buffer, 1);
        assert!(buffer.is_ready());

        while buffer.len() > DEFAULT_RESUME_AT + 1 {
            buffer.pop();
            assert!(buffer.is_ready());
        }
        buffer.pop();
        assert_eq!(buffer.len(), DEFAULT_RESUME_AT);
        assert!(!buffer.is_ready());

        fill(&mut buffer, 1);
        assert!(!buffer.is_ready());

        let short_of_ready = DEFAULT_READY_AT - buffer.len() - 1;
        fill(&mut buffer, short_of_ready);
        assert!(!buffer.is_ready());
        fill(&mut buffer, 1);
        assert!(buffer.is_ready());
    }

    #[test]
    fn clear_resets_length_and_readiness() {
        let mut buffer = FrameRingBuffer::default();
        fill(&mut buffer, 500);
        assert!(buffer.is_ready());

        assert_eq!(buffer.clear(), 500);
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.readiness(), Readiness::Filling);

        assert_eq!(buffer.clear(), 0);
        assert!(!buffer.is_ready());
    }

    #[test]
    fn shed_backlog_keeps_most_recent_frames() {
        let mut buffer = FrameRingBuffer::default();
        fill(&mut buffer, 1000);

        let shed = buffer.shed_backlog();
        assert_eq!(shed, 1000 - 1 - DEFAULT_SOFT_LIMIT);
        assert_eq!(buffer.len(), DEFAULT_SOFT_LIMIT + 1);
        assert_eq!(buffer.pop().unwrap().seq(), shed as u64);
        assert!(buffer.is_ready());

        assert_eq!(buffer.shed_backlog(), 0);
    }

    #[test]
    fn limits_validation_rejects_inverted_thresholds() {
        let limits = BufferLimits {
            ready_at: 30,
            resume_at: 300,
            ..BufferLimits::default()
        };
        assert!(limits.validate().is_err());
        assert!(BufferLimits::default().validate().is_ok());
    }

    #[test]
    fn queue_wait_ready_wakes_on_threshold() {
        let limits = BufferLimits {
            capacity: 10,
            ready_at: 3,
            resume_at: 1,
            soft_limit: 8,
        };
        let queue = Arc::new(FrameQueue::new(limits));
        assert!(!queue.wait_ready(Duration::from_millis(10)).unwrap());

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for seq in 0..3 {
                    queue.push(make_test_frame(seq)).unwrap();
                }
            })
        };
        assert!(queue.wait_ready(Duration::from_secs(5)).unwrap());
        producer.join().unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.len, 3);
        assert_eq!(stats.readiness, Readiness::Ready);
    }

    #[test]
    fn frame_round_trips_through_jpeg() {
        let mut image = RgbImage::new(16, 8);
        for pixel in image.pixels_mut() {
            *pixel = image::Rgb([200, 40, 40]);
        }
        let jpeg = Frame::new(image, 0).to_jpeg(90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = Frame::decode_jpeg(&jpeg, 7).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
        assert_eq!(decoded.seq(), 7);
    }
}
