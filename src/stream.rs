//! Per-viewer MJPEG streaming.
//!
//! Each `/video_feed` connection owns a `FrameStreamer`. It waits until the
//! shared buffer is ready, sheds backlog past the soft limit, pops the head
//! frame, paces output to the configured rate and re-encodes the frame as one
//! multipart part. Independently of consumption it clears the whole buffer
//! whenever its staleness window runs out, so long-lived viewers never drift
//! minutes behind real time.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::pipeline::Pipeline;

/// Multipart boundary token used between parts.
pub const BOUNDARY: &str = "frame";

pub const DEFAULT_STREAM_FPS: u32 = 30;
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(180);
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// How long a viewer blocks on readiness before rechecking shutdown.
const READY_POLL: Duration = Duration::from_millis(250);

pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}

/// Frame one encoded JPEG as a multipart part.
pub fn encode_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    pub fps: u32,
    pub staleness: Duration,
    pub jpeg_quality: u8,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_STREAM_FPS,
            staleness: DEFAULT_STALENESS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Wall-clock window after which the shared buffer is swept.
#[derive(Clone, Copy, Debug)]
pub struct StalenessWindow {
    started: Instant,
    length: Duration,
}

impl StalenessWindow {
    pub fn new(length: Duration, now: Instant) -> Self {
        Self {
            started: now,
            length,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.length
    }

    pub fn restart(&mut self, now: Instant) {
        self.started = now;
    }
}

/// Spaces emitted frames at least `1 / fps` apart.
#[derive(Clone, Copy, Debug)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time to wait before the next emission. Zero for the first frame.
    pub fn delay(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn pace(&mut self) {
        let delay = self.delay(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.last = Some(Instant::now());
    }
}

pub struct FrameStreamer {
    pipeline: Arc<Pipeline>,
    settings: StreamSettings,
    window: Option<StalenessWindow>,
    pacer: Pacer,
    emitted: u64,
    sweeps: u64,
}

impl FrameStreamer {
    pub fn new(pipeline: Arc<Pipeline>, settings: StreamSettings) -> Self {
        let pacer = Pacer::new(settings.fps);
        Self {
            pipeline,
            settings,
            window: None,
            pacer,
            emitted: 0,
            sweeps: 0,
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }

    /// Clear the shared buffer if the staleness window has run out.
    ///
    /// The window opens on the first call. Returns true when a sweep happened;
    /// the window then restarts at `now`.
    pub fn sweep_if_stale(&mut self, now: Instant) -> Result<bool> {
        let length = self.settings.staleness;
        let window = self
            .window
            .get_or_insert_with(|| StalenessWindow::new(length, now));
        if !window.is_expired(now) {
            return Ok(false);
        }
        window.restart(now);
        let cleared = self.pipeline.frames().clear()?;
        self.sweeps += 1;
        log::info!(
            "staleness window of {:?} elapsed; cleared {} buffered frames",
            length,
            cleared
        );
        Ok(true)
    }

    /// Next frame for this viewer, or `None` once the pipeline shuts down.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if self.pipeline.is_shutting_down() {
                return Ok(None);
            }
            if !self.pipeline.frames().wait_ready(READY_POLL)? {
                continue;
            }
            if self.sweep_if_stale(Instant::now())? {
                continue;
            }
            let (shed, frame) = self.pipeline.frames().shed_and_pop()?;
            if shed > 0 {
                log::debug!("viewer behind; shed {} backlog frames", shed);
            }
            let Some(frame) = frame else {
                continue;
            };
            self.pacer.pace();
            self.emitted += 1;
            return Ok(Some(frame));
        }
    }

    /// Next encoded multipart part, or `None` once the pipeline shuts down.
    ///
    /// Frames that fail to encode are skipped.
    pub fn next_part(&mut self) -> Result<Option<Vec<u8>>> {
        while let Some(frame) = self.next_frame()? {
            match frame.to_jpeg(self.settings.jpeg_quality) {
                Ok(jpeg) => return Ok(Some(encode_part(&jpeg))),
                Err(err) => log::debug!("skipping frame {}: {:#}", frame.seq(), err),
            }
        }
        Ok(None)
    }
}
