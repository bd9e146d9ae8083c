//! Capture coordinator.
//!
//! `Pipeline` owns every piece of shared capture state and is handed to each
//! concurrent activity behind an `Arc`:
//!
//! - the capture lock guards the video source, the camera mode, the capture
//!   generation and the undecoded byte accumulator;
//! - the frame queue carries decoded frames to viewers.
//!
//! The capture loop never waits for bytes or decodes while holding the capture
//! lock. Bytes are tagged with the generation that was current when their
//! receiver was taken; a mode switch bumps the generation, so bytes still in
//! flight from the previous camera are discarded instead of reaching the new
//! decode stream.

use anyhow::{anyhow, Result};
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::camera::{CameraMode, SwitchOutcome};
use crate::frame::{BufferLimits, BufferStats, Frame, FrameQueue};
use crate::ingest::{RawByteStream, VideoSource, DEFAULT_MAX_PENDING_BYTES};
use crate::track::TrackingSampler;

/// Chunks pulled from the source per capture-lock acquisition, at most.
const MAX_CHUNKS_PER_PASS: usize = 64;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub day_index: u32,
    pub night_index: u32,
    pub buffer: BufferLimits,
    pub max_pending_bytes: usize,
    /// How long one capture-loop pass waits for bytes before rechecking state.
    pub poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            day_index: 0,
            night_index: 1,
            buffer: BufferLimits::default(),
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Snapshot served by the status endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineStatus {
    pub mode: CameraMode,
    pub source: &'static str,
    pub capture_running: bool,
    pub camera_index: Option<u32>,
    pub capture_generation: u64,
    pub pending_bytes: usize,
    pub frames_decoded: u64,
    pub segments_dropped: u64,
    pub buffer: BufferStats,
}

struct CaptureState {
    source: Box<dyn VideoSource>,
    mode: CameraMode,
    generation: u64,
    raw: RawByteStream,
}

impl CaptureState {
    /// Replace the running capture with one for `mode`.
    ///
    /// Pending bytes are dropped and the generation bumped before the new
    /// capture starts, so nothing read from the old process survives.
    fn restart(&mut self, mode: CameraMode, settings: &PipelineSettings) -> Result<()> {
        self.source.stop()?;
        self.raw.clear();
        self.generation += 1;
        let camera_index = mode.camera_index(settings.day_index, settings.night_index);
        self.source.start(camera_index)?;
        self.mode = mode;
        Ok(())
    }
}

pub struct Pipeline {
    capture: Mutex<CaptureState>,
    frames: FrameQueue,
    settings: PipelineSettings,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
    segments_dropped: AtomicU64,
    closed_generation: AtomicU64,
}

impl Pipeline {
    /// Build an idle pipeline in `Day` mode. Call `start` to launch capture.
    pub fn new(source: Box<dyn VideoSource>, settings: PipelineSettings) -> Self {
        Self {
            capture: Mutex::new(CaptureState {
                source,
                mode: CameraMode::Day,
                generation: 0,
                raw: RawByteStream::new(settings.max_pending_bytes),
            }),
            frames: FrameQueue::new(settings.buffer),
            settings,
            shutdown: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            segments_dropped: AtomicU64::new(0),
            closed_generation: AtomicU64::new(0),
        }
    }

    fn lock_capture(&self) -> Result<MutexGuard<'_, CaptureState>> {
        self.capture
            .lock()
            .map_err(|_| anyhow!("capture lock poisoned"))
    }

    /// Launch capture for the current mode.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock_capture()?;
        let mode = state.mode;
        state.restart(mode, &self.settings)?;
        log::info!(
            "capture pipeline started in {} mode (source={})",
            mode,
            state.source.name()
        );
        Ok(())
    }

    pub fn mode(&self) -> Result<CameraMode> {
        Ok(self.lock_capture()?.mode)
    }

    /// Move to `target`, restarting capture on the matching camera.
    ///
    /// Requesting the active mode while its capture is running is a no-op. The
    /// whole transition runs under the capture lock; a failed stop or start is
    /// returned without retry.
    pub fn switch_mode(&self, target: CameraMode) -> Result<SwitchOutcome> {
        let mut state = self.lock_capture()?;
        if state.mode == target && state.source.is_running() {
            log::info!("already in {} mode; ignoring switch request", target);
            return Ok(SwitchOutcome::AlreadyActive(target));
        }
        log::info!(
            "switching to {} mode (camera {})",
            target,
            target.camera_index(self.settings.day_index, self.settings.night_index)
        );
        state.restart(target, &self.settings)?;
        Ok(SwitchOutcome::Switched(target))
    }

    pub fn frames(&self) -> &FrameQueue {
        &self.frames
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Undecoded bytes held for the active capture.
    pub fn pending_bytes(&self) -> Result<usize> {
        Ok(self.lock_capture()?.raw.len())
    }

    pub fn capture_generation(&self) -> Result<u64> {
        Ok(self.lock_capture()?.generation)
    }

    pub fn status(&self) -> Result<PipelineStatus> {
        let (mode, source, capture_running, camera_index, capture_generation, pending_bytes) = {
            let state = self.lock_capture()?;
            (
                state.mode,
                state.source.name(),
                state.source.is_running(),
                state.source.camera_index(),
                state.generation,
                state.raw.len(),
            )
        };
        Ok(PipelineStatus {
            mode,
            source,
            capture_running,
            camera_index,
            capture_generation,
            pending_bytes,
            frames_decoded: self.next_seq.load(Ordering::Relaxed),
            segments_dropped: self.segments_dropped.load(Ordering::Relaxed),
            buffer: self.frames.stats()?,
        })
    }

    /// One capture-loop pass: wait up to `wait` for bytes, cut out complete
    /// segments, decode them, sample them and queue them. Returns the number of
    /// frames queued.
    ///
    /// A missing capture, a closed capture stream or an idle stream all make
    /// the pass a no-op.
    pub fn pump_once(&self, sampler: &mut TrackingSampler, wait: Duration) -> Result<usize> {
        let (generation, chunks) = {
            let state = self.lock_capture()?;
            (state.generation, state.source.chunks())
        };
        let Some(chunks) = chunks else {
            std::thread::sleep(wait);
            return Ok(0);
        };

        let mut batch = match chunks.recv_timeout(wait) {
            Ok(chunk) => vec![chunk],
            Err(RecvTimeoutError::Timeout) => return Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                // A switch closes the old stream; pick up the new one right away.
                if self.lock_capture()?.generation != generation {
                    return Ok(0);
                }
                if self.closed_generation.swap(generation, Ordering::Relaxed) != generation {
                    log::warn!("capture output closed (generation {})", generation);
                }
                std::thread::sleep(wait);
                return Ok(0);
            }
        };
        while batch.len() < MAX_CHUNKS_PER_PASS {
            match chunks.try_recv() {
                Ok(chunk) => batch.push(chunk),
                Err(_) => break,
            }
        }

        let segments = {
            let mut state = self.lock_capture()?;
            if state.generation != generation {
                log::debug!(
                    "discarding {} chunks from replaced capture generation {}",
                    batch.len(),
                    generation
                );
                return Ok(0);
            }
            for chunk in &batch {
                state.raw.extend(chunk);
            }
            state.raw.drain_segments()
        };

        let mut queued = 0;
        for segment in segments {
            let seq = self.next_seq.load(Ordering::Relaxed);
            let frame = match Frame::decode_jpeg(&segment, seq) {
                Ok(frame) => frame,
                Err(err) => {
                    self.segments_dropped.fetch_add(1, Ordering::Relaxed);
                    log::debug!("dropping malformed segment ({} bytes): {:#}", segment.len(), err);
                    continue;
                }
            };
            self.next_seq.fetch_add(1, Ordering::Relaxed);
            sampler.observe(&frame);
            self.frames.push(frame)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Run capture passes until shutdown.
    pub fn run_capture_loop(&self, mut sampler: TrackingSampler) -> Result<()> {
        log::info!(
            "capture loop running (tracker={})",
            sampler.tracker_name()
        );
        while !self.is_shutting_down() {
            self.pump_once(&mut sampler, self.settings.poll_interval)?;
        }
        log::info!(
            "capture loop stopped after {} frames; last position {}",
            sampler.ticks(),
            sampler.position()
        );
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop capture and release every waiting viewer.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.frames.wake_all();
        let mut state = self.lock_capture()?;
        state.source.stop()?;
        state.raw.clear();
        Ok(())
    }
}
