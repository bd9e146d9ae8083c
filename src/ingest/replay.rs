//! Deterministic capture source that replays canned bytes.
//!
//! Each camera index has a script of chunks. `start` opens a fresh channel
//! preloaded with that camera's chunks and keeps it open until `stop`, so the
//! capture looks live but idle once the script is consumed. Every start and
//! stop is recorded in a shared `SourceEvents` log.
//!
//! `feeds` hands out a `ReplayFeeds` handle that keeps the sending side of
//! every capture's channel, so bytes can be injected into a capture after it
//! has been replaced.

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::source::{ChunkReceiver, VideoSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    Started(u32),
    Stopped(u32),
}

/// Shared record of lifecycle calls made on a `ReplaySource`.
#[derive(Clone, Debug, Default)]
pub struct SourceEvents {
    events: Arc<Mutex<Vec<SourceEvent>>>,
}

impl SourceEvents {
    fn record(&self, event: SourceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn snapshot(&self) -> Vec<SourceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn starts(&self) -> usize {
        self.count(|event| matches!(event, SourceEvent::Started(_)))
    }

    pub fn stops(&self) -> usize {
        self.count(|event| matches!(event, SourceEvent::Stopped(_)))
    }

    fn count(&self, predicate: impl Fn(&SourceEvent) -> bool) -> usize {
        self.snapshot().iter().filter(|event| predicate(event)).count()
    }
}

/// Senders of every capture started after `ReplaySource::feeds` was called.
#[derive(Clone, Debug, Default)]
pub struct ReplayFeeds {
    senders: Arc<Mutex<Vec<(u32, Sender<Vec<u8>>)>>>,
}

impl ReplayFeeds {
    fn record(&self, camera_index: u32, sender: Sender<Vec<u8>>) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.push((camera_index, sender));
        }
    }

    /// Sender for the most recent capture on `camera_index`, running or not.
    pub fn sender(&self, camera_index: u32) -> Option<Sender<Vec<u8>>> {
        let senders = self.senders.lock().ok()?;
        senders
            .iter()
            .rev()
            .find(|(index, _)| *index == camera_index)
            .map(|(_, sender)| sender.clone())
    }
}

#[derive(Default)]
pub struct ReplaySource {
    scripts: HashMap<u32, Vec<Vec<u8>>>,
    failing: HashSet<u32>,
    events: SourceEvents,
    feeds: Option<ReplayFeeds>,
    running: Option<ReplayCapture>,
}

struct ReplayCapture {
    camera_index: u32,
    chunks: ChunkReceiver,
    // Holds the channel open until stop.
    _feed: Sender<Vec<u8>>,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script raw chunks for a camera, delivered in order on every start.
    pub fn with_chunks(mut self, camera_index: u32, chunks: Vec<Vec<u8>>) -> Self {
        self.scripts.entry(camera_index).or_default().extend(chunks);
        self
    }

    /// Script whole encoded frames for a camera, one chunk per frame.
    pub fn with_frames(self, camera_index: u32, frames: &[Vec<u8>]) -> Self {
        self.with_chunks(camera_index, frames.to_vec())
    }

    /// Make `start` fail for a camera, as a missing device would.
    pub fn fail_on_start(mut self, camera_index: u32) -> Self {
        self.failing.insert(camera_index);
        self
    }

    pub fn events(&self) -> SourceEvents {
        self.events.clone()
    }

    /// Keep every capture's channel open for injection.
    ///
    /// Once called, stopping a capture no longer disconnects its channel.
    pub fn feeds(&mut self) -> ReplayFeeds {
        self.feeds.get_or_insert_with(ReplayFeeds::default).clone()
    }
}

impl VideoSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn start(&mut self, camera_index: u32) -> Result<()> {
        self.stop()?;
        if self.failing.contains(&camera_index) {
            return Err(anyhow!("replay camera {} unavailable", camera_index));
        }

        let (tx, rx) = unbounded();
        for chunk in self.scripts.get(&camera_index).into_iter().flatten() {
            tx.send(chunk.clone())
                .map_err(|_| anyhow!("replay channel closed"))?;
        }
        if let Some(feeds) = &self.feeds {
            feeds.record(camera_index, tx.clone());
        }
        self.events.record(SourceEvent::Started(camera_index));
        self.running = Some(ReplayCapture {
            camera_index,
            chunks: rx,
            _feed: tx,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(capture) = self.running.take() {
            self.events.record(SourceEvent::Stopped(capture.camera_index));
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn camera_index(&self) -> Option<u32> {
        self.running.as_ref().map(|capture| capture.camera_index)
    }

    fn chunks(&self) -> Option<ChunkReceiver> {
        self.running.as_ref().map(|capture| capture.chunks.clone())
    }
}
