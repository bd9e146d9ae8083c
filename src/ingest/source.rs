use anyhow::Result;
use crossbeam_channel::Receiver;

/// Receiving end of a capture process's stdout, in read-sized chunks.
pub type ChunkReceiver = Receiver<Vec<u8>>;

/// An external producer of MJPEG bytes for one camera at a time.
///
/// Implementations own at most one running capture. `start` replaces any
/// running capture; `stop` blocks until the capture has fully exited.
pub trait VideoSource: Send {
    /// Source identifier for logs.
    fn name(&self) -> &'static str;

    /// Launch capture on `camera_index`, replacing any running capture.
    fn start(&mut self, camera_index: u32) -> Result<()>;

    /// Terminate the running capture and wait for it. No-op when idle.
    fn stop(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Camera index of the running capture.
    fn camera_index(&self) -> Option<u32>;

    /// Byte stream of the running capture.
    ///
    /// The channel disconnects once the capture's output ends. A fresh
    /// receiver is returned after every `start`.
    fn chunks(&self) -> Option<ChunkReceiver>;
}
