//! Subprocess-backed capture via `libcamera-vid`.
//!
//! The capture tool is started with MJPEG output on stdout. A detached pump
//! thread copies stdout into a bounded channel; when the channel is full the
//! pump blocks and the pipe applies backpressure to the encoder.
//!
//! Stopping sends SIGTERM and waits for exit. There is no kill-after-timeout.
//! A capture whose output has ended is no longer reported as running.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Sender};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::source::{ChunkReceiver, VideoSource};

const READ_CHUNK_BYTES: usize = 4096;
const CHUNK_CHANNEL_DEPTH: usize = 256;

/// Command-line settings for the capture tool.
#[derive(Clone, Debug)]
pub struct LibcameraConfig {
    /// Executable to launch.
    pub program: String,
    /// Appended after the generated arguments.
    pub extra_args: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl Default for LibcameraConfig {
    fn default() -> Self {
        Self {
            program: "libcamera-vid".to_string(),
            extra_args: Vec::new(),
            width: 640,
            height: 480,
            framerate: 30,
        }
    }
}

impl LibcameraConfig {
    pub fn command_args(&self, camera_index: u32) -> Vec<String> {
        let mut args: Vec<String> = [
            "--inline",
            "--nopreview",
            "-t",
            "0",
            "--codec",
            "mjpeg",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        args.extend([
            "--width".to_string(),
            self.width.to_string(),
            "--height".to_string(),
            self.height.to_string(),
            "--framerate".to_string(),
            self.framerate.to_string(),
            "-o".to_string(),
            "-".to_string(),
            "--camera".to_string(),
            camera_index.to_string(),
        ]);
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Capture source that runs one `libcamera-vid` process at a time.
pub struct LibcameraSource {
    config: LibcameraConfig,
    running: Option<RunningCapture>,
}

struct RunningCapture {
    child: Child,
    camera_index: u32,
    chunks: ChunkReceiver,
    /// Cleared by the pump thread when stdout reaches EOF.
    streaming: Arc<AtomicBool>,
}

impl LibcameraSource {
    pub fn new(config: LibcameraConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }
}

impl VideoSource for LibcameraSource {
    fn name(&self) -> &'static str {
        "libcamera"
    }

    fn start(&mut self, camera_index: u32) -> Result<()> {
        self.stop()?;

        let args = self.config.command_args(camera_index);
        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| {
                format!(
                    "failed to launch {} for camera {}",
                    self.config.program, camera_index
                )
            })?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                terminate(&mut child)?;
                return Err(anyhow!(
                    "failed to capture stdout from {}",
                    self.config.program
                ));
            }
        };

        let (tx, rx) = bounded(CHUNK_CHANNEL_DEPTH);
        let pid = child.id();
        let streaming = Arc::new(AtomicBool::new(true));
        let pump_streaming = streaming.clone();
        std::thread::Builder::new()
            .name(format!("capture-pump-{}", camera_index))
            .spawn(move || {
                pump_stdout(stdout, &tx, pid);
                // Cleared before `tx` drops, so a disconnected channel implies it.
                pump_streaming.store(false, Ordering::SeqCst);
            })
            .context("spawn capture pump thread")?;

        log::info!(
            "capture started: {} camera={} pid={} ({}x{} @ {} fps)",
            self.config.program,
            camera_index,
            pid,
            self.config.width,
            self.config.height,
            self.config.framerate
        );
        self.running = Some(RunningCapture {
            child,
            camera_index,
            chunks: rx,
            streaming,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut capture) = self.running.take() else {
            return Ok(());
        };
        let pid = capture.child.id();
        terminate(&mut capture.child)
            .with_context(|| format!("failed to stop capture for camera {}", capture.camera_index))?;
        log::info!(
            "capture stopped: camera={} pid={}",
            capture.camera_index,
            pid
        );
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|capture| capture.streaming.load(Ordering::SeqCst))
    }

    fn camera_index(&self) -> Option<u32> {
        self.running.as_ref().map(|capture| capture.camera_index)
    }

    fn chunks(&self) -> Option<ChunkReceiver> {
        self.running.as_ref().map(|capture| capture.chunks.clone())
    }
}

impl Drop for LibcameraSource {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("capture shutdown failed: {}", err);
        }
    }
}

fn pump_stdout(mut stdout: ChildStdout, tx: &Sender<Vec<u8>>, pid: u32) {
    let mut buf = [0u8; READ_CHUNK_BYTES];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                log::debug!("capture pid={} read failed: {}", pid, err);
                break;
            }
        }
    }
    log::debug!("capture pid={} output closed", pid);
}

/// Ask the process to exit and block until it has.
fn terminate(child: &mut Child) -> Result<()> {
    if child.try_wait()?.is_none() {
        #[cfg(unix)]
        {
            // SAFETY: kill(2) on a pid owned by this process; no memory is shared.
            let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    return Err(anyhow!("SIGTERM to pid {} failed: {}", child.id(), err));
                }
            }
        }
        #[cfg(not(unix))]
        {
            child.kill()?;
        }
    }
    child.wait().context("wait for capture exit")?;
    Ok(())
}
