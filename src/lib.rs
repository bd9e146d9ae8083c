//! habitat-cam
//!
//! Live camera pipeline for an animal-habitat monitor.
//!
//! # Architecture
//!
//! An external capture tool writes MJPEG to stdout. The pipeline cuts complete
//! JPEG segments out of that byte stream, decodes them, samples every Nth frame
//! for object tracking and queues frames in a bounded ring buffer. HTTP viewers
//! pull frames from the buffer and receive them as a multipart stream. Two
//! cameras (Day and Night) are multiplexed through one capture process; the
//! control API switches between them.
//!
//! Tracked positions leave the process as `"x,y"` UDP datagrams.
//!
//! # Module Structure
//!
//! - `ingest`: capture sources and JPEG segmentation
//! - `frame`: decoded frames and the shared ring buffer
//! - `track`: tracker backends and the tracking sampler
//! - `transport`: position telemetry
//! - `pipeline`: capture coordinator and camera-mode state machine
//! - `stream`: per-viewer MJPEG streaming
//! - `api`: HTTP server
//! - `config`: daemon configuration

pub mod api;
pub mod camera;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod stream;
pub mod track;
pub mod transport;

pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use camera::{CameraMode, SwitchOutcome};
pub use config::HabitatdConfig;
pub use frame::{BufferLimits, BufferStats, Frame, FrameQueue, FrameRingBuffer, Readiness};
pub use ingest::{LibcameraConfig, LibcameraSource, RawByteStream, ReplaySource, VideoSource};
pub use pipeline::{Pipeline, PipelineSettings, PipelineStatus};
pub use stream::{FrameStreamer, StalenessWindow, StreamSettings};
pub use track::{BoundingBox, MotionTracker, Position, StubTracker, Tracker, TrackingSampler};
pub use transport::{NullSink, PositionSink, UdpTelemetry};
