//! Capture sources and MJPEG segmentation.
//!
//! - `VideoSource`: lifecycle of the external producer for the active camera
//! - `LibcameraSource`: `libcamera-vid` subprocess writing MJPEG to stdout
//! - `ReplaySource`: scripted bytes for tests and demos
//! - `RawByteStream`: cuts complete JPEG segments out of the byte stream
//!
//! Sources only move bytes. Decoding, sampling and buffering happen in the
//! pipeline, which owns the `RawByteStream` alongside the source.

pub mod decoder;
pub mod libcamera;
pub mod replay;
mod source;

pub use decoder::{RawByteStream, DEFAULT_MAX_PENDING_BYTES, JPEG_EOI, JPEG_SOI};
pub use libcamera::{LibcameraConfig, LibcameraSource};
pub use replay::{ReplaySource, SourceEvent, SourceEvents};
pub use source::{ChunkReceiver, VideoSource};
