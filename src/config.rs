use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::BufferLimits;
use crate::ingest::{LibcameraConfig, DEFAULT_MAX_PENDING_BYTES};
use crate::pipeline::PipelineSettings;
use crate::stream::{StreamSettings, DEFAULT_JPEG_QUALITY, DEFAULT_STALENESS, DEFAULT_STREAM_FPS};
use crate::track::DEFAULT_SAMPLE_EVERY;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:5005";
const DEFAULT_TELEMETRY_ADDR: &str = "127.0.0.1:5005";
const DEFAULT_CAMERA_PROGRAM: &str = "libcamera-vid";
const DEFAULT_DAY_INDEX: u32 = 0;
const DEFAULT_NIGHT_INDEX: u32 = 1;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FRAMERATE: u32 = 30;
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_CLASS_ID: usize = 0;

#[derive(Debug, Deserialize, Default)]
struct HabitatdConfigFile {
    http: Option<HttpConfigFile>,
    camera: Option<CameraConfigFile>,
    tracking: Option<TrackingConfigFile>,
    buffer: Option<BufferConfigFile>,
    stream: Option<StreamConfigFile>,
    telemetry: Option<TelemetryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    program: Option<String>,
    extra_args: Option<Vec<String>>,
    day_index: Option<u32>,
    night_index: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    framerate: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    sample_every: Option<u32>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    class_id: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct BufferConfigFile {
    capacity: Option<usize>,
    ready_at: Option<usize>,
    resume_at: Option<usize>,
    soft_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    fps: Option<u32>,
    staleness_secs: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HabitatdConfig {
    pub http_addr: String,
    pub telemetry_addr: String,
    pub camera: CameraSettings,
    pub tracking: TrackingSettings,
    pub buffer: BufferLimits,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub program: String,
    pub extra_args: Vec<String>,
    pub day_index: u32,
    pub night_index: u32,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub sample_every: u32,
    /// ONNX detector; frame differencing is used when unset.
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence: f32,
    pub class_id: usize,
}

impl HabitatdConfig {
    /// Load from the file named by `HABITAT_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HABITAT_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => HabitatdConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: HabitatdConfigFile) -> Self {
        let http_addr = file
            .http
            .and_then(|http| http.addr)
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let telemetry_addr = file
            .telemetry
            .and_then(|telemetry| telemetry.addr)
            .unwrap_or_else(|| DEFAULT_TELEMETRY_ADDR.to_string());

        let camera = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            program: camera
                .program
                .unwrap_or_else(|| DEFAULT_CAMERA_PROGRAM.to_string()),
            extra_args: camera.extra_args.unwrap_or_default(),
            day_index: camera.day_index.unwrap_or(DEFAULT_DAY_INDEX),
            night_index: camera.night_index.unwrap_or(DEFAULT_NIGHT_INDEX),
            width: camera.width.unwrap_or(DEFAULT_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_HEIGHT),
            framerate: camera.framerate.unwrap_or(DEFAULT_FRAMERATE),
        };

        let tracking = file.tracking.unwrap_or_default();
        let tracking = TrackingSettings {
            sample_every: tracking.sample_every.unwrap_or(DEFAULT_SAMPLE_EVERY),
            model_path: tracking.model_path,
            input_size: tracking.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
            confidence: tracking.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            class_id: tracking.class_id.unwrap_or(DEFAULT_CLASS_ID),
        };

        let defaults = BufferLimits::default();
        let buffer = file.buffer.unwrap_or_default();
        let buffer = BufferLimits {
            capacity: buffer.capacity.unwrap_or(defaults.capacity),
            ready_at: buffer.ready_at.unwrap_or(defaults.ready_at),
            resume_at: buffer.resume_at.unwrap_or(defaults.resume_at),
            soft_limit: buffer.soft_limit.unwrap_or(defaults.soft_limit),
        };

        let stream = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            fps: stream.fps.unwrap_or(DEFAULT_STREAM_FPS),
            staleness: stream
                .staleness_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_STALENESS),
            jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        Self {
            http_addr,
            telemetry_addr,
            camera,
            tracking,
            buffer,
            stream,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("HABITAT_HTTP_ADDR") {
            if !addr.trim().is_empty() {
                self.http_addr = addr.trim().to_string();
            }
        }
        if let Ok(addr) = std::env::var("HABITAT_TELEMETRY_ADDR") {
            if !addr.trim().is_empty() {
                self.telemetry_addr = addr.trim().to_string();
            }
        }
        if let Ok(program) = std::env::var("HABITAT_CAMERA_PROGRAM") {
            if !program.trim().is_empty() {
                self.camera.program = program;
            }
        }
        if let Ok(args) = std::env::var("HABITAT_CAMERA_EXTRA_ARGS") {
            self.camera.extra_args = split_csv(&args);
        }
        if let Ok(every) = std::env::var("HABITAT_SAMPLE_EVERY") {
            self.tracking.sample_every = every
                .trim()
                .parse()
                .map_err(|_| anyhow!("HABITAT_SAMPLE_EVERY must be an integer frame count"))?;
        }
        if let Ok(path) = std::env::var("HABITAT_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.tracking.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(staleness) = std::env::var("HABITAT_STALENESS_SECS") {
            let seconds: u64 = staleness.trim().parse().map_err(|_| {
                anyhow!("HABITAT_STALENESS_SECS must be an integer number of seconds")
            })?;
            self.stream.staleness = Duration::from_secs(seconds);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        parse_addr("http addr", &self.http_addr)?;
        parse_addr("telemetry addr", &self.telemetry_addr)?;
        if self.camera.program.trim().is_empty() {
            return Err(anyhow!("camera program must not be empty"));
        }
        if self.camera.day_index == self.camera.night_index {
            return Err(anyhow!(
                "day and night cameras must differ (both are {})",
                self.camera.day_index
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.framerate == 0 {
            return Err(anyhow!("camera framerate must be greater than zero"));
        }
        if self.tracking.sample_every == 0 {
            return Err(anyhow!("tracking sample_every must be greater than zero"));
        }
        if self.tracking.input_size == 0 {
            return Err(anyhow!("tracking input_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.tracking.confidence) {
            return Err(anyhow!("tracking confidence must be within 0.0..=1.0"));
        }
        self.buffer.validate()?;
        if self.stream.fps == 0 {
            return Err(anyhow!("stream fps must be greater than zero"));
        }
        if self.stream.staleness.is_zero() {
            return Err(anyhow!("stream staleness_secs must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("stream jpeg_quality must be within 1..=100"));
        }
        Ok(())
    }

    pub fn telemetry_socket_addr(&self) -> Result<SocketAddr> {
        parse_addr("telemetry addr", &self.telemetry_addr)
    }

    pub fn libcamera(&self) -> LibcameraConfig {
        LibcameraConfig {
            program: self.camera.program.clone(),
            extra_args: self.camera.extra_args.clone(),
            width: self.camera.width,
            height: self.camera.height,
            framerate: self.camera.framerate,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            day_index: self.camera.day_index,
            night_index: self.camera.night_index,
            buffer: self.buffer,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            ..PipelineSettings::default()
        }
    }
}

fn parse_addr(label: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| anyhow!("invalid {} '{}': {}", label, value, e))
}

fn read_config_file(path: &Path) -> Result<HabitatdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
