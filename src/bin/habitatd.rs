//! habitatd - habitat camera daemon
//!
//! This daemon:
//! 1. Runs the capture tool for the active camera (Day at startup)
//! 2. Decodes its MJPEG output into a bounded frame buffer
//! 3. Samples frames for tracking and sends positions over UDP
//! 4. Serves the live feed and camera-mode control over HTTP

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use habitat_cam::{
    api::{ApiConfig, ApiServer},
    HabitatdConfig, LibcameraSource, MotionTracker, Pipeline, StubTracker, Tracker,
    TrackingSampler, UdpTelemetry,
};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum TrackerKind {
    /// ONNX detector when a model is configured, frame differencing otherwise.
    Auto,
    Motion,
    /// Never reports a position.
    Stub,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Habitat camera capture, streaming and tracking daemon")]
struct Args {
    /// JSON config file.
    #[arg(long, env = "HABITAT_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address for the feed and control API.
    #[arg(long)]
    http_addr: Option<String>,

    /// UDP destination for "x,y" position datagrams.
    #[arg(long)]
    telemetry_addr: Option<String>,

    /// ONNX detection model (requires the backend-tract feature).
    #[arg(long)]
    model: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = TrackerKind::Auto)]
    tracker: TrackerKind,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = HabitatdConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        cfg.http_addr = addr;
    }
    if let Some(addr) = args.telemetry_addr {
        cfg.telemetry_addr = addr;
    }
    if let Some(model) = args.model {
        cfg.tracking.model_path = Some(model);
    }
    cfg.validate()?;

    let telemetry = UdpTelemetry::new(cfg.telemetry_socket_addr()?)?;
    let tracker = build_tracker(args.tracker, &cfg)?;
    let mut sampler = TrackingSampler::new(tracker, Box::new(telemetry), cfg.tracking.sample_every);
    sampler.warm_up().context("tracker warm-up failed")?;

    let source = LibcameraSource::new(cfg.libcamera());
    let pipeline = Arc::new(Pipeline::new(Box::new(source), cfg.pipeline_settings()));
    pipeline.start().context("failed to start initial capture")?;

    let capture_pipeline = pipeline.clone();
    let capture = std::thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            if let Err(err) = capture_pipeline.run_capture_loop(sampler) {
                log::error!("capture loop stopped: {:#}", err);
            }
        })
        .context("spawn capture thread")?;

    let api_config = ApiConfig {
        addr: cfg.http_addr.clone(),
        stream: cfg.stream.clone(),
    };
    let api_handle = match ApiServer::new(api_config, pipeline.clone()).spawn() {
        Ok(handle) => handle,
        Err(err) => {
            pipeline.shutdown()?;
            return Err(err);
        }
    };

    log::info!(
        "habitatd running: feed http://{}/video_feed, telemetry udp {}",
        api_handle.addr,
        cfg.telemetry_addr
    );
    log::info!(
        "buffer capacity {} frames (ready at {}, resume at {}), staleness sweep every {}s",
        cfg.buffer.capacity,
        cfg.buffer.ready_at,
        cfg.buffer.resume_at,
        cfg.stream.staleness.as_secs()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting signal handler")?;

    let _ = rx.recv();
    log::info!("shutdown signal received, stopping capture and http server...");
    api_handle.stop()?;
    pipeline.shutdown()?;
    capture
        .join()
        .map_err(|_| anyhow!("capture thread panicked"))?;
    log::info!("habitatd stopped");
    Ok(())
}

fn build_tracker(kind: TrackerKind, cfg: &HabitatdConfig) -> Result<Box<dyn Tracker>> {
    match kind {
        TrackerKind::Stub => Ok(Box::new(StubTracker::new())),
        TrackerKind::Motion => Ok(Box::new(MotionTracker::new())),
        TrackerKind::Auto => match &cfg.tracking.model_path {
            Some(path) => model_tracker(path, cfg),
            None => Ok(Box::new(MotionTracker::new())),
        },
    }
}

#[cfg(feature = "backend-tract")]
fn model_tracker(path: &std::path::Path, cfg: &HabitatdConfig) -> Result<Box<dyn Tracker>> {
    let tracker = habitat_cam::track::TractTracker::new(path, cfg.tracking.input_size)?
        .with_threshold(cfg.tracking.confidence)
        .with_class(cfg.tracking.class_id);
    Ok(Box::new(tracker))
}

#[cfg(not(feature = "backend-tract"))]
fn model_tracker(path: &std::path::Path, _cfg: &HabitatdConfig) -> Result<Box<dyn Tracker>> {
    Err(anyhow!(
        "model {} configured but habitatd was built without the backend-tract feature",
        path.display()
    ))
}
