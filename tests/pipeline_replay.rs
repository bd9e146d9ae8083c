use std::net::UdpSocket;
use std::time::Duration;

use habitat_cam::ingest::{SourceEvent, JPEG_EOI, JPEG_SOI};
use habitat_cam::{
    BoundingBox, BufferLimits, CameraMode, Frame, Pipeline, PipelineSettings, ReplaySource,
    StubTracker, SwitchOutcome, TrackingSampler, UdpTelemetry,
};
use image::{Rgb, RgbImage};

const WAIT: Duration = Duration::from_millis(50);

fn jpeg(shade: u8) -> Vec<u8> {
    Frame::new(RgbImage::from_pixel(16, 16, Rgb([shade, shade, shade])), 0)
        .to_jpeg(90)
        .unwrap()
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        buffer: BufferLimits {
            capacity: 8,
            ready_at: 3,
            resume_at: 1,
            soft_limit: 4,
        },
        ..PipelineSettings::default()
    }
}

fn telemetry_pair() -> (UdpSocket, UdpTelemetry) {
    let logger = UdpSocket::bind("127.0.0.1:0").unwrap();
    logger
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let sink = UdpTelemetry::new(logger.local_addr().unwrap()).unwrap();
    (logger, sink)
}

fn recv_datagram(socket: &UdpSocket) -> String {
    let mut buf = [0u8; 64];
    let n = socket.recv(&mut buf).unwrap();
    String::from_utf8_lossy(&buf[..n]).to_string()
}

fn pump_until_idle(pipeline: &Pipeline, sampler: &mut TrackingSampler) -> usize {
    let mut queued = 0;
    loop {
        let n = pipeline.pump_once(sampler, WAIT).unwrap();
        if n == 0 {
            return queued;
        }
        queued += n;
    }
}

#[test]
fn decodes_frames_split_across_reads_and_reports_position() {
    let first = jpeg(30);
    let second = jpeg(220);
    let (head, tail) = first.split_at(first.len() / 2);

    let mut opening = b"garbage".to_vec();
    opening.extend_from_slice(head);
    let mut middle = tail.to_vec();
    middle.extend_from_slice(b"garbage2");
    middle.extend_from_slice(&second);
    let chunks = vec![opening, middle, b"trailer".to_vec()];

    let source = ReplaySource::new().with_chunks(0, chunks);
    let pipeline = Pipeline::new(Box::new(source), settings());
    pipeline.start().unwrap();

    let (logger, sink) = telemetry_pair();
    let hit = BoundingBox::from_corners(100.0, 50.0, 140.0, 90.0, 0.8);
    let mut sampler = TrackingSampler::new(
        Box::new(StubTracker::scripted([Some(hit)])),
        Box::new(sink),
        10,
    );

    assert_eq!(pump_until_idle(&pipeline, &mut sampler), 2);
    assert_eq!(pipeline.frames().len().unwrap(), 2);
    assert_eq!(pipeline.pending_bytes().unwrap(), b"trailer".len());

    let dark = pipeline.frames().pop().unwrap().unwrap();
    let light = pipeline.frames().pop().unwrap().unwrap();
    assert!(dark.pixels()[0] < 100);
    assert!(light.pixels()[0] > 150);
    assert!(dark.seq() < light.seq());

    // Only the first decoded frame is sampled at an interval of ten.
    assert_eq!(recv_datagram(&logger), "120,70");
    assert_eq!(sampler.ticks(), 2);
}

#[test]
fn samples_every_nth_frame_and_keeps_last_position_on_miss() {
    let frames: Vec<Vec<u8>> = (0..21).map(|i| jpeg(i as u8 * 10)).collect();
    let source = ReplaySource::new().with_frames(0, &frames);
    let pipeline = Pipeline::new(
        Box::new(source),
        PipelineSettings {
            buffer: BufferLimits {
                capacity: 64,
                ready_at: 10,
                resume_at: 2,
                soft_limit: 32,
            },
            ..PipelineSettings::default()
        },
    );
    pipeline.start().unwrap();

    let (logger, sink) = telemetry_pair();
    let hit = BoundingBox::from_corners(0.0, 0.0, 20.0, 10.0, 0.9);
    let tracker = StubTracker::scripted([Some(hit), None, None]);
    let calls = tracker.calls();
    let mut sampler = TrackingSampler::new(Box::new(tracker), Box::new(sink), 10);

    assert_eq!(pump_until_idle(&pipeline, &mut sampler), 21);
    // Frames 0, 10 and 20 are sampled.
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(recv_datagram(&logger), "10,5");
    assert_eq!(recv_datagram(&logger), "10,5");
    assert_eq!(recv_datagram(&logger), "10,5");
    assert!(pipeline.frames().is_ready().unwrap());
}

#[test]
fn mode_switch_replaces_capture_and_drops_stale_bytes() {
    let mut partial = JPEG_SOI.to_vec();
    partial.extend_from_slice(b"day frame cut short");
    let source = ReplaySource::new()
        .with_chunks(0, vec![partial])
        .with_frames(1, &[jpeg(240)]);
    let events = source.events();
    let pipeline = Pipeline::new(Box::new(source), settings());
    pipeline.start().unwrap();

    let mut sampler = TrackingSampler::new(
        Box::new(StubTracker::new()),
        Box::new(habitat_cam::NullSink),
        10,
    );
    assert_eq!(pipeline.pump_once(&mut sampler, WAIT).unwrap(), 0);
    assert!(pipeline.pending_bytes().unwrap() > 0);
    let generation = pipeline.capture_generation().unwrap();

    assert_eq!(
        pipeline.switch_mode(CameraMode::Night).unwrap(),
        SwitchOutcome::Switched(CameraMode::Night)
    );
    assert_eq!(
        pipeline.switch_mode(CameraMode::Night).unwrap(),
        SwitchOutcome::AlreadyActive(CameraMode::Night)
    );
    assert_eq!(pipeline.pending_bytes().unwrap(), 0);
    assert_eq!(pipeline.capture_generation().unwrap(), generation + 1);
    assert_eq!(
        events.snapshot(),
        vec![
            SourceEvent::Started(0),
            SourceEvent::Stopped(0),
            SourceEvent::Started(1)
        ]
    );

    // The night frame decodes on its own; the truncated day bytes never join it.
    assert_eq!(pump_until_idle(&pipeline, &mut sampler), 1);
    let frame = pipeline.frames().pop().unwrap().unwrap();
    assert!(frame.pixels()[0] > 200);

    let status = pipeline.status().unwrap();
    assert_eq!(status.mode, CameraMode::Night);
    assert_eq!(status.camera_index, Some(1));
}

#[test]
fn end_marker_inside_garbage_does_not_produce_a_frame() {
    let mut noise = JPEG_EOI.to_vec();
    noise.extend_from_slice(b"noise");
    let source = ReplaySource::new().with_chunks(0, vec![noise, jpeg(5)]);
    let pipeline = Pipeline::new(Box::new(source), settings());
    pipeline.start().unwrap();

    let mut sampler = TrackingSampler::new(
        Box::new(StubTracker::new()),
        Box::new(habitat_cam::NullSink),
        10,
    );
    assert_eq!(pump_until_idle(&pipeline, &mut sampler), 1);
    assert_eq!(pipeline.status().unwrap().segments_dropped, 0);
}
