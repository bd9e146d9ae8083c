use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use habitat_cam::config::HabitatdConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "HABITAT_CONFIG",
        "HABITAT_HTTP_ADDR",
        "HABITAT_TELEMETRY_ADDR",
        "HABITAT_CAMERA_PROGRAM",
        "HABITAT_CAMERA_EXTRA_ARGS",
        "HABITAT_SAMPLE_EVERY",
        "HABITAT_MODEL_PATH",
        "HABITAT_STALENESS_SECS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_match_deployment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = HabitatdConfig::load().expect("load defaults");

    assert_eq!(cfg.http_addr, "0.0.0.0:5005");
    assert_eq!(cfg.telemetry_addr, "127.0.0.1:5005");
    assert_eq!(cfg.camera.program, "libcamera-vid");
    assert_eq!((cfg.camera.day_index, cfg.camera.night_index), (0, 1));
    assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
    assert_eq!(cfg.tracking.sample_every, 10);
    assert!(cfg.tracking.model_path.is_none());
    assert_eq!(cfg.buffer.capacity, 1800);
    assert_eq!(cfg.buffer.ready_at, 300);
    assert_eq!(cfg.buffer.resume_at, 30);
    assert_eq!(cfg.buffer.soft_limit, 900);
    assert_eq!(cfg.stream.fps, 30);
    assert_eq!(cfg.stream.staleness, Duration::from_secs(180));

    let args = cfg.libcamera().command_args(cfg.camera.day_index);
    assert!(args.ends_with(&["--camera".to_string(), "0".to_string()]));
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "http": { "addr": "127.0.0.1:8080" },
            "camera": {
                "program": "/usr/bin/rpicam-vid",
                "extra_args": ["--hflip"],
                "day_index": 1,
                "night_index": 0,
                "width": 1280,
                "height": 720,
                "framerate": 25
            },
            "tracking": { "sample_every": 5, "confidence": 0.4, "class_id": 15 },
            "buffer": { "capacity": 600, "ready_at": 100, "resume_at": 10, "soft_limit": 300 },
            "stream": { "fps": 15, "staleness_secs": 60, "jpeg_quality": 70 },
            "telemetry": { "addr": "127.0.0.1:6000" }
        }"#,
    );

    std::env::set_var("HABITAT_CONFIG", file.path());
    std::env::set_var("HABITAT_TELEMETRY_ADDR", "127.0.0.1:7000");
    std::env::set_var("HABITAT_SAMPLE_EVERY", "3");
    std::env::set_var("HABITAT_MODEL_PATH", "/opt/models/yolov8n.onnx");
    std::env::set_var("HABITAT_STALENESS_SECS", "90");

    let cfg = HabitatdConfig::load().expect("load config");

    assert_eq!(cfg.http_addr, "127.0.0.1:8080");
    assert_eq!(cfg.telemetry_addr, "127.0.0.1:7000");
    assert_eq!(cfg.camera.program, "/usr/bin/rpicam-vid");
    assert_eq!(cfg.camera.extra_args, vec!["--hflip"]);
    assert_eq!((cfg.camera.day_index, cfg.camera.night_index), (1, 0));
    assert_eq!(cfg.camera.framerate, 25);
    assert_eq!(cfg.tracking.sample_every, 3);
    assert_eq!(
        cfg.tracking.model_path,
        Some(PathBuf::from("/opt/models/yolov8n.onnx"))
    );
    assert_eq!(cfg.tracking.class_id, 15);
    assert_eq!(cfg.buffer.capacity, 600);
    assert_eq!(cfg.stream.fps, 15);
    assert_eq!(cfg.stream.staleness, Duration::from_secs(90));
    assert_eq!(cfg.stream.jpeg_quality, 70);

    let settings = cfg.pipeline_settings();
    assert_eq!(settings.day_index, 1);
    assert_eq!(settings.buffer.ready_at, 100);

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let same_camera = write_config(r#"{ "camera": { "day_index": 2, "night_index": 2 } }"#);
    std::env::set_var("HABITAT_CONFIG", same_camera.path());
    let err = HabitatdConfig::load().unwrap_err();
    assert!(err.to_string().contains("must differ"));

    let inverted = write_config(r#"{ "buffer": { "ready_at": 20, "resume_at": 40 } }"#);
    std::env::set_var("HABITAT_CONFIG", inverted.path());
    let err = HabitatdConfig::load().unwrap_err();
    assert!(err.to_string().contains("resume_at"));

    clear_env();
    std::env::set_var("HABITAT_SAMPLE_EVERY", "0");
    assert!(HabitatdConfig::load().is_err());

    clear_env();
    std::env::set_var("HABITAT_SAMPLE_EVERY", "often");
    let err = HabitatdConfig::load().unwrap_err();
    assert!(err.to_string().contains("HABITAT_SAMPLE_EVERY"));

    clear_env();
    std::env::set_var("HABITAT_HTTP_ADDR", "not-an-address");
    let err = HabitatdConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid http addr"));

    clear_env();
    let malformed = write_config("{ not json");
    std::env::set_var("HABITAT_CONFIG", malformed.path());
    let err = HabitatdConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
