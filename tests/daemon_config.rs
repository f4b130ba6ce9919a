use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use clipwatch::config::DaemonConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CLIPWATCH_CONFIG",
        "CLIPWATCH_OUTPUT_ROOT",
        "CLIPWATCH_DB_PATH",
        "CLIPWATCH_COOLDOWN_SECS",
        "CLIPWATCH_CLASSIFIER",
        "CLIPWATCH_MODEL_PATH",
        "CLIPWATCH_CAMERAS",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "output_root": "/srv/clips",
            "db_path": "events.db",
            "window": { "size": 8, "input_size": 112 },
            "recorder": {
                "fps": 10,
                "segment_secs": 5.0,
                "before_secs": 12.0,
                "after_secs": 15.0,
                "width": 320,
                "height": 240
            },
            "alerts": { "cooldown_secs": 30, "confidence_threshold": 0.75 },
            "classifier": { "backend": "stub" },
            "cameras": [
                { "id": 1, "kind": "http", "locator": "10.0.0.5", "zone": "Zone:Lobby" },
                { "id": 2, "kind": "rtsp", "locator": "rtsp://10.0.0.6/live" }
            ]
        }"#,
    );

    std::env::set_var("CLIPWATCH_CONFIG", file.path());
    std::env::set_var("CLIPWATCH_DB_PATH", "override.db");
    std::env::set_var("CLIPWATCH_COOLDOWN_SECS", "90");

    let cfg = DaemonConfig::load().expect("load config");

    assert_eq!(cfg.output_root, PathBuf::from("/srv/clips"));
    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.window.size, 8);
    assert_eq!(cfg.window.input_size, 112);
    assert_eq!(cfg.alerts.cooldown, Duration::from_secs(90));
    assert!((cfg.alerts.confidence_threshold - 0.75).abs() < 1e-6);
    assert_eq!(cfg.classifier.backend, "stub");
    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.cameras[0].zone.as_deref(), Some("zone:lobby"));

    let settings = cfg.worker_settings().expect("worker settings");
    assert_eq!(settings.recorder.fps, 10);
    assert_eq!(settings.recorder.frames_per_segment, 50);
    // 12s before at 5s segments rounds up to three segments.
    assert_eq!(settings.recorder.buffer_capacity, 3);
    assert_eq!(settings.recorder.after_frames, 150);
    assert_eq!(settings.source.width, 320);
    assert_eq!(settings.source.height, 240);

    let handles = cfg.camera_handles().expect("camera handles");
    assert_eq!(handles[0].stream_url(), "http://10.0.0.5:8080/video");
    assert_eq!(handles[0].zone.as_deref(), Some("zone:lobby"));
    assert_eq!(handles[1].stream_url(), "rtsp://10.0.0.6/live");

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
output_root = "clips"

[classifier]
backend = "Motion"

[worker]
read_retry_ms = 250
stop_timeout_secs = 2

[[cameras]]
id = 9
kind = "url"
locator = "stub://loading-bay"
"#,
    );

    let cfg = DaemonConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.output_root, PathBuf::from("clips"));
    assert_eq!(cfg.classifier.backend, "motion");
    assert_eq!(cfg.worker.read_retry, Duration::from_millis(250));
    assert_eq!(cfg.worker.stop_timeout, Duration::from_secs(2));
    assert_eq!(cfg.cameras.len(), 1);
    assert_eq!(cfg.cameras[0].locator, "stub://loading-bay");

    clear_env();
}

#[test]
fn cameras_from_env_replace_file_cameras() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{ "cameras": [ { "id": 1, "kind": "http", "locator": "10.0.0.5" } ] }"#,
    );
    std::env::set_var("CLIPWATCH_CONFIG", file.path());
    std::env::set_var(
        "CLIPWATCH_CAMERAS",
        "3=rtsp:10.0.0.7, 4=url:stub://lobby",
    );

    let cfg = DaemonConfig::load().expect("load config");
    let handles = cfg.camera_handles().expect("camera handles");
    assert_eq!(handles.len(), 2);
    assert_eq!(handles[0].id, 3);
    assert_eq!(handles[0].stream_url(), "rtsp://10.0.0.7:554/");
    assert_eq!(handles[1].id, 4);
    assert_eq!(handles[1].stream_url(), "stub://lobby");

    std::env::set_var("CLIPWATCH_CAMERAS", "lobby");
    assert!(DaemonConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        r#"{ "cameras": [ { "id": 1, "kind": "http", "locator": "a", "zone": "lobby" } ] }"#,
        r#"{ "cameras": [
            { "id": 1, "kind": "http", "locator": "a" },
            { "id": 1, "kind": "rtsp", "locator": "b" }
        ] }"#,
        r#"{ "cameras": [ { "id": 1, "kind": "onvif", "locator": "a" } ] }"#,
        r#"{ "cameras": [ { "id": 1, "kind": "http", "locator": "  " } ] }"#,
        r#"{ "alerts": { "confidence_threshold": 1.0 } }"#,
        r#"{ "classifier": { "backend": "tract" } }"#,
        r#"{ "classifier": { "backend": "opencv" } }"#,
        r#"{ "window": { "size": 0 } }"#,
        r#"{ "recorder": { "fps": 0 } }"#,
    ];
    for body in cases {
        let file = config_file(".json", body);
        assert!(
            DaemonConfig::load_from(Some(file.path())).is_err(),
            "accepted {}",
            body
        );
    }

    std::env::set_var("CLIPWATCH_COOLDOWN_SECS", "soon");
    assert!(DaemonConfig::load_from(None).is_err());

    clear_env();
}
