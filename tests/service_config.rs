use std::sync::Mutex;

use tempfile::{tempdir, NamedTempFile};

use fruit_ripeness::config::ServiceConfig;
use fruit_ripeness::{ClassPolicy, RipenessService};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RIPENESS_CONFIG",
        "RIPENESS_API_ADDR",
        "RIPENESS_CLASS_POLICY",
        "RIPENESS_ANNOTATE",
        "RIPENESS_BACKEND",
        "RIPENESS_MODEL_PATH",
        "RIPENESS_CONFIDENCE",
        "RIPENESS_LOG_PATH",
        "RIPENESS_UPLOAD_DIR",
        "RIPENESS_FONT_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": { "addr": "0.0.0.0:9000", "max_request_bytes": 1048576 },
        "pipeline": { "class_policy": "all_with_sentinel", "annotate": false, "jpeg_quality": 75 },
        "detector": { "backend": "scripted", "confidence": 0.4 },
        "persistence": { "in_memory_log": true }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("RIPENESS_CONFIG", file.path());
    std::env::set_var("RIPENESS_CLASS_POLICY", "fruit_only");
    std::env::set_var("RIPENESS_CONFIDENCE", "0.6");

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.max_request_bytes, 1048576);
    assert_eq!(cfg.pipeline.class_policy, ClassPolicy::FruitOnly);
    assert!(!cfg.pipeline.annotate);
    assert_eq!(cfg.pipeline.jpeg_quality, 75);
    assert_eq!(cfg.detector.backend, "scripted");
    assert!((cfg.detector.confidence - 0.6).abs() < f32::EPSILON);
    assert!(cfg.persistence.in_memory_log);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("ripeness.toml");
    std::fs::write(
        &path,
        r#"
[api]
addr = "127.0.0.1:7000"

[pipeline]
tracked_classes = [46, 47]

[detector]
iou = 0.5
"#,
    )
    .expect("write config");
    std::env::set_var("RIPENESS_CONFIG", &path);

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:7000");
    assert_eq!(cfg.pipeline.tracked_classes, Some(vec![46, 47]));
    assert!((cfg.detector.iou - 0.5).abs() < f32::EPSILON);
    assert_eq!(cfg.pipeline.class_policy, ClassPolicy::FruitOnly);

    clear_env();
}

#[test]
fn rejects_unknown_fields_and_bad_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "api": { "port": 5000 } }"#).expect("write config");
    std::env::set_var("RIPENESS_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());

    clear_env();
    std::env::set_var("RIPENESS_CLASS_POLICY", "everything");
    assert!(ServiceConfig::load().is_err());

    clear_env();
    std::env::set_var("RIPENESS_CONFIDENCE", "1.7");
    assert!(ServiceConfig::load().is_err());

    clear_env();
}

#[test]
fn service_builds_from_config_with_persistence() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().expect("temp dir");
    let detections = dir.path().join("detections.json");
    std::fs::write(
        &detections,
        r#"[{"class_id": 49, "confidence": 0.9, "box": [0, 0, 8, 8]}]"#,
    )
    .expect("write detections");
    let config_path = dir.path().join("ripeness.json");
    std::fs::write(
        &config_path,
        format!(
            r#"{{ "detector": {{ "backend": "scripted", "scripted_detections": "{}" }} }}"#,
            detections.display()
        ),
    )
    .expect("write config");

    std::env::set_var("RIPENESS_CONFIG", &config_path);
    std::env::set_var("RIPENESS_LOG_PATH", dir.path().join("log.db"));
    std::env::set_var("RIPENESS_UPLOAD_DIR", dir.path().join("uploads"));
    let cfg = ServiceConfig::load().expect("load config");
    clear_env();

    let service = RipenessService::from_config(&cfg).expect("build service");
    let image = image::RgbImage::from_pixel(16, 16, image::Rgb([230, 120, 20]));
    let payload = service.detect_image(&image).expect("detect");
    assert_eq!(payload.detections.len(), 1);
    assert_eq!(payload.detections[0].label, "orange");
    let url = payload.image_url.expect("upload url");
    assert!(url.starts_with("file://"));

    let csv = String::from_utf8(service.export_csv().unwrap().expect("log configured")).unwrap();
    assert!(csv.lines().nth(1).expect("one row").ends_with(&url));
}

#[test]
fn tract_backend_requires_feature_or_model() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("RIPENESS_BACKEND", "tract");
    std::env::set_var("RIPENESS_MODEL_PATH", "/nonexistent/model.onnx");
    let cfg = ServiceConfig::load().expect("load config");
    clear_env();
    assert!(RipenessService::from_config(&cfg).is_err());
}

#[test]
fn default_config_does_not_start_without_a_detector() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.detector.backend, "tract");
    assert!(RipenessService::from_config(&cfg).is_err());
}

#[test]
fn scripted_backend_requires_a_detections_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("RIPENESS_BACKEND", "scripted");
    let cfg = ServiceConfig::load().expect("load config");
    clear_env();
    let err = RipenessService::from_config(&cfg).err().expect("startup must fail");
    assert!(err.to_string().contains("scripted_detections"));
}

#[test]
fn configured_font_must_load() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempdir().expect("temp dir");
    let detections = dir.path().join("detections.json");
    std::fs::write(&detections, "[]").expect("write detections");
    std::env::set_var("RIPENESS_BACKEND", "scripted");
    std::env::set_var("RIPENESS_FONT_PATH", dir.path().join("missing.ttf"));
    let mut cfg = ServiceConfig::load().expect("load config");
    clear_env();
    cfg.detector.scripted_detections = Some(detections);

    assert_eq!(cfg.pipeline.font_path, Some(dir.path().join("missing.ttf")));
    assert!(RipenessService::from_config(&cfg).is_err());
    cfg.pipeline.font_path = None;
    assert!(RipenessService::from_config(&cfg).is_ok());
}
