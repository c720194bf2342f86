use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::classes::ClassPolicy;
use crate::codec::DEFAULT_JPEG_QUALITY;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    detector: Option<DetectorConfigFile>,
    persistence: Option<PersistenceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    max_request_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    class_policy: Option<ClassPolicy>,
    annotate: Option<bool>,
    jpeg_quality: Option<u8>,
    tracked_classes: Option<Vec<u16>>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    iou: Option<f32>,
    scripted_detections: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PersistenceConfigFile {
    log_path: Option<String>,
    in_memory_log: Option<bool>,
    upload_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub max_request_bytes: usize,
    pub pipeline: PipelineSettings,
    pub detector: DetectorSettings,
    pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub class_policy: ClassPolicy,
    pub annotate: bool,
    pub jpeg_quality: u8,
    /// `None` keeps the default fruit set.
    pub tracked_classes: Option<Vec<u16>>,
    /// Caption font; a well-known system font is used when unset.
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub confidence: f32,
    pub iou: f32,
    /// JSON detections replayed by the scripted backend.
    pub scripted_detections: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    /// SQLite detection log; takes precedence over the in-memory log.
    pub log_path: Option<String>,
    pub in_memory_log: bool,
    pub upload_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(ServiceConfigFile::default())
    }
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RIPENESS_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let persistence = file.persistence.unwrap_or_default();
        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_request_bytes: api.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES),
            pipeline: PipelineSettings {
                class_policy: pipeline.class_policy.unwrap_or_default(),
                annotate: pipeline.annotate.unwrap_or(true),
                jpeg_quality: pipeline.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                tracked_classes: pipeline.tracked_classes,
                font_path: pipeline.font_path,
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_size: detector.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                iou: detector.iou.unwrap_or(DEFAULT_IOU),
                scripted_detections: detector.scripted_detections,
            },
            persistence: PersistenceSettings {
                log_path: persistence.log_path,
                in_memory_log: persistence.in_memory_log.unwrap_or(false),
                upload_dir: persistence.upload_dir,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("RIPENESS_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(policy) = std::env::var("RIPENESS_CLASS_POLICY") {
            if !policy.trim().is_empty() {
                self.pipeline.class_policy = policy.parse()?;
            }
        }
        if let Ok(annotate) = std::env::var("RIPENESS_ANNOTATE") {
            self.pipeline.annotate = parse_bool(&annotate)
                .ok_or_else(|| anyhow!("RIPENESS_ANNOTATE must be true or false"))?;
        }
        if let Ok(path) = std::env::var("RIPENESS_FONT_PATH") {
            if !path.trim().is_empty() {
                self.pipeline.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(backend) = std::env::var("RIPENESS_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("RIPENESS_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path);
            }
        }
        if let Ok(confidence) = std::env::var("RIPENESS_CONFIDENCE") {
            self.detector.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("RIPENESS_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(path) = std::env::var("RIPENESS_LOG_PATH") {
            if !path.trim().is_empty() {
                self.persistence.log_path = Some(path);
            }
        }
        if let Ok(dir) = std::env::var("RIPENESS_UPLOAD_DIR") {
            if !dir.trim().is_empty() {
                self.persistence.upload_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(anyhow!("detector confidence must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detector.iou) {
            return Err(anyhow!("detector iou must be within [0, 1]"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if !(1..=100).contains(&self.pipeline.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.max_request_bytes == 0 {
            return Err(anyhow!("max_request_bytes must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().and_then(|ext| ext.to_str()) == Some("toml");
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
