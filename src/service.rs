//! Request-level orchestration: decode, infer, run the pipeline, encode,
//! then persist on a best-effort basis.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::annotate::Annotator;
use crate::classes::FruitClassFilter;
use crate::codec;
use crate::config::{DetectorSettings, ServiceConfig};
use crate::detect::{BackendRegistry, ScriptedBackend};
use crate::error::PipelineError;
use crate::pipeline::{DetectionPipeline, PipelineOptions};
use crate::response::{ResponsePayload, ResultEncoder};
use crate::stats::{RipenessStats, StatsAggregator};
use crate::storage::{
    upload_tags, write_csv, DetectionLog, FilesystemUpload, InMemoryDetectionLog,
    SqliteDetectionLog, UploadService,
};

pub struct RipenessService {
    registry: BackendRegistry,
    pipeline: DetectionPipeline,
    encoder: ResultEncoder,
    log: Option<Mutex<Box<dyn DetectionLog>>>,
    upload: Option<Box<dyn UploadService>>,
}

impl RipenessService {
    pub fn new(registry: BackendRegistry, pipeline: DetectionPipeline, encoder: ResultEncoder) -> Self {
        Self {
            registry,
            pipeline,
            encoder,
            log: None,
            upload: None,
        }
    }

    pub fn with_log<L: DetectionLog + 'static>(mut self, log: L) -> Self {
        self.log = Some(Mutex::new(Box::new(log)));
        self
    }

    pub fn with_upload<U: UploadService + 'static>(mut self, upload: U) -> Self {
        self.upload = Some(Box::new(upload));
        self
    }

    /// Builds the service described by `cfg`. Detector load failures are
    /// returned here and are fatal for the process.
    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        let registry = build_registry(&cfg.detector)?;
        registry.warm_up()?;

        let filter = match &cfg.pipeline.tracked_classes {
            Some(ids) => FruitClassFilter::new(ids.iter().copied()),
            None => FruitClassFilter::default(),
        };
        if filter.is_empty() {
            log::warn!("no tracked fruit classes configured; no detection will be classified");
        } else {
            log::info!("tracking {} fruit classes", filter.len());
        }
        let mut pipeline = DetectionPipeline::new(
            filter,
            PipelineOptions {
                policy: cfg.pipeline.class_policy,
                annotate: cfg.pipeline.annotate,
            },
            Arc::new(StatsAggregator::new()),
        );
        if let Some(font) = &cfg.pipeline.font_path {
            pipeline = pipeline.with_annotator(Annotator::from_font_file(font)?);
        }
        let mut service = Self::new(registry, pipeline, ResultEncoder::new(cfg.pipeline.jpeg_quality));

        if let Some(path) = &cfg.persistence.log_path {
            service = service.with_log(SqliteDetectionLog::open(path)?);
        } else if cfg.persistence.in_memory_log {
            service = service.with_log(InMemoryDetectionLog::new());
        }
        if let Some(dir) = &cfg.persistence.upload_dir {
            service = service.with_upload(FilesystemUpload::new(dir)?);
        }
        Ok(service)
    }

    pub fn stats(&self) -> RipenessStats {
        self.pipeline.stats().snapshot()
    }

    /// Full request path for a data URL (or bare base64) image.
    pub fn detect_data_url(&self, data_url: &str) -> Result<ResponsePayload> {
        let image = codec::decode_data_url(data_url)?;
        self.detect_image(&image)
    }

    /// Full request path for encoded image bytes.
    pub fn detect_bytes(&self, bytes: &[u8]) -> Result<ResponsePayload> {
        let image = codec::decode_image(bytes)?;
        self.detect_image(&image)
    }

    /// Runs detection on an already decoded image.
    ///
    /// Errors are `PipelineError::Detector` for detector failures; anything
    /// else is an internal failure. Persistence failures never surface here.
    pub fn detect_image(&self, image: &RgbImage) -> Result<ResponsePayload> {
        let inference = self.registry.infer(image)?;
        let output = self
            .pipeline
            .run(image, &inference.detections, &inference.labels);
        let stats = self.pipeline.stats().snapshot();
        let (mut payload, jpeg) = self.encoder.encode(output.records, &output.annotated, stats)?;
        payload.image_url = self.persist(&payload, &jpeg);
        Ok(payload)
    }

    fn persist(&self, payload: &ResponsePayload, jpeg: &[u8]) -> Option<String> {
        let image_url = match &self.upload {
            Some(upload) => match upload
                .upload(jpeg, &upload_tags(&payload.detections))
                .map_err(PipelineError::upload)
            {
                Ok(url) => Some(url),
                Err(err) => {
                    log::warn!("{}", err);
                    None
                }
            },
            None => None,
        };
        if let Some(log) = &self.log {
            let result = log
                .lock()
                .map_err(|_| anyhow!("detection log lock poisoned"))
                .and_then(|mut log| log.append(&payload.detections, image_url.as_deref()));
            if let Err(err) = result {
                log::warn!("{}", PipelineError::upload(err));
            }
        }
        image_url
    }

    /// Detection log as CSV, or `None` when no log is configured.
    pub fn export_csv(&self) -> Result<Option<Vec<u8>>> {
        let Some(log) = &self.log else {
            return Ok(None);
        };
        let entries = log
            .lock()
            .map_err(|_| anyhow!("detection log lock poisoned"))?
            .entries()?;
        let mut out = Vec::new();
        write_csv(&entries, &mut out)?;
        Ok(Some(out))
    }
}

/// Registers the configured backend.
pub fn build_registry(settings: &DetectorSettings) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    match settings.backend.as_str() {
        "scripted" => {
            let path = settings.scripted_detections.as_ref().ok_or_else(|| {
                anyhow!("detector backend 'scripted' requires detector.scripted_detections")
            })?;
            registry.register(ScriptedBackend::from_json_file(path)?);
        }
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let backend = crate::detect::TractBackend::new(&settings.model_path, settings.input_size)?
                .with_thresholds(settings.confidence, settings.iou);
            registry.register(backend);
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => {
            return Err(anyhow!(
                "detector backend 'tract' requires building with --features backend-tract"
            ))
        }
        other => return Err(anyhow!("unknown detector backend '{}'", other)),
    }
    log::info!(
        "detector backends: {} (default {})",
        registry.list().join(", "),
        registry.default_name().unwrap_or("none")
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, RawDetection};
    use crate::ripeness::RipenessCategory;
    use image::Rgb;

    struct FailingUpload;

    impl UploadService for FailingUpload {
        fn upload(&self, _jpeg: &[u8], _tags: &[String]) -> Result<String> {
            Err(anyhow!("bucket unavailable"))
        }
    }

    fn service(detections: Vec<RawDetection>) -> RipenessService {
        let mut registry = BackendRegistry::new();
        registry.register(ScriptedBackend::new(detections));
        let pipeline = DetectionPipeline::new(
            FruitClassFilter::default(),
            PipelineOptions::default(),
            Arc::new(StatsAggregator::new()),
        );
        RipenessService::new(registry, pipeline, ResultEncoder::default())
    }

    fn apple() -> RawDetection {
        RawDetection {
            class_id: 47,
            confidence: 0.66,
            bbox: BoundingBox::new(0, 0, 20, 20),
        }
    }

    fn red_image() -> RgbImage {
        RgbImage::from_pixel(32, 32, Rgb([220, 40, 30]))
    }

    #[test]
    fn upload_failure_keeps_the_response() {
        let service = service(vec![apple()])
            .with_upload(FailingUpload)
            .with_log(InMemoryDetectionLog::new());
        let payload = service.detect_image(&red_image()).unwrap();
        assert_eq!(payload.detections.len(), 1);
        assert_eq!(payload.detections[0].ripeness, RipenessCategory::Ripe);
        assert_eq!(payload.image_url, None);
        assert_eq!(service.stats().count(RipenessCategory::Ripe), 1);

        let csv = String::from_utf8(service.export_csv().unwrap().unwrap()).unwrap();
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn export_without_log_is_none() {
        assert!(service(vec![]).export_csv().unwrap().is_none());
    }

    #[test]
    fn scripted_backend_without_detections_file_is_rejected() {
        let settings = DetectorSettings {
            backend: "scripted".into(),
            scripted_detections: None,
            ..ServiceConfig::default().detector
        };
        let err = build_registry(&settings).err().expect("must fail");
        assert!(err.to_string().contains("scripted_detections"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let settings = DetectorSettings {
            backend: "magic".into(),
            ..ServiceConfig::default().detector
        };
        assert!(build_registry(&settings).is_err());
    }
}
