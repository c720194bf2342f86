//! Fruit ripeness detection service
//!
//! Runs an object detector over an image, keeps the fruit detections,
//! classifies each fruit crop as unripe, ripe or overripe from its mean
//! HSV saturation and value, and returns the records together with an
//! annotated JPEG preview and process-wide ripeness counts.
//!
//! # Module Structure
//!
//! - `detect`: detector trait, backend registry, raw detections and boxes
//! - `ripeness`: HSV color classifier
//! - `classes`: tracked fruit classes and class policy
//! - `pipeline`: per-image clip, filter, classify, count, annotate
//! - `stats`: thread-safe ripeness counters
//! - `response`, `codec`, `annotate`: output rendering
//! - `storage`: detection log and upload collaborators
//! - `service`, `api`, `config`: request orchestration and the HTTP surface

pub mod annotate;
pub mod api;
pub mod classes;
pub mod codec;
pub mod config;
pub mod detect;
pub mod error;
pub mod pipeline;
pub mod response;
pub mod ripeness;
pub mod service;
pub mod stats;
pub mod storage;

pub use classes::{ClassPolicy, FruitClassFilter, DEFAULT_TRACKED_CLASSES};
pub use config::ServiceConfig;
pub use detect::{BackendRegistry, BoundingBox, DetectorBackend, RawDetection, ScriptedBackend};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{DetectionPipeline, DetectionRecord, PipelineOptions, PipelineOutput};
pub use response::{ErrorBody, ResponsePayload, ResultEncoder};
pub use ripeness::RipenessCategory;
pub use service::RipenessService;
pub use stats::{RipenessStats, StatsAggregator};
