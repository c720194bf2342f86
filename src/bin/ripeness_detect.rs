//! ripeness_detect - one-shot ripeness detection on a local image file

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use fruit_ripeness::annotate::Annotator;
use fruit_ripeness::{
    codec, BackendRegistry, ClassPolicy, DetectionPipeline, FruitClassFilter, PipelineOptions,
    ResultEncoder, ScriptedBackend, StatsAggregator,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input image (JPEG or PNG).
    input: PathBuf,
    /// JSON array of precomputed detections `{class_id, confidence, box}`.
    #[arg(long, conflicts_with = "model")]
    detections: Option<PathBuf>,
    /// YOLOv8 ONNX model (requires the backend-tract feature).
    #[arg(long, env = "RIPENESS_MODEL_PATH")]
    model: Option<PathBuf>,
    /// Model input edge length in pixels.
    #[arg(long, default_value_t = 640)]
    #[cfg_attr(not(feature = "backend-tract"), allow(dead_code))]
    input_size: u32,
    /// Minimum class score kept by the model backend.
    #[arg(long, default_value_t = 0.25, value_parser = unit_interval)]
    #[cfg_attr(not(feature = "backend-tract"), allow(dead_code))]
    confidence: f32,
    /// IoU above which overlapping boxes of one class are suppressed.
    #[arg(long, default_value_t = 0.45, value_parser = unit_interval)]
    #[cfg_attr(not(feature = "backend-tract"), allow(dead_code))]
    iou: f32,
    /// TrueType font for captions; a system font is used when omitted.
    #[arg(long, env = "RIPENESS_FONT_PATH")]
    font: Option<PathBuf>,
    /// fruit_only or all_with_sentinel.
    #[arg(long, default_value = "fruit_only")]
    policy: ClassPolicy,
    /// Skip drawing boxes on the output image.
    #[arg(long)]
    no_annotate: bool,
    /// Where to write the annotated JPEG.
    #[arg(long, default_value = "annotated.jpg")]
    output_image: PathBuf,
    /// Where to write the JSON response; stdout when omitted.
    #[arg(long)]
    output_json: Option<PathBuf>,
    /// JPEG quality for the annotated image.
    #[arg(long, default_value_t = codec::DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u8,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let image = codec::decode_image(&bytes)?;

    let registry = build_registry(&args)?;
    registry.warm_up()?;
    let inference = registry.infer(&image)?;

    let mut pipeline = DetectionPipeline::new(
        FruitClassFilter::default(),
        PipelineOptions {
            policy: args.policy,
            annotate: !args.no_annotate,
        },
        Arc::new(StatsAggregator::new()),
    );
    if let Some(font) = &args.font {
        pipeline = pipeline.with_annotator(Annotator::from_font_file(font)?);
    }
    let output = pipeline.run(&image, &inference.detections, &inference.labels);
    let (payload, jpeg) = ResultEncoder::new(args.jpeg_quality).encode(
        output.records,
        &output.annotated,
        pipeline.stats().snapshot(),
    )?;

    std::fs::write(&args.output_image, &jpeg)
        .with_context(|| format!("failed to write {}", args.output_image.display()))?;
    let json = serde_json::to_string_pretty(&payload)?;
    match &args.output_json {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    eprintln!(
        "{} detections, annotated image written to {}",
        payload.detections.len(),
        args.output_image.display()
    );
    Ok(())
}

fn build_registry(args: &Args) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    if let Some(path) = &args.detections {
        registry.register(ScriptedBackend::from_json_file(path)?);
        return Ok(registry);
    }
    match &args.model {
        #[cfg(feature = "backend-tract")]
        Some(model) => {
            let backend = fruit_ripeness::detect::TractBackend::new(model, args.input_size)?
                .with_thresholds(args.confidence, args.iou);
            registry.register(backend);
            Ok(registry)
        }
        #[cfg(not(feature = "backend-tract"))]
        Some(_) => Err(anyhow!("--model requires building with --features backend-tract")),
        None => Err(anyhow!("either --detections or --model is required")),
    }
}

fn unit_interval(value: &str) -> std::result::Result<f32, String> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    if (0.0..=1.0).contains(&parsed) {
        Ok(parsed)
    } else {
        Err(format!("{} is outside [0, 1]", parsed))
    }
}
