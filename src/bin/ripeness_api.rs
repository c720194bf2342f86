//! ripeness_api - HTTP service for fruit ripeness detection
//!
//! This daemon:
//! 1. Loads configuration (RIPENESS_CONFIG file, RIPENESS_* env overrides)
//! 2. Loads and warms up the detector; failure here is fatal
//! 3. Serves /detect, /stats, /health and /detections.csv until Ctrl-C

use anyhow::Result;
use std::sync::{mpsc, Arc};

use fruit_ripeness::{
    api::{ApiConfig, ApiServer},
    RipenessService, ServiceConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::load()?;
    log::info!(
        "class policy {:?}, annotate {}, detector backend {}",
        config.pipeline.class_policy,
        config.pipeline.annotate,
        config.detector.backend
    );
    let service = Arc::new(RipenessService::from_config(&config)?);

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_request_bytes: config.max_request_bytes,
    };
    let api_handle = ApiServer::new(api_config, service).spawn()?;
    log::info!("ripeness api listening on {}", api_handle.addr);
    if let Some(path) = &config.persistence.log_path {
        log::info!("detection log: {}", path);
    }
    if let Some(dir) = &config.persistence.upload_dir {
        log::info!("annotated uploads: {}", dir.display());
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("ripeness_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
