use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::error::{PipelineError, PipelineResult};

use super::backend::{DetectorBackend, Inference, LabelTable};

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::infer` takes `&mut self`.
/// The mutex doubles as the inference lock: concurrent requests are serialized
/// per backend, so runtimes that are not safe for parallel inference stay correct.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Mutex<dyn DetectorBackend>>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Warm up every registered backend. Failures here are startup failures.
    pub fn warm_up(&self) -> Result<()> {
        for (name, backend) in &self.backends {
            let mut guard = backend
                .lock()
                .map_err(|_| anyhow!("backend '{}' lock poisoned", name))?;
            guard.warm_up()?;
        }
        Ok(())
    }

    /// Run the default backend on `image`.
    ///
    /// Labels for every emitted class id are captured while the lock is held.
    pub fn infer(&self, image: &RgbImage) -> PipelineResult<Inference> {
        let backend = self
            .default_backend()
            .ok_or_else(|| PipelineError::Detector("no detector backend registered".into()))?;
        let mut guard = backend
            .lock()
            .map_err(|_| PipelineError::Detector("detector lock poisoned".into()))?;
        let detections = guard.infer(image).map_err(PipelineError::detector)?;
        let labels = LabelTable::capture(&*guard, &detections);
        Ok(Inference { detections, labels })
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
