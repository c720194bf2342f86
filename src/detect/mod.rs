mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{CocoLabels, DetectorBackend, Inference, LabelSource, LabelTable};
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::BackendRegistry;
pub use result::{BoundingBox, RawDetection};
