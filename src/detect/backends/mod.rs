pub mod scripted;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::ScriptedBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use anyhow::Result;

use crate::config::{BackendKind, DetectorSettings};
use crate::detect::backend::DetectorBackend;

/// Build the configured backend. The returned backend is not loaded yet.
pub fn from_settings(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend {
        BackendKind::Scripted => {
            let backend: Box<dyn DetectorBackend> = match &settings.scene_path {
                Some(path) => Box::new(ScriptedBackend::from_path(path)),
                None => Box::new(ScriptedBackend::demo()),
            };
            Ok(backend)
        }
        BackendKind::Tract => tract_backend(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn tract_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("tract backend requires detector.model_path"))?;
    Ok(Box::new(
        TractBackend::new(model_path, settings.input_width, settings.input_height)
            .with_limits(settings.max_boxes, settings.min_score),
    ))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_backend(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    anyhow::bail!("tract backend requires the backend-tract feature")
}
