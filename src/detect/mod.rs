mod backend;
pub mod backends;
pub mod labels;
mod result;

pub use backend::DetectorBackend;
pub use backends::{from_settings, ScriptedBackend};
pub use result::{BoundingBox, Detection};
