mod generator;
#[cfg(feature = "tch-backend")]
mod loader;
mod registry;
pub mod sampling;
mod types;

pub use generator::TextGenerator;
#[cfg(feature = "tch-backend")]
pub use loader::TorchScriptModel;
#[cfg(feature = "tch-backend")]
pub use registry::load_model;
pub use registry::ModelRegistry;
pub use types::{Generation, GenerationRequest, GenerationResponse, ModelMetadata, SamplingParams};
