use crate::{
    error::ServiceError,
    model::{Generation, ModelMetadata, SamplingParams},
};

/// A loaded model that turns a prompt into a continuation.
///
/// `generate` blocks the calling thread for the whole decode; callers on the
/// async runtime go through [`crate::model::ModelRegistry`], which moves the
/// call onto the blocking pool.
pub trait TextGenerator: Send + Sync + 'static {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<Generation, ServiceError>;

    fn metadata(&self) -> ModelMetadata;
}
