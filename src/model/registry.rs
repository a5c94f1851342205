use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::task;

use crate::{
    error::ServiceError,
    model::{Generation, ModelMetadata, SamplingParams, TextGenerator},
    quantization::QuantizationSummary,
};

struct LoadedModel {
    generator: Arc<dyn TextGenerator>,
    quantization: Option<QuantizationSummary>,
}

/// Holds the process-wide model once it has finished loading.
///
/// Starts empty so the HTTP listener can come up (and report not-ready)
/// while weights are still being read.
#[derive(Default)]
pub struct ModelRegistry {
    loaded: OnceCell<LoadedModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(generator: Arc<dyn TextGenerator>) -> Self {
        let registry = Self::new();
        // A fresh cell cannot already be populated.
        let _ = registry.install(generator, None);
        registry
    }

    pub fn install(
        &self,
        generator: Arc<dyn TextGenerator>,
        quantization: Option<QuantizationSummary>,
    ) -> Result<(), ServiceError> {
        self.loaded
            .set(LoadedModel {
                generator,
                quantization,
            })
            .map_err(|_| ServiceError::Other("model already installed".into()))
    }

    pub fn is_ready(&self) -> bool {
        self.loaded.get().is_some()
    }

    pub fn metadata(&self) -> Option<ModelMetadata> {
        self.loaded.get().map(|m| m.generator.metadata())
    }

    pub fn quantization(&self) -> Option<&QuantizationSummary> {
        self.loaded.get().and_then(|m| m.quantization.as_ref())
    }

    pub async fn generate(
        &self,
        prompt: String,
        params: SamplingParams,
    ) -> Result<Generation, ServiceError> {
        let generator = self
            .loaded
            .get()
            .map(|m| m.generator.clone())
            .ok_or(ServiceError::ModelLoading)?;

        task::spawn_blocking(move || generator.generate(&prompt, &params))
            .await
            .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }
}

/// Reads weights and tokenizer for the configured device.
#[cfg(feature = "tch-backend")]
pub fn load_model(
    config: &crate::config::AppConfig,
) -> Result<(Arc<dyn TextGenerator>, QuantizationSummary), ServiceError> {
    use crate::{device::ComputeDevice, model::TorchScriptModel, quantization::VariantPlan};

    let device = ComputeDevice::resolve(config.device);
    let plan = VariantPlan::select(device, config);
    tracing::info!(
        model = %config.model_name,
        %device,
        path = %plan.module_path.display(),
        "initializing model"
    );

    let model = TorchScriptModel::load(config, device, &plan)?;
    let summary = plan.summary(model.metadata().size_bytes);
    Ok((Arc::new(model), summary))
}
