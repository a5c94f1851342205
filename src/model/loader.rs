use parking_lot::Mutex;
use tch::{IValue, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;

use crate::{
    config::AppConfig,
    device::ComputeDevice,
    error::ServiceError,
    model::{Generation, ModelMetadata, SamplingParams, TextGenerator, sampling},
    quantization::{Precision, VariantPlan},
};

const EOS_TOKENS: [&str; 3] = ["<|endoftext|>", "</s>", "<eos>"];

/// A TorchScript causal LM plus its tokenizer, run through libtorch.
pub struct TorchScriptModel {
    name: String,
    precision: Precision,
    size_bytes: u64,
    device: ComputeDevice,
    eos_token_id: u32,
    tokenizer: Tokenizer,
    module: Mutex<tch::CModule>,
}

impl TorchScriptModel {
    pub fn load(
        config: &AppConfig,
        device: ComputeDevice,
        plan: &VariantPlan,
    ) -> Result<Self, ServiceError> {
        let size_bytes = plan.artifact_size(config.memory_limit_bytes())?;

        let tokenizer = Tokenizer::from_file(config.tokenizer_path.as_path())
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let eos_token_id = EOS_TOKENS
            .iter()
            .find_map(|token| tokenizer.token_to_id(token))
            .unwrap_or(config.eos_token_id);

        let mut module = tch::CModule::load_on_device(&plan.module_path, device.as_tch())
            .map_err(|e| ServiceError::from_inference(e.to_string()))?;
        if plan.precision == Precision::Float16 {
            module.to(device.as_tch(), Kind::Half, false);
        }
        module.set_eval();

        tracing::info!(
            model = %config.model_name,
            %device,
            precision = plan.precision.as_str(),
            size_bytes,
            eos_token_id,
            "model weights loaded"
        );

        Ok(Self {
            name: config.model_name.clone(),
            precision: plan.precision,
            size_bytes,
            device,
            eos_token_id,
            tokenizer,
            module: Mutex::new(module),
        })
    }

    fn last_logits(&self, module: &tch::CModule, ids: &[i64]) -> Result<Vec<f32>, ServiceError> {
        let input = Tensor::from_slice(ids)
            .reshape([1, ids.len() as i64])
            .to(self.device.as_tch());

        let output = module
            .forward_is(&[IValue::Tensor(input)])
            .map_err(|e| ServiceError::from_inference(e.to_string()))?;

        // Traced GPT-style modules return either bare logits or (logits, past).
        let logits = match output {
            IValue::Tensor(t) => t,
            IValue::Tuple(ref items) => match items.first() {
                Some(IValue::Tensor(t)) => t.shallow_clone(),
                _ => {
                    return Err(ServiceError::Inference(
                        "expected tensor as first tuple element".into(),
                    ));
                }
            },
            _ => {
                return Err(ServiceError::Inference(
                    "unexpected model output format".into(),
                ));
            }
        };

        // [1, seq_len, vocab] -> [vocab]
        let row = logits
            .select(1, -1)
            .squeeze()
            .to_kind(Kind::Float)
            .to(tch::Device::Cpu);
        Vec::<f32>::try_from(&row).map_err(|e| ServiceError::from_inference(e.to_string()))
    }
}

impl TextGenerator for TorchScriptModel {
    fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<Generation, ServiceError> {
        if prompt.trim().is_empty() {
            return Err(ServiceError::BadRequest("prompt must not be empty".into()));
        }

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        if input_ids.is_empty() {
            input_ids.push(self.eos_token_id as i64);
        }
        let prompt_len = input_ids.len();

        let mut rng = rand::thread_rng();
        no_grad(|| {
            let module = self.module.lock();
            for _ in 0..params.max_new_tokens {
                let logits = self.last_logits(&module, &input_ids)?;
                let next = sampling::next_token(&logits, params, &mut rng)?;
                if next == self.eos_token_id {
                    break;
                }
                input_ids.push(next as i64);
            }
            Ok::<(), ServiceError>(())
        })?;

        let generated: Vec<u32> = input_ids[prompt_len..].iter().map(|&id| id as u32).collect();
        let text = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

        Ok(Generation {
            text,
            tokens_generated: generated.len(),
        })
    }

    fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            name: self.name.clone(),
            quantized: self.precision.is_quantized(),
            dtype: self.precision.as_str().to_string(),
            size_bytes: self.size_bytes,
            device: self.device.to_string(),
        }
    }
}
