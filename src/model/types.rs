use serde::{Deserialize, Serialize};
use validator::Validate;

fn default_max_new_tokens() -> usize {
    100
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

fn default_do_sample() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerationRequest {
    #[validate(length(min = 1, max = 2000, message = "prompt must be 1 to 2000 characters"))]
    pub prompt: String,
    #[serde(default = "default_max_new_tokens")]
    #[validate(range(min = 1, max = 500, message = "max_new_tokens must be between 1 and 500"))]
    pub max_new_tokens: usize,
    #[serde(default = "default_temperature")]
    #[validate(range(min = 0.1, max = 2.0, message = "temperature must be between 0.1 and 2.0"))]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    #[validate(range(min = 0.1, max = 1.0, message = "top_p must be between 0.1 and 1.0"))]
    pub top_p: f64,
    #[serde(default = "default_do_sample")]
    pub do_sample: bool,
    /// Accepted for compatibility; responses are never streamed.
    #[serde(default)]
    pub stream: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            do_sample: default_do_sample(),
            stream: false,
        }
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            do_sample: self.do_sample,
        }
    }
}

/// Decoding knobs handed to the model unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub do_sample: bool,
}

/// Output of a single model invocation, before it is wrapped for HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tokens_generated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub prompt: String,
    pub generated_text: String,
    pub processing_time: f64,
    pub device_used: String,
    pub cached: bool,
    pub tokens_generated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub quantized: bool,
    pub dtype: String,
    pub size_bytes: u64,
    pub device: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: serde_json::Value) -> GenerationRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn omitted_fields_take_defaults() {
        let request = parse(serde_json::json!({ "prompt": "Hello" }));
        assert_eq!(request.max_new_tokens, 100);
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.top_p, 0.9);
        assert!(request.do_sample);
        assert!(!request.stream);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn missing_prompt_fails_to_deserialize() {
        let result: Result<GenerationRequest, _> =
            serde_json::from_value(serde_json::json!({ "max_new_tokens": 10 }));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let hot = parse(serde_json::json!({ "prompt": "hi", "temperature": 5.0 }));
        let errors = hot.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("temperature"));

        let long = parse(serde_json::json!({ "prompt": "hi", "max_new_tokens": 10000 }));
        let errors = long.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("max_new_tokens"));

        let narrow = parse(serde_json::json!({ "prompt": "hi", "top_p": 0.05 }));
        assert!(narrow.validate().is_err());

        let zero = parse(serde_json::json!({ "prompt": "hi", "max_new_tokens": 0 }));
        assert!(zero.validate().is_err());
    }

    #[test]
    fn prompt_length_is_bounded_in_characters() {
        assert!(GenerationRequest::new("").validate().is_err());
        assert!(GenerationRequest::new("é".repeat(2000)).validate().is_ok());
        assert!(GenerationRequest::new("a".repeat(2001)).validate().is_err());
    }

    #[test]
    fn bounds_are_inclusive() {
        let request = parse(serde_json::json!({
            "prompt": "hi",
            "max_new_tokens": 500,
            "temperature": 2.0,
            "top_p": 1.0,
        }));
        assert!(request.validate().is_ok());

        let request = parse(serde_json::json!({
            "prompt": "hi",
            "max_new_tokens": 1,
            "temperature": 0.1,
            "top_p": 0.1,
        }));
        assert!(request.validate().is_ok());
    }
}
