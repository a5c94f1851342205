use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{config::AppConfig, device::ComputeDevice, device::format_bytes, error::ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Int8,
    Float16,
    Float32,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Int8 => "int8",
            Precision::Float16 => "float16",
            Precision::Float32 => "float32",
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, Precision::Int8)
    }
}

/// Which artifact to load and at what precision.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantPlan {
    pub precision: Precision,
    pub module_path: PathBuf,
    pub baseline_path: PathBuf,
}

impl VariantPlan {
    /// int8 artifact on CUDA when one was exported, otherwise the full module
    /// in half precision on CUDA and single precision on CPU.
    pub fn select(device: ComputeDevice, config: &AppConfig) -> Self {
        let baseline_path = config.module_path.clone();
        let (precision, module_path) = if device.is_cuda() && config.quantized_module_path.exists()
        {
            (Precision::Int8, config.quantized_module_path.clone())
        } else if device.is_cuda() {
            (Precision::Float16, baseline_path.clone())
        } else {
            (Precision::Float32, baseline_path.clone())
        };

        Self {
            precision,
            module_path,
            baseline_path,
        }
    }

    /// Size of the selected artifact, refusing anything above the memory ceiling.
    pub fn artifact_size(&self, limit_bytes: u64) -> Result<u64, ServiceError> {
        if !self.module_path.exists() {
            return Err(ServiceError::Other(format!(
                "model artifact missing: {}",
                self.module_path.display()
            )));
        }
        let size_bytes = fs::metadata(&self.module_path)?.len();
        if size_bytes > limit_bytes {
            return Err(ServiceError::Other(format!(
                "model artifact {} is {} which exceeds the {} memory ceiling",
                self.module_path.display(),
                format_bytes(size_bytes),
                format_bytes(limit_bytes),
            )));
        }
        Ok(size_bytes)
    }

    pub fn summary(&self, loaded_size_bytes: u64) -> QuantizationSummary {
        let baseline_size = if self.precision.is_quantized() {
            file_size(&self.baseline_path)
        } else {
            None
        };
        QuantizationSummary::new(self.precision, loaded_size_bytes, baseline_size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuantizationSummary {
    pub precision: Precision,
    pub loaded_size_bytes: u64,
    pub baseline_size_bytes: Option<u64>,
    pub size_reduction_percent: Option<f64>,
}

impl QuantizationSummary {
    pub fn new(precision: Precision, loaded_size_bytes: u64, baseline_size: Option<u64>) -> Self {
        let reduction = baseline_size.map(|baseline| {
            if baseline == 0 {
                0.0
            } else {
                let diff = baseline.saturating_sub(loaded_size_bytes) as f64;
                (diff / baseline as f64) * 100.0
            }
        });

        QuantizationSummary {
            precision,
            loaded_size_bytes,
            baseline_size_bytes: baseline_size,
            size_reduction_percent: reduction,
        }
    }
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}
