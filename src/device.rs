use std::{fmt, fs, str::FromStr};

use serde::Serialize;

/// Device requested through `DEVICE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Cpu,
    Cuda(usize),
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lower = raw.trim().to_lowercase();
        match lower.as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|idx| idx.parse().ok())
                .map(Self::Cuda)
                .ok_or_else(|| format!("unknown device {raw:?}, expected auto, cpu or cuda[:N]")),
        }
    }
}

/// Device the model actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
}

impl ComputeDevice {
    /// Resolves a preference against the hardware visible to libtorch.
    /// An unavailable CUDA request degrades to CPU.
    pub fn resolve(preference: DevicePreference) -> Self {
        match preference {
            DevicePreference::Cpu => Self::Cpu,
            DevicePreference::Auto if gpu_available() => Self::Cuda(0),
            DevicePreference::Auto => Self::Cpu,
            DevicePreference::Cuda(idx) if idx < gpu_count() => Self::Cuda(idx),
            DevicePreference::Cuda(idx) => {
                tracing::warn!(index = idx, "requested CUDA device not available, using cpu");
                Self::Cpu
            }
        }
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, Self::Cuda(_))
    }

    #[cfg(feature = "tch-backend")]
    pub fn as_tch(&self) -> tch::Device {
        match *self {
            Self::Cpu => tch::Device::Cpu,
            Self::Cuda(idx) => tch::Device::Cuda(idx),
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

#[cfg(feature = "tch-backend")]
pub fn gpu_available() -> bool {
    tch::Cuda::is_available()
}

#[cfg(not(feature = "tch-backend"))]
pub fn gpu_available() -> bool {
    false
}

#[cfg(feature = "tch-backend")]
pub fn gpu_count() -> usize {
    if tch::Cuda::is_available() {
        tch::Cuda::device_count().max(0) as usize
    } else {
        0
    }
}

#[cfg(not(feature = "tch-backend"))]
pub fn gpu_count() -> usize {
    0
}

/// Marketing names of the NVIDIA GPUs the driver exposes, e.g.
/// `NVIDIA A100-SXM4-40GB`. Empty without the proprietary driver.
pub fn gpu_names() -> Vec<String> {
    let Ok(dirs) = fs::read_dir("/proc/driver/nvidia/gpus") else {
        return Vec::new();
    };
    let mut gpus: Vec<(String, String)> = dirs
        .filter_map(Result::ok)
        .filter_map(|dir| {
            let info = fs::read_to_string(dir.path().join("information")).ok()?;
            let name = parse_gpu_model(&info)?;
            Some((dir.file_name().to_string_lossy().into_owned(), name))
        })
        .collect();
    // bus ids sort in device order
    gpus.sort();
    gpus.into_iter().map(|(_, name)| name).collect()
}

fn parse_gpu_model(information: &str) -> Option<String> {
    let line = information.lines().find(|line| line.starts_with("Model:"))?;
    let name = line.trim_start_matches("Model:").trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub process_resident: Option<String>,
    pub model_artifact: Option<String>,
    pub memory_limit: String,
}

impl MemoryStats {
    pub fn sample(model_artifact_bytes: Option<u64>, limit_bytes: u64) -> Self {
        Self {
            process_resident: resident_set_bytes().map(format_bytes),
            model_artifact: model_artifact_bytes.map(format_bytes),
            memory_limit: format_bytes(limit_bytes),
        }
    }
}

/// Resident set size of this process. Only available where `/proc` exists.
pub fn resident_set_bytes() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kib: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kib * 1024)
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}
