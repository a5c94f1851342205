use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use anyhow::Context;

use crate::device::DevicePreference;

const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_name: String,
    pub module_path: PathBuf,
    pub quantized_module_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub device: DevicePreference,
    pub max_memory_gb: u64,
    pub eos_token_id: u32,
    pub cache_url: Option<String>,
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = match env::var("SERVER_ADDR") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("SERVER_ADDR is not a socket address: {raw}"))?,
            Err(_) => {
                let port = parse_var("PORT", DEFAULT_PORT)?;
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
            }
        };

        let model_name =
            env::var("MODEL_NAME").unwrap_or_else(|_| "microsoft/DialoGPT-medium".to_string());

        let module_path =
            PathBuf::from(env::var("MODULE_PATH").unwrap_or_else(|_| "models/model.ts".into()));
        let quantized_module_path = PathBuf::from(
            env::var("QUANTIZED_MODULE_PATH").unwrap_or_else(|_| "models/model_int8.ts".into()),
        );
        let tokenizer_path = PathBuf::from(
            env::var("TOKENIZER_PATH").unwrap_or_else(|_| "models/tokenizer.json".into()),
        );

        let device = parse_var("DEVICE", DevicePreference::Auto)?;
        let max_memory_gb = parse_var("MAX_MEMORY_GB", 12)?;
        let eos_token_id = parse_var("EOS_TOKEN_ID", 50256)?;

        let cache_url = env::var("CACHE_URL").ok().filter(|url| !url.trim().is_empty());
        let cache_ttl = Duration::from_secs(parse_var("CACHE_TTL_SECS", 3600)?);
        let cache_timeout = Duration::from_millis(parse_var("CACHE_TIMEOUT_MS", 1000)?);

        Ok(Self {
            listen_addr,
            model_name,
            module_path,
            quantized_module_path,
            tokenizer_path,
            device,
            max_memory_gb,
            eos_token_id,
            cache_url,
            cache_ttl,
            cache_timeout,
        })
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.max_memory_gb.saturating_mul(1024 * 1024 * 1024)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            model_name: "microsoft/DialoGPT-medium".to_string(),
            module_path: PathBuf::from("models/model.ts"),
            quantized_module_path: PathBuf::from("models/model_int8.ts"),
            tokenizer_path: PathBuf::from("models/tokenizer.json"),
            device: DevicePreference::Auto,
            max_memory_gb: 12,
            eos_token_id: 50256,
            cache_url: None,
            cache_ttl: Duration::from_secs(3600),
            cache_timeout: Duration::from_millis(1000),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {name} ({raw:?}): {e}")),
        _ => Ok(default),
    }
}
