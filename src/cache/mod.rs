//! Best-effort response cache.
//!
//! The cache sits in front of the model: a hit skips inference entirely, a
//! failure of the backing store is logged and treated as a miss. Nothing in
//! this module is allowed to fail a request.

mod memory;
mod redis_store;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{config::AppConfig, model::SamplingParams};

pub use self::memory::MemoryCache;
pub use self::redis_store::RedisCache;

pub const KEY_PREFIX: &str = "llm:";
pub const MEMORY_URL: &str = "memory://";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// What is stored per key: enough to rebuild a response without the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedGeneration {
    pub prompt: String,
    pub generated_text: String,
    pub device_used: String,
    pub tokens_generated: usize,
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedGeneration>, CacheError>;

    async fn put(
        &self,
        key: &str,
        value: &CachedGeneration,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    fn backend(&self) -> &'static str;
}

/// Parameters that influence the output, in sorted key order.
///
/// Greedy decoding ignores temperature and nucleus size, so they are left
/// out of the key when sampling is off.
#[derive(Serialize)]
struct KeyParams {
    do_sample: bool,
    max_new_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

impl From<&SamplingParams> for KeyParams {
    fn from(params: &SamplingParams) -> Self {
        let sampled = params.do_sample;
        Self {
            do_sample: params.do_sample,
            max_new_tokens: params.max_new_tokens,
            temperature: sampled.then_some(params.temperature),
            top_p: sampled.then_some(params.top_p),
        }
    }
}

pub fn cache_key(prompt: &str, params: &SamplingParams) -> String {
    // Serializing a plain struct of scalars cannot fail.
    let params = serde_json::to_string(&KeyParams::from(params)).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(b":");
    hasher.update(params.as_bytes());
    format!("{KEY_PREFIX}{:x}", hasher.finalize())
}

/// Builds the configured cache. An unreachable store disables caching.
pub async fn connect(config: &AppConfig) -> Option<Arc<dyn ResponseCache>> {
    let url = config.cache_url.as_deref()?;

    if url == MEMORY_URL {
        tracing::info!("using in-process response cache");
        return Some(Arc::new(MemoryCache::new()));
    }

    match RedisCache::connect(url, config.cache_timeout).await {
        Ok(cache) => {
            tracing::info!("redis cache connected");
            Some(Arc::new(cache))
        }
        Err(err) => {
            tracing::warn!(error = %err, "redis not available, caching disabled");
            None
        }
    }
}
