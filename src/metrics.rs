use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::Serialize;

use crate::error::ServiceError;

/// Request counters for one service instance.
///
/// Kept in an owned registry rather than the process-global default so that
/// several routers (tests, mostly) can coexist in one process.
pub struct ServiceMetrics {
    registry: Registry,
    pub requests_total: IntCounter,
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub generation_failures: IntCounter,
    pub tokens_generated: IntCounter,
    pub request_latency: Histogram,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_cached: u64,
    pub cache_misses: u64,
    pub generation_failures: u64,
    pub tokens_generated_total: u64,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total =
            IntCounter::new("llm_requests_total", "Total number of generation requests")?;
        let cache_hits = IntCounter::new("llm_cache_hits_total", "Total cache hits")?;
        let cache_misses = IntCounter::new("llm_cache_misses_total", "Total cache misses")?;
        let generation_failures =
            IntCounter::new("llm_generation_failures_total", "Total failed generations")?;
        let tokens_generated =
            IntCounter::new("llm_tokens_generated_total", "Total tokens produced by the model")?;
        let request_latency = Histogram::with_opts(
            HistogramOpts::new(
                "llm_request_latency_seconds",
                "Generation request latency in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(generation_failures.clone()))?;
        registry.register(Box::new(tokens_generated.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            cache_hits,
            cache_misses,
            generation_failures,
            tokens_generated,
            request_latency,
        })
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.get(),
            requests_cached: self.cache_hits.get(),
            cache_misses: self.cache_misses.get(),
            generation_failures: self.generation_failures.get(),
            tokens_generated_total: self.tokens_generated.get(),
        }
    }

    /// Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, ServiceError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ServiceError::Other(format!("metrics encoding failed: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| ServiceError::Other(format!("metrics encoding failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tracks_counters() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.requests_total.inc_by(3);
        metrics.cache_hits.inc();
        metrics.cache_misses.inc_by(2);
        metrics.tokens_generated.inc_by(40);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 3);
        assert_eq!(snapshot.requests_cached, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert_eq!(snapshot.generation_failures, 0);
        assert_eq!(snapshot.tokens_generated_total, 40);
    }

    #[test]
    fn independent_instances_do_not_collide() {
        let first = ServiceMetrics::new().unwrap();
        let second = ServiceMetrics::new().unwrap();
        first.cache_hits.inc();
        assert_eq!(second.cache_hits.get(), 0);
    }

    #[test]
    fn encodes_text_exposition() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.requests_total.inc();
        metrics.request_latency.observe(0.2);
        let text = metrics.encode().unwrap();
        assert!(text.contains("llm_requests_total 1"));
        assert!(text.contains("llm_request_latency_seconds_bucket"));
    }
}
