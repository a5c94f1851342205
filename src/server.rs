use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::{
    cache::{CachedGeneration, ResponseCache, cache_key},
    config::AppConfig,
    device::{self, ComputeDevice, MemoryStats},
    error::ServiceError,
    metrics::{MetricsSnapshot, ServiceMetrics},
    model::{GenerationRequest, GenerationResponse, ModelMetadata, ModelRegistry},
    quantization::QuantizationSummary,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
    pub cache: Option<Arc<dyn ResponseCache>>,
    pub metrics: Arc<ServiceMetrics>,
    device: String,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<ModelRegistry>,
        cache: Option<Arc<dyn ResponseCache>>,
    ) -> Result<Self, ServiceError> {
        let metrics = ServiceMetrics::new()
            .map_err(|e| ServiceError::Other(format!("metrics registry: {e}")))?;
        let device = ComputeDevice::resolve(config.device).to_string();
        Ok(Self {
            config,
            registry,
            cache,
            metrics: Arc::new(metrics),
            device,
        })
    }

    /// Device of the loaded model, or the one it will be loaded onto.
    fn device_label(&self) -> String {
        self.registry
            .metadata()
            .map(|m| m.device)
            .unwrap_or_else(|| self.device.clone())
    }

    fn memory(&self) -> MemoryStats {
        let artifact = self.registry.metadata().map(|m| m.size_bytes);
        MemoryStats::sample(artifact, self.config.memory_limit_bytes())
    }
}

#[derive(Serialize)]
struct Endpoints {
    generate: &'static str,
    health: &'static str,
    metrics: &'static str,
}

#[derive(Serialize)]
struct ApiDescription {
    message: &'static str,
    version: &'static str,
    model: String,
    device: String,
    variant: Option<ModelMetadata>,
    endpoints: Endpoints,
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    model: String,
    device: String,
    gpu_available: bool,
    gpu_count: usize,
    gpu_names: Vec<String>,
    model_loaded: bool,
    cache_available: bool,
    cache_backend: Option<&'static str>,
    variant: Option<ModelMetadata>,
    quantization: Option<QuantizationSummary>,
    memory: MemoryStats,
}

#[derive(Serialize)]
struct MetricsReport {
    model: String,
    device: String,
    #[serde(flatten)]
    counters: MetricsSnapshot,
    memory: MemoryStats,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/metrics", get(metrics))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn root(State(state): State<AppState>) -> Json<ApiDescription> {
    Json(ApiDescription {
        message: "LLM API",
        version: env!("CARGO_PKG_VERSION"),
        model: state.config.model_name.clone(),
        device: state.device_label(),
        variant: state.registry.metadata(),
        endpoints: Endpoints {
            generate: "/generate",
            health: "/health",
            metrics: "/metrics",
        },
    })
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let model_loaded = state.registry.is_ready();
    let (status_code, status) = if model_loaded {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "loading")
    };

    let report = HealthReport {
        status,
        model: state.config.model_name.clone(),
        device: state.device_label(),
        gpu_available: device::gpu_available(),
        gpu_count: device::gpu_count(),
        gpu_names: device::gpu_names(),
        model_loaded,
        cache_available: state.cache.is_some(),
        cache_backend: state.cache.as_ref().map(|c| c.backend()),
        variant: state.registry.metadata(),
        quantization: state.registry.quantization().cloned(),
        memory: state.memory(),
    };

    (status_code, Json(report))
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsReport> {
    Json(MetricsReport {
        model: state.config.model_name.clone(),
        device: state.device_label(),
        counters: state.metrics.snapshot(),
        memory: state.memory(),
    })
}

async fn prometheus_metrics(State(state): State<AppState>) -> Result<String, ServiceError> {
    state.metrics.encode()
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ServiceError> {
    let start = Instant::now();
    state.metrics.requests_total.inc();

    let Json(request) =
        payload.map_err(|rejection| ServiceError::InvalidBody(rejection.body_text()))?;
    request.validate()?;

    if !state.registry.is_ready() {
        return Err(ServiceError::ModelLoading);
    }
    if request.stream {
        debug!("streaming requested; returning a single response");
    }

    let params = request.sampling_params();
    let key = cache_key(&request.prompt, &params);

    if let Some(hit) = cache_lookup(&state, &key).await {
        state.metrics.cache_hits.inc();
        let elapsed = start.elapsed().as_secs_f64();
        state.metrics.request_latency.observe(elapsed);
        info!(tokens = hit.tokens_generated, "serving from cache");
        return Ok(Json(GenerationResponse {
            prompt: hit.prompt,
            generated_text: hit.generated_text,
            processing_time: elapsed,
            device_used: hit.device_used,
            cached: true,
            tokens_generated: hit.tokens_generated,
        }));
    }
    state.metrics.cache_misses.inc();

    let generation = match state.registry.generate(request.prompt.clone(), params).await {
        Ok(generation) => generation,
        Err(err) => {
            state.metrics.generation_failures.inc();
            error!(error = %err, "generation error");
            return Err(err);
        }
    };

    let entry = CachedGeneration {
        prompt: request.prompt,
        generated_text: generation.text,
        device_used: state.device_label(),
        tokens_generated: generation.tokens_generated,
    };
    cache_store(&state, &key, &entry).await;

    let elapsed = start.elapsed().as_secs_f64();
    state.metrics.request_latency.observe(elapsed);
    state
        .metrics
        .tokens_generated
        .inc_by(entry.tokens_generated as u64);
    info!(
        tokens = entry.tokens_generated,
        elapsed_secs = elapsed,
        "generated"
    );

    Ok(Json(GenerationResponse {
        prompt: entry.prompt,
        generated_text: entry.generated_text,
        processing_time: elapsed,
        device_used: entry.device_used,
        cached: false,
        tokens_generated: entry.tokens_generated,
    }))
}

async fn cache_lookup(state: &AppState, key: &str) -> Option<CachedGeneration> {
    let cache = state.cache.as_ref()?;
    match cache.get(key).await {
        Ok(hit) => hit,
        Err(err) => {
            warn!(error = %err, "cache read failed");
            None
        }
    }
}

async fn cache_store(state: &AppState, key: &str, entry: &CachedGeneration) {
    let Some(cache) = state.cache.as_ref() else {
        return;
    };
    if let Err(err) = cache.put(key, entry, state.config.cache_ttl).await {
        warn!(error = %err, "cache write failed");
    }
}
