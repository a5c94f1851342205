use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_inference_service::{AppConfig, AppState, ModelRegistry, build_router, cache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    let registry = Arc::new(ModelRegistry::new());
    let response_cache = cache::connect(config.as_ref()).await;

    let state = AppState::new(config.clone(), registry.clone(), response_cache)?;
    let router = build_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, model = %config.model_name, "REST server ready, loading model");

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    let serve = async move { server.await };
    tokio::pin!(serve);

    // A model that fails to load takes the whole process down; the platform
    // restarts it.
    tokio::select! {
        served = &mut serve => return served.map_err(Into::into),
        loaded = load_model(config, registry) => {
            if let Err(err) = loaded {
                tracing::error!(error = %err, "model initialization failed");
                return Err(err);
            }
        }
    }

    serve.await?;
    Ok(())
}

#[cfg(feature = "tch-backend")]
async fn load_model(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> anyhow::Result<()> {
    let (generator, summary) =
        tokio::task::spawn_blocking(move || llm_inference_service::model::load_model(&config))
            .await??;
    registry.install(generator, Some(summary))?;
    tracing::info!("model initialized successfully");
    Ok(())
}

#[cfg(not(feature = "tch-backend"))]
async fn load_model(_config: Arc<AppConfig>, _registry: Arc<ModelRegistry>) -> anyhow::Result<()> {
    anyhow::bail!("built without a model backend; enable the `tch-backend` feature")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
