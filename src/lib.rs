pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod metrics;
pub mod model;
pub mod quantization;
pub mod server;

pub use cache::{MemoryCache, RedisCache, ResponseCache};
pub use config::AppConfig;
pub use error::ServiceError;
pub use model::{GenerationRequest, GenerationResponse, ModelRegistry, TextGenerator};
pub use server::{AppState, build_router};
