pub mod app_config;
pub mod endpoint;
pub mod engine;
pub mod notifier;
pub mod registry;

pub use app_config::{AppConfig, MetricsConfig};
pub use endpoint::RedisEndpointConfig;
pub use engine::EngineConfig;
pub use notifier::{NotifierConfig, NotifierKind};
pub use registry::{ModelConfig, RegistryConfig};
