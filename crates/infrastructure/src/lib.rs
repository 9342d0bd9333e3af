//! 共享状态存储、作业队列、模型目录和推送的具体实现

pub mod memory;
pub mod notifier;
pub mod redis_store;
pub mod registry;

pub use memory::{InMemoryDestinationHub, InMemoryStateStore};
pub use notifier::{build_notifier, HttpTaskNotifier, NoopTaskNotifier, RedisTaskNotifier};
pub use redis_store::{RedisConnectionManager, RedisDestinationConnector, RedisStateStore};
pub use registry::StaticDestinationRegistry;
