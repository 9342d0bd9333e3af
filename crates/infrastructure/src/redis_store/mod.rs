//! Redis实现
//!
//! - [`RedisConnectionManager`]: 主存储连接，带重试
//! - [`RedisStateStore`]: 任务与分块记录、租约、推送
//! - [`RedisJobQueue`]: 目标节点上的作业队列
//! - [`RedisCompletionChannel`]: 完成通道订阅，非阻塞轮询
//! - [`RedisDestinationConnector`]: 按端点缓存连接

pub mod completion_channel;
pub mod connection_manager;
pub mod connector;
pub mod job_queue;
pub mod state_store;

pub use completion_channel::RedisCompletionChannel;
pub use connection_manager::RedisConnectionManager;
pub use connector::RedisDestinationConnector;
pub use job_queue::RedisJobQueue;
pub use state_store::RedisStateStore;
