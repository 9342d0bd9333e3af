//! 内存实现
//!
//! 单进程部署和测试使用，语义与Redis实现保持一致:
//! 键过期、SET NX 租约、完成通道非阻塞轮询、端点可达性。

pub mod destination_hub;
pub mod state_store;

pub use destination_hub::{InMemoryDestinationHub, InMemoryJobQueue};
pub use state_store::InMemoryStateStore;
