//! # CIMM Testing Utils
//!
//! 各crate共用的测试工具:
//!
//! - **Builders**: 结构、目标节点、模型目录的构建器
//! - **FakeWorker**: 从目标节点队列取作业、写回结果并发布完成通知
//! - **Redis容器**: 基于testcontainers的集成测试环境
//! - **TestEnv**: 等待异步条件成立
//!
//! ```toml
//! [dev-dependencies]
//! cimm-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod worker;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use worker::*;
