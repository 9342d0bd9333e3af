//! 任务分发与结果汇聚引擎的核心库
//!
//! 数据模型、错误类型、配置模型、Worker输出契约，以及存储、队列、
//! 模型目录和推送等协作方的trait定义。具体实现位于 `cimm-infrastructure`。

pub mod config;
pub mod contract;
pub mod errors;
pub mod models;
pub mod traits;

pub use contract::{WorkerContract, FAILURE_KEY};
pub use errors::{CimmError, CimmResult};
