//! # 数据模型
//!
//! 任务分发与结果汇聚引擎的核心数据结构。
//!
//! ## 核心模型
//!
//! ### Task - 任务
//! 一批提交的结构及其未完成的作业句柄，持久化在主存储中并带TTL。
//!
//! ### Chunk - 分块
//! 结构ID到结构文档的有界映射，分页读取的基本单位。
//!
//! ### Destination - 目标节点
//! 为某个模型服务的Worker池实例，同一模型可以有多个。
//!
//! ### Job - 作业
//! 发往目标节点队列的一批结构，完成后由监控器汇聚并删除。
//!
//! ## 状态流转
//!
//! ```text
//! PREPARING → PREPARED → (提交处理) → PROCESSING → PROCESSED
//! ```
//!
//! 所有模型都实现 `serde::Serialize` / `serde::Deserialize`，
//! 以JSON形式存放在共享状态存储中。

pub mod destination;
pub mod job;
pub mod structure;
pub mod task;

pub use destination::*;
pub use job::*;
pub use structure::*;
pub use task::*;
