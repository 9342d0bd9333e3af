//! 作业分发与结果汇聚
//!
//! - [`Dispatcher`]: 探测目标节点、按最少排队选择、提交作业
//! - [`CompletionMonitor`]: 轮询完成通道，合并结果并翻转任务状态
//! - [`SubmissionService`]: 对外的创建、处理、分页读取入口
//! - [`TaskStore`] / [`ChunkStore`]: 任务记录与分块存储

pub mod chunk_store;
pub mod dispatcher;
pub mod monitor;
pub mod strategies;
pub mod submission;
pub mod task_store;


pub use chunk_store::{ChunkStore, MergeOutcome};
pub use dispatcher::{Dispatcher, NewTask, TaskTarget};
pub use monitor::{CompletionMonitor, NoticeOutcome, SweepStats};
pub use strategies::*;
pub use submission::{SubmissionService, TaskPage};
pub use task_store::TaskStore;
