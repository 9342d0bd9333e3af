//! 配置管理
//!
//! 所有可调参数集中在 [`AppConfig`] 中，构造各组件时显式传入，
//! 不在分发和监控代码中散落默认值。
//!
//! 加载顺序:
//!
//! 1. 各配置段的内置默认值
//! 2. TOML配置文件 (`--config` 指定，或默认搜索路径)
//! 3. 环境变量覆盖 (前缀 `CIMM`，层级分隔符 `__`，如 `CIMM__ENGINE__CHUNK_SIZE=20`)

pub mod models;

pub use models::*;
