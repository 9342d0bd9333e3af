use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    endpoint::RedisEndpointConfig, engine::EngineConfig, notifier::NotifierConfig,
    registry::RegistryConfig,
};

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub primary: RedisEndpointConfig,
    pub engine: EngineConfig,
    pub notifier: NotifierConfig,
    pub registry: RegistryConfig,
    pub metrics: MetricsConfig,
}

/// Prometheus指标导出
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: "0.0.0.0:9100".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled {
            self.listen_address
                .parse::<std::net::SocketAddr>()
                .with_context(|| format!("无效的指标监听地址: {}", self.listen_address))?;
        }
        Ok(())
    }
}

const DEFAULT_PATHS: [&str; 3] = ["config/cimm.toml", "cimm.toml", "/etc/cimm/config.toml"];

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// `config_path` 为空时依次尝试默认路径，都不存在则只使用内置默认值。
    /// 环境变量优先级最高。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_PATHS.iter().find(|p| Path::new(p).exists()) {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("CIMM")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.primary.validate().context("主存储配置验证失败")?;
        self.engine.validate().context("引擎配置验证失败")?;
        self.notifier.validate().context("推送配置验证失败")?;
        self.registry.validate().context("模型目录配置验证失败")?;
        self.metrics.validate().context("指标配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifierKind;
    use crate::models::ModelKind;
    use std::io::Write;

    const SAMPLE: &str = r#"
[primary]
host = "redis.internal"
port = 6380

[engine]
chunk_size = 20
poll_interval_ms = 500

[notifier]
kind = "http"
publish_url = "http://nchan.internal/pub/"

[[registry.models]]
id = 1
name = "standardizer"
kind = "PREPARER"
object = "prepare"

[[registry.models.destinations]]
id = 10
model_id = 1
host = "worker-a"
queue_name = "prepare"

[[registry.models]]
id = 2
name = "logp"
kind = "MOLECULE_MODELING"
object = "logp"

[[registry.models.destinations]]
id = 20
model_id = 2
host = "worker-b"
port = 6390
queue_name = "logp"
"#;

    #[test]
    fn test_from_toml_fills_defaults() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.primary.host, "redis.internal");
        assert_eq!(config.primary.port, 6380);
        assert_eq!(config.engine.chunk_size, 20);
        assert_eq!(config.engine.task_ttl_seconds, 86400);
        assert_eq!(config.notifier.kind, NotifierKind::Http);
        assert_eq!(config.registry.models.len(), 2);
        assert_eq!(config.registry.models[0].kind, ModelKind::Preparer);
        assert_eq!(config.registry.models[0].destinations[0].port, 6379);
        assert_eq!(config.registry.models[1].destinations[0].port, 6390);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.engine.poll_interval_ms, 500);
        assert_eq!(config.registry.models[1].name, "logp");
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AppConfig::load(Some("/nonexistent/cimm.toml")).is_err());
    }

    #[test]
    fn test_invalid_section_reported() {
        let err = AppConfig::from_toml("[engine]\nchunk_size = 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("引擎配置验证失败"));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let rendered = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&rendered).unwrap(), config);
    }
}
