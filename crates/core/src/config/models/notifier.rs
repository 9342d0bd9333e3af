use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    None,
    Http,
    Redis,
}

/// 任务就绪推送配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    /// HTTP推送地址前缀，实际地址为 `publish_url + owner`
    pub publish_url: Option<String>,
    /// Redis频道前缀，实际频道为 `channel_prefix + owner`
    pub channel_prefix: String,
    pub request_timeout_seconds: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::None,
            publish_url: None,
            channel_prefix: "task_ready:".to_string(),
            request_timeout_seconds: 5,
        }
    }
}

impl NotifierConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.kind {
            NotifierKind::Http => {
                let url = self
                    .publish_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("HTTP推送需要配置publish_url"))?;
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(anyhow::anyhow!("无效的推送地址: {}", url));
                }
                if self.request_timeout_seconds == 0 {
                    return Err(anyhow::anyhow!("推送请求超时必须大于0"));
                }
            }
            NotifierKind::Redis => {
                if self.channel_prefix.is_empty() {
                    return Err(anyhow::anyhow!("Redis推送需要配置channel_prefix"));
                }
            }
            NotifierKind::None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_requires_url() {
        let config = NotifierConfig {
            kind: NotifierKind::Http,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NotifierConfig {
            kind: NotifierKind::Http,
            publish_url: Some("http://nchan/pub/".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
