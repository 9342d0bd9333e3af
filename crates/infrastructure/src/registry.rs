use async_trait::async_trait;
use cimm_core::config::RegistryConfig;
use cimm_core::models::{Destination, ModelDescriptor};
use cimm_core::traits::DestinationRegistry;
use cimm_core::CimmResult;

/// 基于配置文件的静态模型目录
#[derive(Debug, Clone)]
pub struct StaticDestinationRegistry {
    config: RegistryConfig,
}

impl StaticDestinationRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DestinationRegistry for StaticDestinationRegistry {
    async fn list_models(&self) -> CimmResult<Vec<ModelDescriptor>> {
        Ok(self.config.models.iter().map(|m| m.descriptor()).collect())
    }

    async fn get_model(&self, model_id: i64) -> CimmResult<Option<ModelDescriptor>> {
        Ok(self
            .config
            .models
            .iter()
            .find(|m| m.id == model_id)
            .map(|m| m.descriptor()))
    }

    async fn list_destinations(&self, model_id: i64) -> CimmResult<Vec<Destination>> {
        Ok(self
            .config
            .models
            .iter()
            .filter(|m| m.id == model_id)
            .flat_map(|m| m.destinations.iter().cloned())
            .collect())
    }

    async fn all_destinations(&self) -> CimmResult<Vec<Destination>> {
        Ok(self
            .config
            .models
            .iter()
            .flat_map(|m| m.destinations.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cimm_core::config::ModelConfig;
    use cimm_core::models::ModelKind;

    fn destination(id: i64, model_id: i64) -> Destination {
        Destination {
            id,
            model_id,
            host: format!("worker-{id}"),
            port: 6379,
            password: None,
            queue_name: "q".to_string(),
        }
    }

    fn registry() -> StaticDestinationRegistry {
        StaticDestinationRegistry::new(RegistryConfig {
            models: vec![
                ModelConfig {
                    id: 1,
                    name: "prep".to_string(),
                    kind: ModelKind::Preparer,
                    object: "prepare".to_string(),
                    destinations: vec![destination(1, 1)],
                },
                ModelConfig {
                    id: 2,
                    name: "logp".to_string(),
                    kind: ModelKind::MoleculeModeling,
                    object: "logp".to_string(),
                    destinations: vec![destination(3, 2), destination(2, 2)],
                },
            ],
        })
    }

    #[tokio::test]
    async fn test_destinations_keep_registration_order() {
        let ids: Vec<i64> = registry()
            .list_destinations(2)
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_preparer_lookup() {
        let registry = registry();
        assert_eq!(registry.preparer().await.unwrap().unwrap().id, 1);
        assert!(registry.get_model(9).await.unwrap().is_none());
        assert_eq!(registry.all_destinations().await.unwrap().len(), 3);
    }
}
