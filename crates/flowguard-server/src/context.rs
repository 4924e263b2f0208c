//! Application context wiring

use std::sync::Arc;

use flowguard_cache::{
    CacheConnection, DistributedLocker, MemoryQueue, QueueOperations, RedisLockBackend, RedisQueue,
};
use flowguard_common::IdGenerator;
use flowguard_rules::{
    ApiDefinitionStore, ConfigService, DegradeRuleStore, DynamicRuleStore, FlowRuleStore,
    NacosConfigClient, RuleEntity,
};
use tracing::{info, warn};

use crate::settings::Settings;

/// Shared services built once at startup
pub struct AppContext {
    pub settings: Settings,
    pub config_service: Arc<dyn ConfigService>,
    pub id_generator: Arc<IdGenerator>,
    pub locker: DistributedLocker,
    pub queue: Arc<dyn QueueOperations>,
    pub flow_rules: FlowRuleStore,
    pub degrade_rules: DegradeRuleStore,
    pub api_definitions: ApiDefinitionStore,
}

impl AppContext {
    /// Build the context against the configured Nacos servers.
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let config_service: Arc<dyn ConfigService> =
            Arc::new(NacosConfigClient::new(settings.nacos.clone())?);
        Self::with_config_service(settings, config_service).await
    }

    pub async fn with_config_service(
        settings: Settings,
        config_service: Arc<dyn ConfigService>,
    ) -> anyhow::Result<Self> {
        let id_generator = Arc::new(settings.id.generator()?);

        let (locker, queue): (DistributedLocker, Arc<dyn QueueOperations>) = match &settings.redis {
            Some(cache) => {
                let connection = CacheConnection::connect(cache).await?;
                (
                    DistributedLocker::new(Arc::new(RedisLockBackend::new(connection.clone()))),
                    Arc::new(RedisQueue::new(connection)),
                )
            }
            None => {
                warn!("No redis section configured, locks and queues are local to this process");
                (DistributedLocker::memory(), Arc::new(MemoryQueue::new()))
            }
        };

        let flow_rules = rule_store(&settings, &config_service, &id_generator, &locker);
        let degrade_rules = rule_store(&settings, &config_service, &id_generator, &locker);
        let api_definitions = rule_store(&settings, &config_service, &id_generator, &locker);

        info!(
            worker_id = id_generator.worker_id(),
            datacenter_id = id_generator.datacenter_id(),
            group = %settings.nacos.group,
            shared_cache = settings.redis.is_some(),
            "Application context ready"
        );

        Ok(Self {
            settings,
            config_service,
            id_generator,
            locker,
            queue,
            flow_rules,
            degrade_rules,
            api_definitions,
        })
    }
}

fn rule_store<T: RuleEntity>(
    settings: &Settings,
    config_service: &Arc<dyn ConfigService>,
    id_generator: &Arc<IdGenerator>,
    locker: &DistributedLocker,
) -> DynamicRuleStore<T> {
    DynamicRuleStore::new(config_service.clone(), id_generator.clone(), locker.clone())
        .with_settings(settings.store.clone())
        .with_group(&settings.nacos.group)
        .with_read_timeout(settings.nacos.read_timeout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowguard_rules::{FlowRuleEntity, MemoryConfigService};

    fn memory_context_settings() -> Settings {
        let mut settings = Settings::default();
        settings.id.worker_id = Some(2);
        settings.id.datacenter_id = Some(4);
        settings.nacos.group = "TEST_GROUP".to_string();
        settings
    }

    #[tokio::test]
    async fn test_memory_context_wiring() {
        let service = Arc::new(MemoryConfigService::new());
        let context = AppContext::with_config_service(memory_context_settings(), service.clone())
            .await
            .unwrap();

        assert_eq!(context.id_generator.worker_id(), 2);
        assert_eq!(context.id_generator.datacenter_id(), 4);

        let saved = context
            .flow_rules
            .save(FlowRuleEntity::qps("orderService", "/orders", 10.0))
            .await
            .unwrap();
        assert!(saved.id.is_some());
        assert!(
            service
                .content("orderService-flow-rules", "TEST_GROUP")
                .is_some()
        );
        assert!(context.degrade_rules.list("orderService").await.unwrap().is_empty());
        assert!(context.api_definitions.list("orderService").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_queue_wired() {
        let context = AppContext::with_config_service(
            memory_context_settings(),
            Arc::new(MemoryConfigService::new()),
        )
        .await
        .unwrap();

        assert!(context.queue.push_if_absent("machines", "10.0.0.1").await.unwrap());
        assert!(!context.queue.push_if_absent("machines", "10.0.0.1").await.unwrap());
        assert!(!context.locker.is_locked("flowguard:rule-lock:orderService-flow-rules").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_worker_id_rejected() {
        let mut settings = Settings::default();
        settings.id.worker_id = Some(99);
        let result =
            AppContext::with_config_service(settings, Arc::new(MemoryConfigService::new())).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_empty_servers() {
        let mut settings = Settings::default();
        settings.nacos.server_addrs.clear();
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(runtime.block_on(AppContext::build(settings)).is_err());
    }
}
