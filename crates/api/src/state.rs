use std::sync::Arc;

use planflow_domain::plans::PlanService;
use planflow_domain::ports::index::PlanIndex;
use planflow_domain::ports::queue::ChangeQueue;
use planflow_domain::ports::store::PlanStore;
use planflow_infra::config::AppConfig;
use planflow_infra::index::ElasticPlanIndex;
use planflow_infra::queue::RedisChangeQueue;
use planflow_infra::store::RedisPlanStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub plans: Arc<PlanService>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store =
            RedisPlanStore::connect_with_prefix(&config.redis_url, config.store_prefix.clone())
                .await?;
        let queue =
            RedisChangeQueue::connect_with_prefix(&config.redis_url, config.queue_prefix.clone())
                .await?;
        let index = ElasticPlanIndex::from_config(&config);
        Ok(Self::with_ports(
            config,
            Arc::new(store),
            Arc::new(queue),
            Arc::new(index),
        ))
    }

    pub fn with_ports(
        config: AppConfig,
        store: Arc<dyn PlanStore>,
        queue: Arc<dyn ChangeQueue>,
        index: Arc<dyn PlanIndex>,
    ) -> Self {
        let plans = Arc::new(PlanService::new(store, queue, index));
        Self { config, plans }
    }
}
