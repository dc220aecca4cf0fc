mod observability;

use std::sync::Arc;
use std::time::{Duration, Instant};

use planflow_domain::changes::ChangeAction;
use planflow_domain::ports::index::PlanIndex;
use planflow_domain::ports::queue::{ChangeDelivery, ChangeQueue};
use planflow_domain::projection::{Disposition, Projector};
use planflow_infra::config::AppConfig;
use planflow_infra::index::ElasticPlanIndex;
use planflow_infra::logging::init_tracing;
use planflow_infra::queue::RedisChangeQueue;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics()?;

    let index: Arc<ElasticPlanIndex> = Arc::new(ElasticPlanIndex::from_config(&config));

    // Dropping the index is destructive and never happens on a normal start.
    if std::env::args().any(|arg| arg == "--reset-index") {
        index
            .reset_schema()
            .await
            .map_err(|err| anyhow::anyhow!("index reset failed: {err}"))?;
        info!(index = %config.elastic_index, "index dropped and recreated");
        return Ok(());
    }

    wait_for_schema(index.as_ref(), config.worker_connect_retry_ms).await;
    let queue = connect_queue(&config).await;
    reclaim_in_flight(&queue).await;
    let projector = Projector::new(index, config.worker_max_delivery_attempts);

    info!("worker started");
    run(&queue, &projector, &config).await;
    info!("worker shutdown");
    Ok(())
}

async fn wait_for_schema(index: &ElasticPlanIndex, retry_ms: u64) {
    loop {
        match index.ensure_schema().await {
            Ok(()) => return,
            Err(err) => {
                warn!(error = %err, retry_ms, "index schema not ready; retrying");
                tokio::time::sleep(Duration::from_millis(retry_ms)).await;
            }
        }
    }
}

async fn connect_queue(config: &AppConfig) -> RedisChangeQueue {
    loop {
        match RedisChangeQueue::connect_with_prefix(&config.redis_url, config.queue_prefix.clone())
            .await
        {
            Ok(queue) => return queue,
            Err(err) => {
                warn!(error = %err, retry_ms = config.worker_connect_retry_ms, "queue unreachable; retrying");
                tokio::time::sleep(Duration::from_millis(config.worker_connect_retry_ms)).await;
            }
        }
    }
}

// Messages left in a processing list belong to a consumer that died between
// dequeue and settlement. Moving them back to ready preserves at-least-once
// delivery across restarts.
async fn reclaim_in_flight(queue: &RedisChangeQueue) {
    for action in ChangeAction::ALL {
        match queue.reclaim(action).await {
            Ok(0) => {}
            Ok(count) => info!(queue = action.queue_name(), count, "reclaimed in-flight messages"),
            Err(err) => warn!(error = %err, queue = action.queue_name(), "reclaim failed"),
        }
    }
}

async fn run(queue: &RedisChangeQueue, projector: &Projector, config: &AppConfig) {
    loop {
        // The shutdown signal only interrupts the wait; a dequeued message
        // always settles before the loop exits.
        let delivery = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            delivery = next_delivery(queue, config) => delivery,
        };
        if let Some(delivery) = delivery {
            settle(queue, projector, delivery).await;
        }
    }
}

// One pass over every per-action queue, returning the first delivery found.
// Messages settle one at a time, so deliveries for the same plan apply in
// publish order.
async fn next_delivery(queue: &RedisChangeQueue, config: &AppConfig) -> Option<ChangeDelivery> {
    for action in ChangeAction::ALL {
        match queue.dequeue(action, config.worker_poll_timeout_secs).await {
            Ok(Some(delivery)) => return Some(delivery),
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, queue = action.queue_name(), "dequeue failed");
                tokio::time::sleep(Duration::from_millis(config.worker_connect_retry_ms)).await;
            }
        }
    }
    None
}

async fn settle(queue: &RedisChangeQueue, projector: &Projector, delivery: ChangeDelivery) {
    let action = action_label(delivery.action);
    let start = Instant::now();
    let disposition = projector.handle(&delivery).await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let result = match disposition {
        Disposition::Ack => {
            if let Err(err) = queue.ack(&delivery).await {
                error!(error = %err, message_id = %delivery.message_id, "ack failed");
            }
            "ack"
        }
        Disposition::Retry => {
            if let Err(err) = queue.nack(&delivery, true).await {
                error!(error = %err, message_id = %delivery.message_id, "requeue failed");
            }
            observability::register_message_requeued(action);
            "retry"
        }
        Disposition::DeadLetter => {
            if let Err(err) = queue.dead_letter(&delivery).await {
                error!(error = %err, message_id = %delivery.message_id, "dead-letter failed");
            }
            observability::register_message_dead_lettered(action);
            "dead_letter"
        }
    };

    observability::register_message_processed(action, result, duration_ms);
}

fn action_label(action: ChangeAction) -> &'static str {
    match action {
        ChangeAction::Create => "create",
        ChangeAction::Update => "update",
        ChangeAction::Delete => "delete",
    }
}
