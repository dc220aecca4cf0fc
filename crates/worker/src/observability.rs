use std::sync::OnceLock;

use anyhow::Result;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const MESSAGES_PROCESSED_TOTAL: &str = "planflow_worker_messages_processed_total";
const MESSAGE_PROCESSING_DURATION_MS: &str = "planflow_worker_message_processing_duration_ms";
const MESSAGES_REQUEUED_TOTAL: &str = "planflow_worker_messages_requeued_total";
const MESSAGES_DEAD_LETTERED_TOTAL: &str = "planflow_worker_messages_dead_lettered_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn register_message_processed(action: &'static str, result: &'static str, duration_ms: f64) {
    counter!(
        MESSAGES_PROCESSED_TOTAL,
        "action" => action,
        "result" => result
    )
    .increment(1);

    histogram!(
        MESSAGE_PROCESSING_DURATION_MS,
        "action" => action
    )
    .record(duration_ms);
}

pub fn register_message_requeued(action: &'static str) {
    counter!(MESSAGES_REQUEUED_TOTAL, "action" => action).increment(1);
}

pub fn register_message_dead_lettered(action: &'static str) {
    counter!(MESSAGES_DEAD_LETTERED_TOTAL, "action" => action).increment(1);
}
