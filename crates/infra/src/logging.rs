use crate::config::AppConfig;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Tracing setup shared by the api and worker binaries. Request and
/// correlation ids live on the `http_request` span, so production output is
/// flattened JSON with the current span's fields inlined; development keeps
/// the compact human format.
pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(false);

    if config.is_production() {
        builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
