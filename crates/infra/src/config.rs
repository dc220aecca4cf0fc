use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub store_prefix: String,
    pub queue_prefix: String,
    pub elastic_url: String,
    pub elastic_index: String,
    pub worker_poll_timeout_secs: u64,
    pub worker_max_delivery_attempts: u32,
    pub worker_connect_retry_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("jwt_secret", "dev-secret")?
            .set_default("store_prefix", "planflow:plans")?
            .set_default("queue_prefix", "planflow:changes")?
            .set_default("elastic_url", "http://127.0.0.1:9200")?
            .set_default("elastic_index", "planindex")?
            .set_default("worker_poll_timeout_secs", 5)?
            .set_default("worker_max_delivery_attempts", 5)?
            .set_default("worker_connect_retry_ms", 2000)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}
