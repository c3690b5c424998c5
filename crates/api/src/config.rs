use factory_core::config::{FactoryConfig, ProviderKind};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_parsed("REQUEST_TIMEOUT_SECS", 30);
        let shutdown_timeout_secs: u64 = env_parsed("SHUTDOWN_TIMEOUT_SECS", 30);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
        }
    }
}

/// Load the factory policy bundle from environment variables, falling back
/// to the built-in defaults for anything unset.
///
/// | Env Var                    | Policy field                       |
/// |----------------------------|------------------------------------|
/// | `DEFAULT_PRIORITY`         | `queue.default_priority`           |
/// | `CLAIM_BATCH_SIZE`         | `queue.claim_batch_size`           |
/// | `MAX_ATTEMPTS`             | `retry.max_attempts`               |
/// | `RETRY_BASE_DELAY_MS`      | `retry.base_delay_ms`              |
/// | `RETRY_MAX_DELAY_MS`       | `retry.max_delay_ms`               |
/// | `LEASE_MS`                 | `lease.lease_ms`                   |
/// | `HEARTBEAT_INTERVAL_MS`    | `lease.heartbeat_interval_ms`      |
/// | `MIN_WORKERS`              | `scaling.min_workers`              |
/// | `MAX_WORKERS`              | `scaling.max_workers`              |
/// | `QUEUE_PER_WORKER_TARGET`  | `scaling.queue_per_worker_target`  |
/// | `SPAWN_STEP`               | `scaling.spawn_step`               |
/// | `WORKER_IDLE_TIMEOUT_MS`   | `scaling.idle_timeout_ms`          |
/// | `RECONCILE_INTERVAL_MS`    | `scaling.reconcile_interval_ms`    |
/// | `PROVIDER_KIND`            | `provider.kind`                    |
/// | `PROVIDER_APP_NAME`        | `provider.app_name`                |
/// | `WORKER_IMAGE`             | `provider.image`                   |
/// | `PROVIDER_REGION`          | `provider.region`                  |
/// | `WORKER_VOLUME_NAME`       | `provider.volume_name`             |
/// | `WORKER_VOLUME_PATH`       | `provider.volume_path`             |
/// | `WORKER_VOLUME_SIZE_GB`    | `provider.volume_size_gb`          |
pub fn factory_config_from_env() -> FactoryConfig {
    let mut config = FactoryConfig::default();

    config.queue.default_priority = env_parsed("DEFAULT_PRIORITY", config.queue.default_priority);
    config.queue.claim_batch_size = env_parsed("CLAIM_BATCH_SIZE", config.queue.claim_batch_size);

    config.retry.max_attempts = env_parsed("MAX_ATTEMPTS", config.retry.max_attempts);
    config.retry.base_delay_ms = env_parsed("RETRY_BASE_DELAY_MS", config.retry.base_delay_ms);
    config.retry.max_delay_ms = env_parsed("RETRY_MAX_DELAY_MS", config.retry.max_delay_ms);

    config.lease.lease_ms = env_parsed("LEASE_MS", config.lease.lease_ms);
    config.lease.heartbeat_interval_ms =
        env_parsed("HEARTBEAT_INTERVAL_MS", config.lease.heartbeat_interval_ms);

    config.scaling.min_workers = env_parsed("MIN_WORKERS", config.scaling.min_workers);
    config.scaling.max_workers = env_parsed("MAX_WORKERS", config.scaling.max_workers);
    config.scaling.queue_per_worker_target = env_parsed(
        "QUEUE_PER_WORKER_TARGET",
        config.scaling.queue_per_worker_target,
    );
    config.scaling.spawn_step = env_parsed("SPAWN_STEP", config.scaling.spawn_step);
    config.scaling.idle_timeout_ms =
        env_parsed("WORKER_IDLE_TIMEOUT_MS", config.scaling.idle_timeout_ms);
    config.scaling.reconcile_interval_ms = env_parsed(
        "RECONCILE_INTERVAL_MS",
        config.scaling.reconcile_interval_ms,
    );

    if let Ok(kind) = std::env::var("PROVIDER_KIND") {
        config.provider.kind = match kind.trim().to_ascii_lowercase().as_str() {
            "fly" => ProviderKind::Fly,
            "runpod" => ProviderKind::Runpod,
            "ecs" => ProviderKind::Ecs,
            other => panic!("PROVIDER_KIND must be fly, runpod, or ecs (got '{other}')"),
        };
    }
    if let Ok(app_name) = std::env::var("PROVIDER_APP_NAME") {
        config.provider.app_name = app_name;
    }
    if let Ok(image) = std::env::var("WORKER_IMAGE") {
        config.provider.image = image;
    }
    if let Ok(region) = std::env::var("PROVIDER_REGION") {
        config.provider.region = region;
    }
    if let Ok(volume_name) = std::env::var("WORKER_VOLUME_NAME") {
        config.provider.volume_name = volume_name;
    }
    if let Ok(volume_path) = std::env::var("WORKER_VOLUME_PATH") {
        config.provider.volume_path = volume_path;
    }
    config.provider.volume_size_gb =
        env_parsed("WORKER_VOLUME_SIZE_GB", config.provider.volume_size_gb);

    config
}

/// Parse an env var, falling back to `default` when unset. Panics on a
/// malformed value so misconfiguration fails at startup.
fn env_parsed<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a valid value: {e}")),
        Err(_) => default,
    }
}
