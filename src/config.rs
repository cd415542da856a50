use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Data roots, one per dataset kind, each validated at startup to exist.
#[derive(Debug, Clone, Deserialize)]
pub struct DataRoots {
    pub ecmwf: String,
    pub cldas: String,
    pub town_forecast: String,
}

/// Cache tuning knobs, defaults matching spec.md sec 4.1.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_fresh_ttl_secs")]
    pub fresh_ttl_secs: u64,
    #[serde(default = "CacheConfig::default_stale_ttl_secs")]
    pub stale_ttl_secs: u64,
    #[serde(default = "CacheConfig::default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    #[serde(default = "CacheConfig::default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "CacheConfig::default_cooldown_min_secs")]
    pub cooldown_min_secs: u64,
    #[serde(default = "CacheConfig::default_cooldown_max_secs")]
    pub cooldown_max_secs: u64,
    /// Directory for the process-local file cache fallback when Redis is absent.
    pub cache_dir: Option<String>,
}

impl CacheConfig {
    fn default_fresh_ttl_secs() -> u64 {
        60
    }
    fn default_stale_ttl_secs() -> u64 {
        3600
    }
    fn default_lock_ttl_ms() -> u64 {
        30_000
    }
    fn default_wait_timeout_ms() -> u64 {
        200
    }
    fn default_cooldown_min_secs() -> u64 {
        5
    }
    fn default_cooldown_max_secs() -> u64 {
        30
    }

    pub fn fresh_ttl(&self) -> Duration {
        Duration::from_secs(self.fresh_ttl_secs)
    }
    pub fn stale_ttl(&self) -> Duration {
        Duration::from_secs(self.stale_ttl_secs)
    }
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
    pub fn cooldown_range(&self) -> (u64, u64) {
        (self.cooldown_min_secs, self.cooldown_max_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_interface")]
    pub interface: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_metrics_port")]
    pub metrics_port: u16,
}

impl ServerConfig {
    fn default_interface() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        8080
    }
    fn default_metrics_port() -> u16 {
        9100
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NimbusConfig {
    pub env: String,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub data_roots: DataRoots,
    #[serde(default)]
    pub cache: CacheConfigOrDefault,
    #[serde(default)]
    pub server: ServerConfigOrDefault,
    /// Opaque bearer token required by the prewarm endpoints. Out of scope
    /// authentication is a stand-in: a thin capability check, not a user system.
    pub editor_capability_token: Option<String>,
}

// `config` merges layered sources (defaults -> file -> env) before a single
// deserialize pass, so the nested structs need a default-friendly wrapper to
// avoid requiring every field to be present in every layer.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CacheConfigOrDefault(#[serde(default)] pub Option<CacheConfig>);
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfigOrDefault(#[serde(default)] pub Option<ServerConfig>);

impl NimbusConfig {
    /// Loads configuration the way the original settings loader does:
    /// optional `config/{env}.toml` for non-secret defaults, then
    /// `NIMBUS_`-prefixed environment variables (which always win, and are
    /// the only place secrets like `database_url`/`redis_url` should live).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let env_name = std::env::var("NIMBUS_ENV").unwrap_or_else(|_| "dev".to_string());
        let config_dir =
            std::env::var("NIMBUS_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = config::Config::builder()
            .add_source(
                config::File::with_name(&format!("{config_dir}/{env_name}")).required(false),
            )
            .add_source(config::Environment::with_prefix("NIMBUS").separator("__"));

        let settled = builder.build().context("failed to assemble configuration")?;
        let mut parsed: NimbusConfig = settled
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        parsed.env = env_name;
        Ok(parsed)
    }

    pub fn cache(&self) -> CacheConfig {
        self.cache.0.clone().unwrap_or(CacheConfig {
            fresh_ttl_secs: CacheConfig::default_fresh_ttl_secs(),
            stale_ttl_secs: CacheConfig::default_stale_ttl_secs(),
            lock_ttl_ms: CacheConfig::default_lock_ttl_ms(),
            wait_timeout_ms: CacheConfig::default_wait_timeout_ms(),
            cooldown_min_secs: CacheConfig::default_cooldown_min_secs(),
            cooldown_max_secs: CacheConfig::default_cooldown_max_secs(),
            cache_dir: None,
        })
    }

    pub fn server(&self) -> ServerConfig {
        self.server.0.clone().unwrap_or(ServerConfig {
            interface: ServerConfig::default_interface(),
            port: ServerConfig::default_port(),
            metrics_port: ServerConfig::default_metrics_port(),
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == "prod" || self.env == "production"
    }
}
