//! Process entry point: load configuration, wire the catalog pool and cache
//! backend, assemble per-source services, and run the web and metrics
//! servers concurrently until shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};

use nimbus::asset_resolver::AssetResolver;
use nimbus::cache::backend::Backend;
use nimbus::cache::file_backend::FileBackend;
use nimbus::cache::redis_backend::RedisBackend;
use nimbus::cache::CacheBytes;
use nimbus::catalog_repo::CatalogRepo;
use nimbus::config::NimbusConfig;
use nimbus::observability::BboxStatsCounter;
use nimbus::services::streamline::StreamlineService;
use nimbus::services::vector::WindVectorService;
use nimbus::services::volume::VolumePackService;
use nimbus::web::{self, AppState, SourceServices};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() -> Result<()> {
    let config = NimbusConfig::load().context("failed to load configuration")?;

    nimbus::telemetry::init_tracing();
    let _sentry_guard = nimbus::telemetry::init_sentry(&config.env);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(async_main(config))
}

async fn async_main(config: NimbusConfig) -> Result<()> {
    let config = Arc::new(config);

    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    let pool = Pool::builder()
        .max_size(16)
        .build(manager)
        .context("failed to build catalog connection pool")?;

    let cache = Arc::new(build_cache(&config).await?);
    let catalog = Arc::new(CatalogRepo::new(pool.clone()));

    let mut sources = HashMap::new();
    for (name, root) in [
        ("ecmwf", &config.data_roots.ecmwf),
        ("cldas", &config.data_roots.cldas),
        ("town_forecast", &config.data_roots.town_forecast),
    ] {
        let resolver = Arc::new(AssetResolver::new(catalog.clone(), PathBuf::from(root.clone())));
        sources.insert(
            name.to_string(),
            SourceServices {
                vector: Arc::new(WindVectorService::new(resolver.clone(), cache.clone())),
                streamline: Arc::new(StreamlineService::new(resolver, cache.clone())),
            },
        );
    }

    let volume = Arc::new(VolumePackService::new(
        PathBuf::from(&config.data_roots.cldas),
        cache.clone(),
    ));

    let metrics_handle = nimbus::metrics::init_metrics().context("failed to init metrics")?;

    let state = AppState {
        config: config.clone(),
        pool,
        sources: Arc::new(sources),
        volume,
        bbox_stats: Arc::new(BboxStatsCounter::new()),
    };

    let server_config = config.server();
    let metrics_port = server_config.metrics_port;

    let web_task = tokio::spawn(web::start_web_server(state));
    let metrics_task = tokio::spawn(nimbus::metrics::start_metrics_server(metrics_port, metrics_handle));

    tokio::select! {
        result = web_task => result.context("web server task panicked")??,
        result = metrics_task => result.context("metrics server task panicked")??,
    }

    Ok(())
}

/// Builds the two-tier cache backend: Redis when `redis_url` is configured,
/// otherwise the process-local file fallback rooted at `cache.cache_dir`
/// (or a sensible default under the working directory).
async fn build_cache(config: &NimbusConfig) -> Result<CacheBytes> {
    let cache_config = config.cache();

    let backend: Arc<dyn Backend> = match &config.redis_url {
        Some(redis_url) => {
            tracing::info!("using redis cache backend");
            Arc::new(
                RedisBackend::connect(redis_url)
                    .await
                    .context("failed to connect to redis")?,
            )
        }
        None => {
            let dir = cache_config
                .cache_dir
                .clone()
                .unwrap_or_else(|| "./data/cache".to_string());
            tracing::info!(dir, "using file cache backend (no redis_url configured)");
            Arc::new(FileBackend::new(PathBuf::from(dir)))
        }
    };

    Ok(CacheBytes::new(backend, cache_config))
}
