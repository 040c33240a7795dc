pub mod batcher;
pub mod cache;
pub mod codec;
pub mod config;
pub mod connection;
pub mod csrf;
pub mod enrich;
pub mod error;
pub mod fanout;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod multiplexer;
pub mod observability;
pub mod pool;
pub mod publish;
pub mod relay_url;
pub mod rest;
pub mod singleflight;
pub mod sse;

use config::Config;
use enrich::ProfileBatcher;
use health::HealthStore;
use metrics::SharedMetrics;
use pool::ConnectionPool;
use singleflight::SingleFlightGate;
use sse::SseFabric;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared application state handed to every HTTP handler and background
/// task — one `Arc<...>` per subsystem, the same shape as the teacher's
/// `AppContext` (`lib.rs`).
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub pool: Arc<ConnectionPool>,
    pub health: Arc<HealthStore>,
    pub cache: Arc<cache::EventCache>,
    pub query_gate: Arc<SingleFlightGate<fanout::QueryResult>>,
    pub profile_batcher: Arc<ProfileBatcher>,
    pub sse: Arc<SseFabric>,
    pub metrics: SharedMetrics,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
}

impl AppContext {
    pub fn new(config: Config) -> Arc<Self> {
        let config = Arc::new(config);
        let tunables = Arc::new(config.tunables.clone());
        let shutdown = CancellationToken::new();
        let health = HealthStore::new().into();
        let metrics: SharedMetrics = Arc::new(metrics::Metrics::new());
        let pool = ConnectionPool::new(
            tunables.clone(),
            Arc::clone(&health),
            Arc::clone(&metrics),
            shutdown.clone(),
        );
        let cache = cache::EventCache::new(
            tunables.cache_fresh_ttl,
            tunables.cache_stale_ttl,
            tunables.cache_max_entries,
            tunables.cache_max_events,
        );
        let profile_batcher = enrich::new_profile_batcher(
            Arc::clone(&pool),
            Arc::clone(&health),
            Arc::clone(&tunables),
            config.relay_urls.clone(),
        );

        let ctx = Arc::new(Self {
            config,
            pool,
            health,
            cache,
            query_gate: Arc::new(SingleFlightGate::new()),
            profile_batcher,
            sse: SseFabric::new(tunables.sse_buffer),
            metrics,
            started_at: Instant::now(),
            shutdown,
        });

        ingest::spawn(Arc::clone(&ctx));
        ctx
    }
}
