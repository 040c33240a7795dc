//! Runtime configuration: CLI flags with env-var fallback, then built-in
//! defaults — the same priority layering the teacher's `DaemonConfig::new`
//! uses, minus the TOML-file layer (this crate has no per-project config
//! file; see DESIGN.md).

use clap::Parser;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;

/// CLI/env entry point. Every field doubles as an env var via `clap`'s
/// `env` attribute, matching spec.md §6's documented environment surface.
#[derive(Parser, Debug)]
#[command(name = "relaygate", about = "HTTP aggregator for a cloud of Nostr relays")]
pub struct Args {
    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Optional shared cache (e.g. Redis) connection string.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Secret used to sign/verify CSRF tokens.
    #[arg(long, env = "CSRF_SECRET")]
    pub csrf_secret: Option<String>,

    /// `tracing_subscriber::EnvFilter` directive string.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "GZIP_ENABLED", default_value_t = true)]
    pub gzip_enabled: bool,

    #[arg(long, env = "HSTS_ENABLED", default_value_t = false)]
    pub hsts_enabled: bool,

    #[arg(long, env = "HSTS_MAX_AGE", default_value_t = 31_536_000)]
    pub hsts_max_age: u64,

    #[arg(long, env = "SECURE_COOKIES", default_value_t = true)]
    pub secure_cookies: bool,

    #[arg(long, env = "DEV_MODE", default_value_t = false)]
    pub dev_mode: bool,

    /// Comma-separated list of relay URLs this instance fans out to.
    #[arg(long, env = "RELAY_URLS", value_delimiter = ',')]
    pub relay_urls: Vec<String>,
}

/// Tunables spec.md §4 names as defaults throughout the component design —
/// operator-adjustable without a recompile.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// C1: oversize frame threshold.
    pub max_frame_bytes: usize,
    /// C1: fraction of kind-1 events whose signature is verified (0.0-1.0).
    pub sig_verify_fraction: f64,
    /// C2: bounded send queue depth per connection.
    pub send_queue_depth: usize,
    /// C2: keepalive ping interval.
    pub ping_interval: Duration,
    /// C2: missing-pong ejection threshold.
    pub pong_timeout: Duration,
    /// C3: global maximum open connections.
    pub max_open_connections: usize,
    /// C3: idle-connection eviction threshold.
    pub idle_evict_after: Duration,
    /// C4: per-subscriber buffer depth.
    pub subscriber_buffer: usize,
    /// C5: soft-EOSE completion window.
    pub soft_eose_window: Duration,
    /// C5: hard deadline, absent a shorter context deadline.
    pub hard_deadline: Duration,
    /// C6: fresh TTL — served without refetch.
    pub cache_fresh_ttl: Duration,
    /// C6: stale-while-revalidate TTL.
    pub cache_stale_ttl: Duration,
    /// C6: max cache entries (LRU).
    pub cache_max_entries: usize,
    /// C6: max total cached events.
    pub cache_max_events: usize,
    /// C8: batch window.
    pub batch_window: Duration,
    /// C8: max batch size.
    pub batch_max_keys: usize,
    /// C10: publish OK wait.
    pub publish_ok_timeout: Duration,
    /// C11: per-subscriber SSE buffer depth.
    pub sse_buffer: usize,
    /// C11: SSE keepalive ping interval.
    pub sse_ping_interval: Duration,
    /// C11: idle-subscriber close threshold.
    pub sse_idle_close_after: Duration,
    /// C2: dial timeout.
    pub dial_timeout: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_frame_bytes: 256 * 1024,
            sig_verify_fraction: 1.0,
            send_queue_depth: 64,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            max_open_connections: 64,
            idle_evict_after: Duration::from_secs(60),
            subscriber_buffer: 64,
            soft_eose_window: Duration::from_millis(800),
            hard_deadline: Duration::from_secs(5),
            cache_fresh_ttl: Duration::from_secs(5),
            cache_stale_ttl: Duration::from_secs(60),
            cache_max_entries: 4_096,
            cache_max_events: 200_000,
            batch_window: Duration::from_millis(50),
            batch_max_keys: 100,
            publish_ok_timeout: Duration::from_secs(10),
            sse_buffer: 10,
            sse_ping_interval: Duration::from_secs(30),
            sse_idle_close_after: Duration::from_secs(15 * 60),
            dial_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub csrf_secret: String,
    pub log_level: String,
    pub gzip_enabled: bool,
    pub hsts_enabled: bool,
    pub hsts_max_age: u64,
    pub secure_cookies: bool,
    pub dev_mode: bool,
    pub relay_urls: Vec<crate::relay_url::RelayUrl>,
    pub tunables: Tunables,
}

impl Config {
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let csrf_secret = args.csrf_secret.unwrap_or_else(|| {
            if args.dev_mode {
                "dev-insecure-csrf-secret".to_string()
            } else {
                // A missing secret in production is a misconfiguration, not a
                // silent fallback — fail fast rather than mint tokens no one
                // can verify after a restart.
                tracing::warn!("CSRF_SECRET unset — generating an ephemeral secret for this process only");
                uuid::Uuid::new_v4().to_string()
            }
        });

        let relay_urls = args
            .relay_urls
            .iter()
            .filter_map(|raw| match crate::relay_url::RelayUrl::parse(raw) {
                Ok(u) => Some(u),
                Err(e) => {
                    tracing::warn!(raw, err = %e, "ignoring invalid RELAY_URLS entry");
                    None
                }
            })
            .collect();

        Ok(Self {
            port: args.port,
            redis_url: args.redis_url,
            csrf_secret,
            log_level: args.log_level,
            gzip_enabled: args.gzip_enabled,
            hsts_enabled: args.hsts_enabled,
            hsts_max_age: args.hsts_max_age,
            secure_cookies: args.secure_cookies,
            dev_mode: args.dev_mode,
            relay_urls,
            tunables: Tunables::default(),
        })
    }
}
