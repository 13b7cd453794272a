use std::time::Duration;

/// Typed, environment-overridable gateway configuration. Each field has a
/// documented default so a bare `GatewayConfig::from_env()` is a reasonable
/// production configuration; only the fields an operator cares about need an
/// environment variable set.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub bucket_count: usize,
    pub max_conn_count: usize,
    pub handshake_timeout: Duration,
    pub write_buffer_size: usize,
    pub max_message_size: usize,
    pub send_queue_depth: usize,
    pub ring_capacity: usize,
    pub bucket_fanout_workers: usize,
    pub bucket_fanout_queue_depth: usize,
    pub writer_batch_size: usize,
    pub writer_tick: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_deadline: Duration,
    pub online_batcher_concurrency: usize,
    pub online_merge_tick: Duration,
    pub online_renewal_interval: Duration,
    pub online_rpc_timeout: Duration,
    pub gzip_min_bytes: usize,
    /// Platforms whose successful delivery counts as "delivered online"
    /// (suppresses a subsequent offline push). Defaults: iOS, Android.
    pub push_terminal_platforms: Vec<i32>,
    /// The platform id on which a backgrounded app suppresses delivery
    /// instead of pushing (iOS == 2 by default).
    pub background_suppressed_platform: i32,
    pub graceful_shutdown_budget: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(30);
        Self {
            bind_addr: "0.0.0.0:8080".to_owned(),
            bucket_count: 32,
            max_conn_count: 100_000,
            handshake_timeout: Duration::from_secs(5),
            write_buffer_size: 4096,
            max_message_size: 51_200,
            send_queue_depth: 256,
            ring_capacity: 256,
            bucket_fanout_workers: 8,
            bucket_fanout_queue_depth: 256,
            writer_batch_size: 10,
            writer_tick: Duration::from_millis(10),
            pong_wait,
            ping_period: pong_wait.mul_f64(0.9),
            write_deadline: Duration::from_secs(10),
            online_batcher_concurrency: 1,
            online_merge_tick: Duration::from_secs(1),
            online_renewal_interval: Duration::from_secs(5 * 60),
            online_rpc_timeout: Duration::from_secs(5),
            gzip_min_bytes: gw_codec::COMPRESS_MIN_BYTES,
            push_terminal_platforms: vec![2, 3],
            background_suppressed_platform: 2,
            graceful_shutdown_budget: Duration::from_secs(15),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables, falling back to
    /// [`GatewayConfig::default`] for anything unset or unparseable.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            bind_addr: std::env::var("GATEWAY_BIND_ADDR").unwrap_or(base.bind_addr),
            bucket_count: env_usize("GATEWAY_BUCKET_COUNT", base.bucket_count),
            max_conn_count: env_usize("GATEWAY_MAX_CONN_COUNT", base.max_conn_count),
            online_batcher_concurrency: env_usize(
                "GATEWAY_ONLINE_BATCHER_CONCURRENCY",
                base.online_batcher_concurrency,
            ),
            ..base
        }
    }

    pub fn is_push_terminal(&self, platform_id: i32) -> bool {
        self.push_terminal_platforms.contains(&platform_id)
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_derives_ping_period_from_pong_wait() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.ping_period, cfg.pong_wait.mul_f64(0.9));
    }

    #[test]
    fn is_push_terminal_matches_ios_and_android_by_default() {
        let cfg = GatewayConfig::default();
        assert!(cfg.is_push_terminal(2));
        assert!(cfg.is_push_terminal(3));
        assert!(!cfg.is_push_terminal(1));
    }
}
