use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use gw_codec::GzipPool;
use gw_core::{BucketManager, GatewayConfig, OnlineStatusBatcher, Subscription};
use gw_ui_log::{GatewayEvent, UiLogger};
use tokio::sync::{broadcast, mpsc};

use crate::control::ControlEvent;

const OPERATOR_LOG_CAPACITY: usize = 500;

/// Shared application state, cheap to `Clone` (every field is an `Arc` or a
/// `Copy` handle) so it can be pulled into every axum handler and session
/// task via `axum::extract::State`, the same convention `services/server`
/// uses for its `AppState`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub buckets: Arc<BucketManager>,
    pub subscription: Arc<Subscription>,
    pub online_batcher: Arc<OnlineStatusBatcher>,
    pub online_count: Arc<AtomicUsize>,
    pub gzip_pool: Arc<GzipPool>,
    pub control_tx: mpsc::Sender<ControlEvent>,
    /// Operator-facing session lifecycle log: register/unregister/kick
    /// events, broadcast live and retained for the `/api/v1/gateway/events`
    /// endpoint.
    pub ui_log: Arc<UiLogger<GatewayEvent>>,
}

impl AppState {
    pub fn new(config: GatewayConfig, online_batcher: OnlineStatusBatcher, control_tx: mpsc::Sender<ControlEvent>) -> Self {
        let buckets = Arc::new(BucketManager::new(
            config.bucket_count,
            config.bucket_fanout_workers,
            config.bucket_fanout_queue_depth,
        ));
        let (events_tx, _events_rx) = broadcast::channel(128);
        Self {
            config: Arc::new(config),
            buckets,
            subscription: Arc::new(Subscription::new()),
            online_batcher: Arc::new(online_batcher),
            online_count: Arc::new(AtomicUsize::new(0)),
            gzip_pool: Arc::new(GzipPool::new()),
            control_tx,
            ui_log: Arc::new(gw_ui_log::gateway_logger(events_tx, OPERATOR_LOG_CAPACITY)),
        }
    }
}
