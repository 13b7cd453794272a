pub mod client;
pub mod control;
pub mod dispatch;
pub mod presence;
pub mod response;
pub mod rpc_http;
pub mod state;
pub mod upgrade;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assembles the full axum router: the `/ws` upgrade endpoint session
/// handlers connect to, plus the `/api/v1/gateway/*` operator surface.
/// Requires `into_make_service_with_connect_info::<SocketAddr>()` at serve
/// time so `upgrade::ws_upgrade_handler` can read the peer address.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(upgrade::ws_upgrade_handler))
        .merge(rpc_http::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
