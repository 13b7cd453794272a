use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Json, routing::{get, post}, Router};
use gw_core::GatewayConnection;
use gw_protocol::{
    GetUsersOnlineStatusResp, KickUserOfflineResp, MultiTerminalLoginCheckResp,
    OnlineBatchPushOneMsgResp, req_id,
};
use serde::Deserialize;

use crate::control::ControlEvent;
use crate::response::{bad_request, internal_error};
use crate::state::AppState;

/// JSON-over-HTTP operator surface: the same four back-end
/// operations `gw-core::push` exposes as plain functions, wrapped for a
/// caller that cannot hold a Rust handle to this process -- a presence
/// service, an offline-push dispatcher, or an operator script.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/gateway/users/online-status", post(get_users_online_status))
        .route("/api/v1/gateway/push", post(super_group_push))
        .route("/api/v1/gateway/kick", post(kick_user_offline))
        .route("/api/v1/gateway/multi-terminal-login-check", post(multi_terminal_login_check))
        .route("/api/v1/gateway/events", get(recent_events))
}

/// Recently logged session lifecycle events (register/unregister/kick), for
/// an operator dashboard polling rather than subscribing to the live feed.
async fn recent_events(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ui_log.entries())
}

#[derive(Debug, Deserialize)]
struct UserIdsReq {
    user_ids: Vec<String>,
}

async fn get_users_online_status(State(state): State<AppState>, Json(req): Json<UserIdsReq>) -> impl IntoResponse {
    if req.user_ids.is_empty() {
        return bad_request("user_ids must not be empty").into_response();
    }
    let resp: GetUsersOnlineStatusResp = gw_core::push::get_users_online_status(&state.buckets, &req.user_ids);
    Json(resp).into_response()
}

#[derive(Debug, Deserialize)]
struct PushReq {
    user_ids: Vec<String>,
    data: serde_json::Value,
}

async fn super_group_push(State(state): State<AppState>, Json(req): Json<PushReq>) -> impl IntoResponse {
    if req.user_ids.is_empty() {
        return bad_request("user_ids must not be empty").into_response();
    }
    // `req.data` is the operator's arbitrary JSON payload; each recipient's
    // `push_typed` carries it onward as opaque bytes in its own envelope.
    let payload = serde_json::to_vec(&req.data).unwrap_or_default();
    let resp: OnlineBatchPushOneMsgResp = gw_core::push::super_group_push(&state.config, &state.buckets, &req.user_ids, |conn| {
        conn.push_typed(req_id::PUSH_MSG, payload.clone()).is_ok()
    });
    Json(resp).into_response()
}

#[derive(Debug, Deserialize)]
struct KickReq {
    user_ids: Vec<String>,
    platform_id: i32,
}

async fn kick_user_offline(State(state): State<AppState>, Json(req): Json<KickReq>) -> impl IntoResponse {
    if req.user_ids.is_empty() {
        return bad_request("user_ids must not be empty").into_response();
    }
    let resp: KickUserOfflineResp = gw_core::push::kick_user_offline(&state.buckets, &req.user_ids, req.platform_id, |conn| {
        conn.kick("offline: kicked by operator request");
    });
    Json(resp).into_response()
}

#[derive(Debug, Deserialize)]
struct MultiTerminalLoginCheckReq {
    user_id: String,
    platform_id: i32,
    token: String,
}

async fn multi_terminal_login_check(State(state): State<AppState>, Json(req): Json<MultiTerminalLoginCheckReq>) -> impl IntoResponse {
    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    let sent = state
        .control_tx
        .send(ControlEvent::Kick {
            user_id: req.user_id,
            platform_id: req.platform_id,
            incoming_token: req.token,
            reply: reply_tx,
        })
        .await;
    if sent.is_err() {
        return internal_error("control loop unavailable").into_response();
    }
    match reply_rx.await {
        Ok(kicked_conn_ids) => Json(MultiTerminalLoginCheckResp { kicked_conn_ids }).into_response(),
        Err(_) => internal_error("control loop dropped the reply channel").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_is_constructible() {
        let _ = router();
    }
}
