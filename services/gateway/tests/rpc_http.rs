//! Integration tests for the `/api/v1/gateway/*` operator HTTP surface.
use std::net::SocketAddr;
use std::time::Duration;

use gateway::state::AppState;
use gw_core::GatewayConfig;
use gw_protocol::{GetUsersOnlineStatusResp, KickUserOfflineResp, MultiTerminalLoginCheckResp};
use gw_test_utils::MockWsClient;

async fn spawn_gateway() -> SocketAddr {
    let config = GatewayConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        ..GatewayConfig::default()
    };
    let (downstream_tx, downstream_rx) = tokio::sync::mpsc::channel(64);
    std::mem::forget(downstream_rx);
    let batcher = gw_core::OnlineStatusBatcher::new(1, config.online_merge_tick, 256, downstream_tx, 0);
    let (control_tx, control_rx) = tokio::sync::mpsc::channel(256);
    let state = AppState::new(config, batcher, control_tx);
    tokio::spawn(gateway::control::control_loop(state.clone(), control_rx));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = gateway::build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

#[tokio::test]
async fn get_users_online_status_reports_a_connected_user() {
    let addr = spawn_gateway().await;
    let _client = MockWsClient::connect(&format!("ws://{addr}/ws"), "t1", "u1", 3).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp: GetUsersOnlineStatusResp = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/gateway/users/online-status"))
        .json(&serde_json::json!({ "user_ids": ["u1", "ghost"] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp.successful_result.len(), 1);
    assert_eq!(resp.successful_result[0].user_id, "u1");
    assert_eq!(resp.successful_result[0].platform_details[0].platform_id, 3);
}

#[tokio::test]
async fn kick_endpoint_evicts_the_matching_platform() {
    let addr = spawn_gateway().await;
    let mut client = MockWsClient::connect(&format!("ws://{addr}/ws"), "t1", "u1", 2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp: KickUserOfflineResp = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/gateway/kick"))
        .json(&serde_json::json!({ "user_ids": ["u1"], "platform_id": 2 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp.kicked_conn_ids.len(), 1);
    // The session should now be closed by the server.
    let recv_result = tokio::time::timeout(Duration::from_secs(1), client.recv()).await;
    assert!(recv_result.is_ok(), "expected the kick notification or a closed connection promptly");
}

#[tokio::test]
async fn multi_terminal_login_check_kicks_sessions_with_a_different_token() {
    let addr = spawn_gateway().await;
    let _old = MockWsClient::connect(&format!("ws://{addr}/ws"), "old-token", "u1", 2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp: MultiTerminalLoginCheckResp = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/gateway/multi-terminal-login-check"))
        .json(&serde_json::json!({ "user_id": "u1", "platform_id": 2, "token": "new-token" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp.kicked_conn_ids.len(), 1);
}

#[tokio::test]
async fn push_endpoint_with_no_user_ids_is_rejected() {
    let addr = spawn_gateway().await;
    let status = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/gateway/push"))
        .json(&serde_json::json!({ "user_ids": [], "data": {} }))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
}
