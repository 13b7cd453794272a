//! Integration tests driving a live gateway instance end to end over real
//! WebSocket connections via `gw-test-utils`.
use std::net::SocketAddr;
use std::time::Duration;

use gateway::state::AppState;
use gw_core::GatewayConfig;
use gw_protocol::{ControlMessage, RequestEnvelope, SubUserOnlineStatus, req_id};
use gw_test_utils::{FakeUserService, MockWsClient, WireFrame};

async fn spawn_gateway() -> (SocketAddr, FakeUserService) {
    let config = GatewayConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        online_merge_tick: Duration::from_millis(20),
        ping_period: Duration::from_millis(50),
        pong_wait: Duration::from_secs(5),
        ..GatewayConfig::default()
    };
    let (downstream_tx, downstream_rx) = tokio::sync::mpsc::channel(64);
    let user_service = FakeUserService::spawn(downstream_rx);
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
    (addr, user_service)
}

fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

#[tokio::test]
async fn register_then_online_status_reports_the_connected_platform() {
    let (addr, user_service) = spawn_gateway().await;
    let mut client = MockWsClient::connect(&ws_url(addr), "t1", "u1", 2).await.unwrap();

    // Give the control loop a moment to apply the register event and the
    // batcher a tick to flush it downstream.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(user_service.total_updates() >= 1);
    let saw_u1_online = user_service
        .batches()
        .into_iter()
        .flatten()
        .any(|u| u.user_id == "u1" && u.online_platform_ids == vec![2]);
    assert!(saw_u1_online);

    client.close().await.unwrap();
}

#[tokio::test]
async fn logout_request_gets_an_ok_response_then_the_session_closes() {
    let (addr, _user_service) = spawn_gateway().await;
    let mut client = MockWsClient::connect(&ws_url(addr), "t1", "u1", 2).await.unwrap();

    client
        .send_envelope(&RequestEnvelope {
            req_identifier: req_id::LOGOUT_MSG,
            token: "t1".into(),
            send_id: "u1".into(),
            operation_id: "op-1".into(),
            msg_incr: 1,
            data: Vec::new(),
        })
        .await
        .unwrap();

    match client.recv().await.unwrap() {
        WireFrame::Response(resp) => {
            assert_eq!(resp.req_identifier, req_id::LOGOUT_MSG);
            assert_eq!(resp.err_code, 0);
        }
        other => panic!("expected a response envelope, got {other:?}"),
    }
}

#[tokio::test]
async fn mismatched_send_id_is_rejected_without_closing_the_session() {
    let (addr, _user_service) = spawn_gateway().await;
    let mut client = MockWsClient::connect(&ws_url(addr), "t1", "u1", 2).await.unwrap();

    client
        .send_envelope(&RequestEnvelope {
            req_identifier: req_id::SET_BACKGROUND_STATUS,
            token: "t1".into(),
            send_id: "someone-else".into(),
            operation_id: "op-1".into(),
            msg_incr: 1,
            data: serde_json::to_vec(&serde_json::json!({"background": true})).unwrap(),
        })
        .await
        .unwrap();

    match client.recv().await.unwrap() {
        WireFrame::Response(resp) => assert_ne!(resp.err_code, 0),
        other => panic!("expected a response envelope, got {other:?}"),
    }

    // The session is still open: a second, well-formed request still works.
    client
        .send_envelope(&RequestEnvelope {
            req_identifier: req_id::SET_BACKGROUND_STATUS,
            token: "t1".into(),
            send_id: "u1".into(),
            operation_id: "op-2".into(),
            msg_incr: 2,
            data: serde_json::to_vec(&serde_json::json!({"background": true})).unwrap(),
        })
        .await
        .unwrap();
    match client.recv().await.unwrap() {
        WireFrame::Response(resp) => assert_eq!(resp.err_code, 0),
        other => panic!("expected a response envelope, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_req_identifier_gets_a_non_zero_err_code_and_stays_open() {
    let (addr, _user_service) = spawn_gateway().await;
    let mut client = MockWsClient::connect(&ws_url(addr), "t1", "u1", 2).await.unwrap();

    client
        .send_envelope(&RequestEnvelope {
            req_identifier: 9999,
            token: "t1".into(),
            send_id: "u1".into(),
            operation_id: "op-1".into(),
            msg_incr: 1,
            data: Vec::new(),
        })
        .await
        .unwrap();

    match client.recv().await.unwrap() {
        WireFrame::Response(resp) => {
            assert_eq!(resp.req_identifier, 9999);
            assert_ne!(resp.err_code, 0);
        }
        other => panic!("expected a response envelope, got {other:?}"),
    }
}

#[tokio::test]
async fn subscribing_to_a_user_gets_a_presence_tip_on_their_register() {
    let (addr, _user_service) = spawn_gateway().await;
    let mut watcher = MockWsClient::connect(&ws_url(addr), "t-watch", "watcher", 1).await.unwrap();

    watcher
        .send_envelope(&RequestEnvelope {
            req_identifier: req_id::SUB_USER_ONLINE_STATUS,
            token: "t-watch".into(),
            send_id: "watcher".into(),
            operation_id: "op-1".into(),
            msg_incr: 1,
            data: serde_json::to_vec(&SubUserOnlineStatus {
                sub_user_id: vec!["watched".to_owned()],
                unsub_user_id: vec![],
            })
            .unwrap(),
        })
        .await
        .unwrap();
    match watcher.recv().await.unwrap() {
        WireFrame::Response(resp) => assert_eq!(resp.err_code, 0),
        other => panic!("expected a response envelope, got {other:?}"),
    }

    let _watched = MockWsClient::connect(&ws_url(addr), "t-watched", "watched", 2).await.unwrap();

    match watcher.recv().await.unwrap() {
        WireFrame::Response(resp) => {
            assert_eq!(resp.req_identifier, req_id::SUB_USER_ONLINE_STATUS);
            let tips: gw_protocol::SubUserOnlineStatusTips = serde_json::from_slice(&resp.data).unwrap();
            assert_eq!(tips.subscribers[0].user_id, "watched");
            assert_eq!(tips.subscribers[0].online_platform_ids, vec![2]);
        }
        other => panic!("expected a presence tip, got {other:?}"),
    }
}

#[tokio::test]
async fn application_level_ping_gets_a_pong_back() {
    let (addr, _user_service) = spawn_gateway().await;
    let mut client = MockWsClient::connect(&ws_url(addr), "t1", "u1", 2).await.unwrap();

    client.send_control(&ControlMessage::Ping).await.unwrap();
    match client.recv().await.unwrap() {
        WireFrame::Control(ControlMessage::Pong) => {}
        other => panic!("expected a pong, got {other:?}"),
    }
}
