use std::sync::Arc;
use std::time::Duration;

use gw_core::GatewayConnection;
use gw_protocol::{ResponseEnvelope, SubUserOnlineStatus, req_id};

use crate::client::WsClient;
use crate::state::AppState;

/// Backend request identifiers this gateway only frames and routes --
/// message persistence, sequence numbers, and pull/fan-out live in the
/// out-of-scope back-end services named in the purpose section. A real
/// deployment plugs a handler in here; absent one, every such request
/// gets a well-formed "not implemented" reply rather than hanging.
const OUT_OF_SCOPE_REQUEST_IDS: &[i32] = &[
    req_id::GET_NEWEST_SEQ,
    req_id::PULL_MSG_BY_SEQ_LIST,
    req_id::SEND_MSG,
    req_id::SEND_SIGNAL_MSG,
    req_id::PULL_MSG,
    req_id::GET_CONV_MAX_READ_SEQ,
    req_id::PULL_CONV_LAST_MESSAGE,
];

/// Decode a binary frame in this session's negotiated encoding, then
/// dispatch it. Envelope decode failures close the session outright
/// (handled by the caller, which breaks its read loop on `Err`).
pub async fn process_binary(client: &Arc<WsClient>, payload: &[u8], state: &AppState) {
    let req: gw_protocol::RequestEnvelope = match gw_codec::decode(client.encoding, payload) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(conn_id = %client.conn_id, error = %e, "invalid frame, closing session");
            client.close();
            return;
        }
    };
    process_request(client, &req, state).await;
}

/// Authenticate and dispatch one decoded request. Mirrors the reference
/// gateway's `process_binary` authentication/dispatch table.
async fn process_request(client: &Arc<WsClient>, req: &gw_protocol::RequestEnvelope, state: &AppState) {
    let span = tracing::info_span!(
        "request",
        conn_id = %client.conn_id,
        send_id = %req.send_id,
        platform_id = client.platform_id,
        operation_id = %req.operation_id,
    );
    let _enter = span.enter();

    if req.send_id != client.user_id {
        let resp = ResponseEnvelope::error(
            req.req_identifier,
            req.msg_incr,
            &req.operation_id,
            1,
            "exception: sendID not equal session userID",
        );
        let _ = client.push_response(&resp);
        return;
    }

    if req.req_identifier == req_id::LOGOUT_MSG {
        handle_logout(client, req).await;
        return;
    }
    if req.req_identifier == req_id::SET_BACKGROUND_STATUS {
        handle_set_background(client, req);
        return;
    }
    if req.req_identifier == req_id::SUB_USER_ONLINE_STATUS {
        handle_subscribe(client, req, state);
        return;
    }
    if OUT_OF_SCOPE_REQUEST_IDS.contains(&req.req_identifier) {
        let resp = ResponseEnvelope::error(
            req.req_identifier,
            req.msg_incr,
            &req.operation_id,
            2,
            "not implemented: backend service out of scope for this gateway",
        );
        let _ = client.push_response(&resp);
        return;
    }

    tracing::warn!(req_identifier = req.req_identifier, "unknown request identifier");
    let resp = ResponseEnvelope::error(
        req.req_identifier,
        req.msg_incr,
        &req.operation_id,
        3,
        format!("unknown req_identifier {}", req.req_identifier),
    );
    let _ = client.push_response(&resp);
}

async fn handle_logout(client: &Arc<WsClient>, req: &gw_protocol::RequestEnvelope) {
    let resp = ResponseEnvelope::ok(req.req_identifier, req.msg_incr, &req.operation_id, Vec::new());
    let _ = client.push_response(&resp);
    let client = client.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.close();
    });
}

fn handle_set_background(client: &Arc<WsClient>, req: &gw_protocol::RequestEnvelope) {
    let background = serde_json::from_slice::<serde_json::Value>(&req.data)
        .ok()
        .and_then(|v| v.get("background").and_then(serde_json::Value::as_bool))
        .unwrap_or(false);
    client.set_background(background);
    let resp = ResponseEnvelope::ok(req.req_identifier, req.msg_incr, &req.operation_id, Vec::new());
    let _ = client.push_response(&resp);
}

fn handle_subscribe(client: &Arc<WsClient>, req: &gw_protocol::RequestEnvelope, state: &AppState) {
    let body: SubUserOnlineStatus = serde_json::from_slice(&req.data).unwrap_or_default();
    let conn: Arc<dyn GatewayConnection> = client.clone();
    state.subscription.sub(&conn, &body.sub_user_id, &body.unsub_user_id);
    let resp = ResponseEnvelope::ok(req.req_identifier, req.msg_incr, &req.operation_id, Vec::new());
    let _ = client.push_response(&resp);
}

#[cfg(test)]
mod tests {
    use super::OUT_OF_SCOPE_REQUEST_IDS;
    use gw_protocol::req_id;

    #[test]
    fn out_of_scope_ids_match_the_client_to_server_data_plane_table() {
        for id in [
            req_id::GET_NEWEST_SEQ,
            req_id::PULL_MSG_BY_SEQ_LIST,
            req_id::SEND_MSG,
            req_id::SEND_SIGNAL_MSG,
            req_id::PULL_MSG,
            req_id::GET_CONV_MAX_READ_SEQ,
            req_id::PULL_CONV_LAST_MESSAGE,
        ] {
            assert!(OUT_OF_SCOPE_REQUEST_IDS.contains(&id));
        }
        assert!(!OUT_OF_SCOPE_REQUEST_IDS.contains(&req_id::LOGOUT_MSG));
    }
}
