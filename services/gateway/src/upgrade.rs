use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::StreamExt;
use gw_codec::Encoding;
use md5::{Digest, Md5};
use serde::Deserialize;

use crate::client::{WsClient, ping_loop, reader_loop, writer_loop};
use crate::control::ControlEvent;
use crate::response::upgrade_refused;
use crate::state::AppState;

/// Raw query params, all optional strings so a malformed or missing field
/// falls through to [`UpgradeParams::parse`] instead of axum's own rejection
/// — the upgrade endpoint reports every failure as a 200 with a JSON body.
#[derive(Debug, Deserialize)]
pub struct RawUpgradeParams {
    pub token: Option<String>,
    #[serde(rename = "sendID")]
    pub send_id: Option<String>,
    #[serde(rename = "platformID")]
    pub platform_id: Option<String>,
    #[serde(rename = "operationID")]
    pub operation_id: Option<String>,
    #[serde(rename = "sdkType")]
    pub sdk_type: Option<String>,
    pub compression: Option<String>,
}

#[derive(Debug)]
pub struct UpgradeParams {
    pub token: String,
    pub send_id: String,
    pub platform_id: i32,
    pub operation_id: Option<String>,
    pub sdk_type: Option<String>,
    pub compression: Option<String>,
}

impl UpgradeParams {
    fn parse(raw: RawUpgradeParams) -> Result<Self, &'static str> {
        let token = raw.token.filter(|s| !s.is_empty()).ok_or("token is required")?;
        let send_id = raw.send_id.filter(|s| !s.is_empty()).ok_or("sendID is required")?;
        let platform_id = raw
            .platform_id
            .as_deref()
            .ok_or("platformID is required")?
            .parse::<i32>()
            .map_err(|_| "platformID must be a decimal integer")?;
        Ok(Self {
            token,
            send_id,
            platform_id,
            operation_id: raw.operation_id,
            sdk_type: raw.sdk_type,
            compression: raw.compression,
        })
    }
}

fn encoding_for(sdk_type: Option<&str>) -> Encoding {
    match sdk_type {
        Some("js") => Encoding::Json,
        _ => Encoding::StructuredBinary,
    }
}

/// The remote address used for connection-id derivation: the first hop of
/// `X-Forwarded-For` when present, otherwise the socket's peer address.
fn remote_addr(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| peer.ip().to_string())
}

fn compute_conn_id(remote_addr: &str, millis: u128) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("{remote_addr}_{millis}"));
    format!("{:x}", hasher.finalize())
}

fn wants_compression(params: &UpgradeParams, headers: &HeaderMap) -> bool {
    let query_says = params.compression.as_deref() == Some("gzip");
    let header_says = headers.get("compression").and_then(|v| v.to_str().ok()) == Some("gzip");
    query_says || header_says
}

pub async fn ws_upgrade_handler(
    State(state): State<AppState>,
    Query(raw): Query<RawUpgradeParams>,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let params = match UpgradeParams::parse(raw) {
        Ok(params) => params,
        Err(message) => {
            return upgrade_refused(gw_protocol::error_codes::INVALID_ARGS, message).into_response();
        }
    };
    if state.online_count.load(Ordering::SeqCst) >= state.config.max_conn_count {
        return upgrade_refused(gw_protocol::error_codes::TOO_MANY_CONNECTIONS, "too many connections").into_response();
    }

    let ip = remote_addr(&headers, peer);
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
    let conn_id = compute_conn_id(&ip, millis);
    let encoding = encoding_for(params.sdk_type.as_deref());
    let compression = wants_compression(&params, &headers);

    tracing::info!(
        conn_id = %conn_id,
        user_id = %params.send_id,
        platform_id = params.platform_id,
        operation_id = %params.operation_id.unwrap_or_default(),
        "upgrading connection"
    );

    let ws = ws
        .max_message_size(state.config.max_message_size)
        .write_buffer_size(state.config.write_buffer_size);

    ws.on_upgrade(move |socket| async move {
        let (client, outbound_rx) = WsClient::new(
            conn_id,
            params.send_id,
            params.platform_id,
            params.token,
            encoding,
            ip,
            compression,
            state.config.send_queue_depth,
            state.control_tx.clone(),
        );

        // Bound how long the handshake may stall waiting for the control
        // task to pick up the register event (a wedged or saturated control
        // channel should fail this connection, not hang it indefinitely).
        let registered = tokio::time::timeout(
            state.config.handshake_timeout,
            state.control_tx.send(ControlEvent::Register(client.clone())),
        )
        .await;
        match registered {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                client.close();
                return;
            }
        }

        let (ws_tx, ws_rx) = socket.split();
        let ping_period = state.config.ping_period;
        tokio::spawn(ping_loop(client.clone(), ping_period));
        tokio::spawn(writer_loop(client.clone(), ws_tx, outbound_rx, state.clone()));

        // Run the reader on its own task so a panic there (a reader-side
        // "goroutine panic" in the reference gateway's terms) is caught at
        // the task boundary and still closes the session, instead of
        // unwinding straight out of this upgrade future and leaving the
        // connection registered forever.
        let reader_client = client.clone();
        let reader_handle = tokio::spawn(reader_loop(client, ws_rx, state));
        if let Err(e) = reader_handle.await {
            if e.is_panic() {
                tracing::error!(conn_id = %reader_client.conn_id, "reader task panicked, closing session");
            }
            reader_client.close();
        }
    })
    .into_response()
}
