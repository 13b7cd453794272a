use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use gw_codec::Encoding;
use gw_core::{CoreError, GatewayConnection};
use gw_protocol::{ControlMessage, req_id};
use std::sync::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::control::ControlEvent;
use crate::dispatch;
use crate::state::AppState;

/// What the writer task actually flushes to the socket: a data frame, which
/// is batched and optionally gzipped, or a transport-level ping, which
/// bypasses batching so heartbeats stay timely under load. Routing both
/// through the same channel is what gives this gateway a single owner of
/// the socket's write half without a separate write-mutex.
pub enum OutboundItem {
    Frame(Vec<u8>),
    /// Application-level keepalive control message (JSON text frame).
    Control(String),
    Ping,
}

/// Live WebSocket session. Implements [`GatewayConnection`] so `gw-core`'s
/// transport-agnostic registry logic (buckets, rooms, subscriptions) can
/// hold and address it without knowing about axum or sockets.
pub struct WsClient {
    pub conn_id: String,
    pub user_id: String,
    pub platform_id: i32,
    pub token: String,
    pub encoding: Encoding,
    pub ip: String,
    pub background: AtomicBool,
    pub compression: bool,
    pub last_active_epoch_secs: AtomicI64,
    pub room_id: SyncMutex<Option<String>>,
    closed: AtomicBool,
    outbound_tx: mpsc::Sender<OutboundItem>,
    cancel: CancellationToken,
    control_tx: mpsc::Sender<ControlEvent>,
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl WsClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn_id: String,
        user_id: String,
        platform_id: i32,
        token: String,
        encoding: Encoding,
        ip: String,
        compression: bool,
        send_queue_depth: usize,
        control_tx: mpsc::Sender<ControlEvent>,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundItem>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(send_queue_depth.max(1));
        let client = Arc::new(Self {
            conn_id,
            user_id,
            platform_id,
            token,
            encoding,
            ip,
            background: AtomicBool::new(false),
            compression,
            last_active_epoch_secs: AtomicI64::new(now_epoch_secs()),
            room_id: SyncMutex::new(None),
            closed: AtomicBool::new(false),
            outbound_tx,
            cancel: CancellationToken::new(),
            control_tx,
        });
        (client, outbound_rx)
    }

    pub fn touch_last_active(&self) {
        self.last_active_epoch_secs.store(now_epoch_secs(), Ordering::SeqCst);
    }

    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::SeqCst);
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Encode and enqueue a response envelope in this session's negotiated encoding.
    pub fn push_response(&self, resp: &gw_protocol::ResponseEnvelope) -> Result<(), CoreError> {
        let bytes = gw_codec::encode(self.encoding, resp).map_err(|_| CoreError::SendQueueFull)?;
        self.push_frame(bytes)
    }

    pub fn kick_online(&self, reason: &str) {
        let resp = gw_protocol::ResponseEnvelope::error(req_id::KICK_ONLINE_MSG, 0, "", 1, reason);
        let _ = self.push_response(&resp);
        self.close();
    }

    fn send_ping(&self) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::ConnClosed);
        }
        self.outbound_tx.try_send(OutboundItem::Ping).map_err(|_| CoreError::SendQueueFull)
    }

    /// Enqueue an application-level keepalive control message (e.g. a pong
    /// reply), sent as a JSON text frame rather than through the binary
    /// data-plane encoding.
    pub fn send_control(&self, msg: &ControlMessage) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::ConnClosed);
        }
        let json = serde_json::to_string(msg).map_err(|_| CoreError::SendQueueFull)?;
        self.outbound_tx.try_send(OutboundItem::Control(json)).map_err(|_| CoreError::SendQueueFull)
    }
}

impl GatewayConnection for WsClient {
    fn conn_id(&self) -> &str {
        &self.conn_id
    }
    fn user_id(&self) -> &str {
        &self.user_id
    }
    fn platform_id(&self) -> i32 {
        self.platform_id
    }
    fn token(&self) -> &str {
        &self.token
    }
    fn ip(&self) -> &str {
        &self.ip
    }
    fn is_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    fn push_frame(&self, frame: Vec<u8>) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::ConnClosed);
        }
        self.outbound_tx.try_send(OutboundItem::Frame(frame)).map_err(|_| CoreError::SendQueueFull)
    }

    /// The exclusive CAS owner of a client's shutdown: cancels its token and
    /// notifies the control task to unregister it. Idempotent -- a second
    /// caller sees `closed` already `true` and does nothing further.
    fn close(&self) {
        if self.closed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.cancel.cancel();
            let room_id = self.room_id.lock().expect("room_id lock poisoned").clone();
            let _ = self.control_tx.try_send(ControlEvent::Unregister {
                conn_id: self.conn_id.clone(),
                user_id: self.user_id.clone(),
                platform_id: self.platform_id,
                ip: self.ip.clone(),
                room_id,
            });
        }
    }

    /// Send a `KICK_ONLINE_MSG` response in this session's own encoding
    /// before closing, rather than the trait default's bare close.
    fn kick(&self, reason: &str) {
        self.kick_online(reason);
    }

    fn push_typed(&self, req_identifier: i32, data: Vec<u8>) -> Result<(), CoreError> {
        let resp = gw_protocol::ResponseEnvelope::ok(req_identifier, 0, "", data);
        self.push_response(&resp)
    }
}

/// Drives the reader half of a session: frames in, handed off through this
/// session's ring buffer to a dedicated dispatch task, or handled inline for
/// control-channel keepalive. Exits (and closes the session) on any read
/// error, heartbeat timeout, or explicit kick.
///
/// The ring buffer decouples the socket read loop from request processing:
/// a slow handler (e.g. one blocked briefly on a bucket lock under fan-out
/// load) backs up in the ring rather than stalling the read of the next
/// WebSocket frame.
pub async fn reader_loop(client: Arc<WsClient>, mut ws_rx: futures_util::stream::SplitStream<WebSocket>, state: AppState) {
    let pong_wait = state.config.pong_wait;
    let ring = Arc::new(gw_ring::Ring::<Vec<u8>>::new(state.config.ring_capacity));
    let dispatch_handle = tokio::spawn(dispatch_loop(client.clone(), ring.clone(), state.clone()));
    // A panicking request handler must not leave the session registered
    // forever: join the dispatch task from a side watcher and close the
    // session if it ever exits via panic rather than cancellation.
    let watchdog_client = client.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatch_handle.await {
            if e.is_panic() {
                tracing::error!(conn_id = %watchdog_client.conn_id, "dispatch task panicked, closing session");
            }
            watchdog_client.close();
        }
    });

    loop {
        let frame = tokio::select! {
            _ = client.cancellation().cancelled() => break,
            frame = tokio::time::timeout(pong_wait, ws_rx.next()) => frame,
        };

        let msg = match frame {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => {
                tracing::info!(conn_id = %client.conn_id, "heartbeat timeout, closing session");
                break;
            }
        };

        client.touch_last_active();
        match msg {
            Message::Binary(bytes) => {
                let payload = if client.compression {
                    match state.gzip_pool.decompress(&bytes, bytes.len() * 4) {
                        Ok(out) => out,
                        Err(_) => {
                            tracing::warn!(conn_id = %client.conn_id, "invalid frame: gzip decompress failed");
                            break;
                        }
                    }
                } else {
                    bytes.to_vec()
                };
                ring.push(payload).await;
            }
            Message::Text(text) => {
                if let Ok(ControlMessage::Ping) = serde_json::from_str::<ControlMessage>(&text) {
                    let _ = client.send_control(&ControlMessage::Pong);
                } else if let Ok(ControlMessage::Pong) = serde_json::from_str::<ControlMessage>(&text) {
                    // no-op, read deadline already rolled forward above
                } else {
                    tracing::warn!(conn_id = %client.conn_id, "unsupported text frame, closing session");
                    break;
                }
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }
    client.close();
}

/// Drains one session's ring buffer and runs each buffered frame through the
/// request dispatcher. Exits once the session is cancelled; any frames still
/// sitting in the ring at that point are dropped along with it.
async fn dispatch_loop(client: Arc<WsClient>, ring: Arc<gw_ring::Ring<Vec<u8>>>, state: AppState) {
    loop {
        let payload = tokio::select! {
            _ = client.cancellation().cancelled() => break,
            payload = ring.pop() => payload,
        };
        dispatch::process_binary(&client, &payload, &state).await;
    }
}

/// Drives the writer half: coalesces up to `writer_batch_size` frames per
/// `writer_tick`, applies gzip above the configured threshold, and writes
/// them out. A single mutex-free owner per socket keeps writes ordered
/// without a separate write-mutex: ping/pong control frames are sent
/// through this same outbound queue rather than a second writer, so
/// ordering is automatic.
pub async fn writer_loop(
    client: Arc<WsClient>,
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundItem>,
    state: AppState,
) {
    let mut batch: Vec<Vec<u8>> = Vec::with_capacity(state.config.writer_batch_size);
    let mut ticker = tokio::time::interval(state.config.writer_tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = client.cancellation().cancelled() => {
                flush(&client, &mut ws_tx, &mut batch, &state).await;
                break;
            }
            item = outbound_rx.recv() => {
                match item {
                    Some(OutboundItem::Frame(frame)) => {
                        batch.push(frame);
                        if batch.len() >= state.config.writer_batch_size
                            && !flush(&client, &mut ws_tx, &mut batch, &state).await
                        {
                            break;
                        }
                    }
                    Some(OutboundItem::Control(json)) => {
                        if !flush(&client, &mut ws_tx, &mut batch, &state).await {
                            break;
                        }
                        let write = tokio::time::timeout(state.config.write_deadline, ws_tx.send(Message::Text(json.into())));
                        if write.await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundItem::Ping) => {
                        if !flush(&client, &mut ws_tx, &mut batch, &state).await {
                            break;
                        }
                        let write = tokio::time::timeout(state.config.write_deadline, ws_tx.send(Message::Ping(Vec::new().into())));
                        if write.await.is_err() {
                            break;
                        }
                    }
                    None => {
                        flush(&client, &mut ws_tx, &mut batch, &state).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty() && !flush(&client, &mut ws_tx, &mut batch, &state).await {
                    break;
                }
            }
        }
    }
    let _ = ws_tx.close().await;
    client.close();
}

/// Returns `false` on a write error (caller should stop the loop).
async fn flush(
    client: &Arc<WsClient>,
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    batch: &mut Vec<Vec<u8>>,
    state: &AppState,
) -> bool {
    if batch.is_empty() {
        return true;
    }
    for frame in batch.drain(..) {
        let payload = if gw_codec::GzipPool::should_compress(client.compression, frame.len(), state.config.gzip_min_bytes) {
            state.gzip_pool.compress(&frame).unwrap_or(frame.clone())
        } else {
            frame
        };
        let write = tokio::time::timeout(state.config.write_deadline, ws_tx.send(Message::Binary(payload.into())));
        if write.await.is_err() {
            return false;
        }
    }
    true
}

/// Server-initiated ping task: sends a low-level ping every `ping_period`
/// until the session closes. Routed through the writer's outbound channel
/// rather than writing to the socket directly, since the writer task is
/// this session's sole owner of the write half.
pub async fn ping_loop(client: Arc<WsClient>, ping_period: Duration) {
    let mut ticker = tokio::time::interval(ping_period);
    loop {
        tokio::select! {
            _ = client.cancellation().cancelled() => break,
            _ = ticker.tick() => {
                if client.send_ping().is_err() {
                    break;
                }
            }
        }
    }
}
