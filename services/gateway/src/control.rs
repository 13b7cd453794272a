use std::sync::Arc;

use gw_core::{GatewayConnection, UserStateUpdate};
use tokio::sync::{mpsc, oneshot};

use crate::client::WsClient;
use crate::presence;
use crate::state::AppState;

/// Everything that must be totally ordered with respect to a gateway
/// process's view of presence: connection registration, removal, and
/// multi-terminal-login eviction. A single task draining one channel is
/// what gives that ordering -- see `control_loop`.
pub enum ControlEvent {
    Register(Arc<WsClient>),
    Unregister {
        conn_id: String,
        user_id: String,
        platform_id: i32,
        ip: String,
        room_id: Option<String>,
    },
    /// Multi-terminal login arbitration: evict every existing
    /// session on `(user_id, platform_id)` whose token differs from
    /// `incoming_token`. Same-token logins are reconnects and survive.
    Kick {
        user_id: String,
        platform_id: i32,
        incoming_token: String,
        reply: oneshot::Sender<Vec<String>>,
    },
}

fn online_platforms_update(state: &AppState, user_id: &str) -> UserStateUpdate {
    let bucket = state.buckets.bucket_for(user_id);
    let online_platform_ids = bucket
        .user_platforms_entry(user_id)
        .map(|entry| entry.online_platform_ids())
        .unwrap_or_default();
    UserStateUpdate {
        user_id: user_id.to_owned(),
        online_platform_ids,
    }
}

/// The gateway's single control task. Drains `rx` and applies each event to
/// the buckets/subscription registry/online-status batcher in arrival
/// order, so register, unregister, and kick are totally ordered with
/// respect to each other.
pub async fn control_loop(state: AppState, mut rx: mpsc::Receiver<ControlEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ControlEvent::Register(client) => {
                let bucket = state.buckets.bucket_for(&client.user_id);
                bucket.put_client(client.clone());
                state.online_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                state.online_batcher.ingest(online_platforms_update(&state, &client.user_id));
                presence::notify_subscribers(&state, &client.user_id);
                state.ui_log.log(format!(
                    "conn_id={} user_id={} platform_id={} registered",
                    client.conn_id, client.user_id, client.platform_id
                ));
            }
            ControlEvent::Unregister {
                conn_id,
                user_id,
                platform_id,
                ip,
                room_id,
            } => {
                let bucket = state.buckets.bucket_for(&user_id);
                bucket.release_ip(&ip);
                bucket.del_client(&conn_id, &user_id, platform_id, room_id.as_deref());
                state.subscription.del_client(&conn_id);
                state.online_count.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                state.online_batcher.ingest(online_platforms_update(&state, &user_id));
                presence::notify_subscribers(&state, &user_id);
                state.ui_log.log(format!("conn_id={conn_id} user_id={user_id} unregistered"));
            }
            ControlEvent::Kick {
                user_id,
                platform_id,
                incoming_token,
                reply,
            } => {
                let bucket = state.buckets.bucket_for(&user_id);
                let existing = bucket.get_user_platform_clients(&user_id, platform_id);
                let to_kick = gw_core::clients_to_kick(&existing, &incoming_token);
                let mut kicked_ids = Vec::with_capacity(to_kick.len());
                for conn in &to_kick {
                    kicked_ids.push(conn.conn_id().to_owned());
                    conn.kick("multi-terminal login: replaced by a new session on this platform");
                }
                if !kicked_ids.is_empty() {
                    state.ui_log.log(format!(
                        "user_id={user_id} platform_id={platform_id} multi-terminal kick evicted {kicked_ids:?}"
                    ));
                }
                let _ = reply.send(kicked_ids);
            }
        }
    }
}
