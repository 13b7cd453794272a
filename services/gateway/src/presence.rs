use gw_core::GatewayConnection;
use gw_protocol::{SubUserOnlineStatusElem, SubUserOnlineStatusTips, req_id};

use crate::state::AppState;

/// Push a `SubUserOnlineStatusTips` frame to every connection watching
/// `user_id`, carrying its current full online-platform set (not just a
/// delta -- a watcher that missed the previous tip still ends up correct).
pub fn notify_subscribers(state: &AppState, user_id: &str) {
    let watchers = state.subscription.get(user_id);
    if watchers.is_empty() {
        return;
    }
    let online_platform_ids = state
        .buckets
        .bucket_for(user_id)
        .user_platforms_entry(user_id)
        .map(|entry| entry.online_platform_ids())
        .unwrap_or_default();

    let tips = SubUserOnlineStatusTips {
        subscribers: vec![SubUserOnlineStatusElem {
            user_id: user_id.to_owned(),
            online_platform_ids,
        }],
    };
    let data = serde_json::to_vec(&tips).unwrap_or_default();
    for watcher in watchers {
        // A watcher with a full outbound queue just misses this tip; it is
        // not retried, matching the broadcast-skip-on-full-queue behavior
        // elsewhere in this gateway.
        let _ = watcher.push_typed(req_id::SUB_USER_ONLINE_STATUS, data.clone());
    }
}
