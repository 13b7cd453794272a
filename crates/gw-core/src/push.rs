use std::sync::Arc;

use gw_protocol::{
    GetUsersOnlineStatusResp, KickUserOfflineResp, OnlineBatchPushOneMsgResp, PlatformDetail,
    SingleMsgToUserPlatform, SingleMsgToUserResults, UserOnlineStatusResult,
};

use crate::bucket::BucketManager;
use crate::config::GatewayConfig;
use crate::conn::GatewayConnection;

/// `GetUsersOnlineStatus`: enumerate all connections for each requested user
/// id. Users with no connections anywhere are omitted entirely from the
/// result rather than returned with an empty platform list.
pub fn get_users_online_status(manager: &BucketManager, user_ids: &[String]) -> GetUsersOnlineStatusResp {
    let mut successful_result = Vec::new();
    for user_id in user_ids {
        let bucket = manager.bucket_for(user_id);
        let clients = bucket.get_user_clients(user_id);
        if clients.is_empty() {
            continue;
        }
        let platform_details = clients
            .iter()
            .map(|c| PlatformDetail {
                platform_id: c.platform_id(),
                conn_id: c.conn_id().to_owned(),
                token: c.token().to_owned(),
                is_background: c.is_background(),
            })
            .collect();
        successful_result.push(UserOnlineStatusResult {
            user_id: user_id.clone(),
            status: 1,
            platform_details,
        });
    }
    GetUsersOnlineStatusResp { successful_result }
}

/// Per-recipient push outcome codes.
pub const RESULT_OK: i32 = 0;
pub const RESULT_PUSH_ERROR: i32 = 500;
pub const RESULT_IOS_BACKGROUND_SUPPRESSED: i32 = 501;

fn should_suppress(cfg: &GatewayConfig, conn: &dyn GatewayConnection) -> bool {
    conn.is_background() && conn.platform_id() == cfg.background_suppressed_platform
}

/// `SuperGroupOnlineBatchPushOneMsg`: push one message to every online
/// connection of each recipient user id, applying iOS-background
/// suppression, and reporting a per-platform result code for each.
///
/// `deliver` performs the actual `push_frame` call for one connection; it is
/// a parameter (rather than hardcoded) so callers can swap in codec/encoding
/// concerns (e.g. per-session binary vs JSON framing) without this function
/// needing to know about them.
pub fn super_group_push(
    cfg: &GatewayConfig,
    manager: &BucketManager,
    user_ids: &[String],
    deliver: impl Fn(&dyn GatewayConnection) -> bool,
) -> OnlineBatchPushOneMsgResp {
    let mut results = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
        let bucket = manager.bucket_for(user_id);
        let clients = bucket.get_user_clients(user_id);
        let mut online_push = false;
        let mut per_platform = Vec::with_capacity(clients.len());
        for conn in &clients {
            let code = if should_suppress(cfg, conn.as_ref()) {
                RESULT_IOS_BACKGROUND_SUPPRESSED
            } else if deliver(conn.as_ref()) {
                if cfg.is_push_terminal(conn.platform_id()) {
                    online_push = true;
                }
                RESULT_OK
            } else {
                RESULT_PUSH_ERROR
            };
            per_platform.push(SingleMsgToUserPlatform {
                recv_platform_id: conn.platform_id(),
                result_code: code,
            });
        }
        results.push(SingleMsgToUserResults {
            user_id: user_id.clone(),
            online_push,
            results: per_platform,
        });
    }
    OnlineBatchPushOneMsgResp { results }
}

/// `KickUserOffline`: evict every connection of each user id on the given
/// platform. `notify` is called once per evicted connection before it is
/// closed, so the caller can send a `KICK_ONLINE_MSG` frame first.
pub fn kick_user_offline(
    manager: &BucketManager,
    user_ids: &[String],
    platform_id: i32,
    notify: impl Fn(&Arc<dyn GatewayConnection>),
) -> KickUserOfflineResp {
    let mut kicked_conn_ids = Vec::new();
    for user_id in user_ids {
        let bucket = manager.bucket_for(user_id);
        for conn in bucket.get_user_platform_clients(user_id, platform_id) {
            notify(&conn);
            conn.close();
            kicked_conn_ids.push(conn.conn_id().to_owned());
        }
    }
    KickUserOfflineResp { kicked_conn_ids }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeConn {
        id: String,
        user_id: String,
        platform_id: i32,
        background: bool,
        closed: AtomicBool,
    }

    impl GatewayConnection for FakeConn {
        fn conn_id(&self) -> &str {
            &self.id
        }
        fn user_id(&self) -> &str {
            &self.user_id
        }
        fn platform_id(&self) -> i32 {
            self.platform_id
        }
        fn token(&self) -> &str {
            "tok"
        }
        fn ip(&self) -> &str {
            "127.0.0.1"
        }
        fn is_background(&self) -> bool {
            self.background
        }
        fn push_frame(&self, _frame: Vec<u8>) -> Result<(), CoreError> {
            Ok(())
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn conn(id: &str, user_id: &str, platform_id: i32, background: bool) -> Arc<FakeConn> {
        Arc::new(FakeConn {
            id: id.to_owned(),
            user_id: user_id.to_owned(),
            platform_id,
            background,
            closed: AtomicBool::new(false),
        })
    }

    #[test]
    fn get_users_online_status_omits_offline_users() {
        let manager = BucketManager::new(4, 1, 4);
        let c = conn("c1", "u1", 2, false);
        manager.bucket_for("u1").put_client(c);

        let resp = get_users_online_status(&manager, &["u1".to_owned(), "ghost".to_owned()]);
        assert_eq!(resp.successful_result.len(), 1);
        assert_eq!(resp.successful_result[0].user_id, "u1");
    }

    #[test]
    fn super_group_push_suppresses_ios_background() {
        let cfg = GatewayConfig::default();
        let manager = BucketManager::new(4, 1, 4);
        let c = conn("c1", "u1", 2, true);
        manager.bucket_for("u1").put_client(c);

        let resp = super_group_push(&cfg, &manager, &["u1".to_owned()], |_| true);
        assert_eq!(resp.results.len(), 1);
        assert_eq!(resp.results[0].results[0].result_code, RESULT_IOS_BACKGROUND_SUPPRESSED);
        assert!(!resp.results[0].online_push);
    }

    #[test]
    fn super_group_push_marks_online_push_on_push_terminal_success() {
        let cfg = GatewayConfig::default();
        let manager = BucketManager::new(4, 1, 4);
        let c = conn("c1", "u1", 3, false);
        manager.bucket_for("u1").put_client(c);

        let resp = super_group_push(&cfg, &manager, &["u1".to_owned()], |_| true);
        assert!(resp.results[0].online_push);
        assert_eq!(resp.results[0].results[0].result_code, RESULT_OK);
    }

    #[test]
    fn super_group_push_reports_push_error_when_delivery_fails() {
        let cfg = GatewayConfig::default();
        let manager = BucketManager::new(4, 1, 4);
        let c = conn("c1", "u1", 2, false);
        manager.bucket_for("u1").put_client(c);

        let resp = super_group_push(&cfg, &manager, &["u1".to_owned()], |_| false);
        assert_eq!(resp.results[0].results[0].result_code, RESULT_PUSH_ERROR);
        assert!(!resp.results[0].online_push);
    }

    #[test]
    fn kick_user_offline_closes_matching_platform_only() {
        let manager = BucketManager::new(4, 1, 4);
        let c1 = conn("c1", "u1", 2, false);
        let c2 = conn("c2", "u1", 3, false);
        manager.bucket_for("u1").put_client(c1.clone());
        manager.bucket_for("u1").put_client(c2.clone());

        let resp = kick_user_offline(&manager, &["u1".to_owned()], 2, |_| {});
        assert_eq!(resp.kicked_conn_ids, vec!["c1".to_owned()]);
        assert!(c1.closed.load(Ordering::SeqCst));
        assert!(!c2.closed.load(Ordering::SeqCst));
    }
}
