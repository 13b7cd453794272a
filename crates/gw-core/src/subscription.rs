use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::conn::GatewayConnection;

/// Maps an observed user id to the set of connections watching its presence,
/// plus the reverse index (each connection's own subscription set) needed to
/// clean up in O(watched) time when a connection disconnects rather than
/// scanning every user id in the registry.
pub struct Subscription {
    /// user_id -> (conn_id -> connection)
    watchers: RwLock<HashMap<String, HashMap<String, Arc<dyn GatewayConnection>>>>,
    /// conn_id -> set of user ids it watches
    watching: RwLock<HashMap<String, HashSet<String>>>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription {
    pub fn new() -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            watching: RwLock::new(HashMap::new()),
        }
    }

    /// Add/remove watched user ids for `conn`. Duplicates in `add` and
    /// absent ids in `del` are silently ignored, matching the reference
    /// gateway's idempotent subscribe semantics.
    pub fn sub(&self, conn: &Arc<dyn GatewayConnection>, add: &[String], del: &[String]) {
        let conn_id = conn.conn_id().to_owned();
        let mut watching = self.watching.write().expect("subscription watching lock poisoned");
        let mut watchers = self.watchers.write().expect("subscription watchers lock poisoned");
        let my_set = watching.entry(conn_id.clone()).or_default();

        for user_id in add {
            if my_set.insert(user_id.clone()) {
                watchers
                    .entry(user_id.clone())
                    .or_default()
                    .insert(conn_id.clone(), conn.clone());
            }
        }

        for user_id in del {
            if my_set.remove(user_id) {
                if let Some(set) = watchers.get_mut(user_id) {
                    set.remove(&conn_id);
                    if set.is_empty() {
                        watchers.remove(user_id);
                    }
                }
            }
        }
    }

    pub fn get(&self, user_id: &str) -> Vec<Arc<dyn GatewayConnection>> {
        self.watchers
            .read()
            .expect("subscription watchers lock poisoned")
            .get(user_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a disconnecting connection from every user id it was
    /// watching. Called from the gateway's unregister handler.
    pub fn del_client(&self, conn_id: &str) {
        let watched_ids = {
            let mut watching = self.watching.write().expect("subscription watching lock poisoned");
            watching.remove(conn_id).unwrap_or_default()
        };
        if watched_ids.is_empty() {
            return;
        }
        let mut watchers = self.watchers.write().expect("subscription watchers lock poisoned");
        for user_id in watched_ids {
            if let Some(set) = watchers.get_mut(&user_id) {
                set.remove(conn_id);
                if set.is_empty() {
                    watchers.remove(&user_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    struct FakeConn {
        id: String,
    }

    impl GatewayConnection for FakeConn {
        fn conn_id(&self) -> &str {
            &self.id
        }
        fn user_id(&self) -> &str {
            "watcher"
        }
        fn platform_id(&self) -> i32 {
            1
        }
        fn token(&self) -> &str {
            "tok"
        }
        fn ip(&self) -> &str {
            "127.0.0.1"
        }
        fn is_background(&self) -> bool {
            false
        }
        fn push_frame(&self, _frame: Vec<u8>) -> Result<(), CoreError> {
            Ok(())
        }
        fn close(&self) {}
    }

    fn conn(id: &str) -> Arc<dyn GatewayConnection> {
        Arc::new(FakeConn { id: id.to_owned() })
    }

    #[test]
    fn sub_and_unsub_round_trips_membership() {
        let sub = Subscription::new();
        let watcher = conn("w1");
        sub.sub(&watcher, &["u1".to_owned(), "u2".to_owned()], &[]);
        assert_eq!(sub.get("u1").len(), 1);
        assert_eq!(sub.get("u2").len(), 1);

        sub.sub(&watcher, &[], &["u1".to_owned()]);
        assert!(sub.get("u1").is_empty());
        assert_eq!(sub.get("u2").len(), 1);
    }

    #[test]
    fn duplicate_sub_and_unknown_unsub_are_ignored() {
        let sub = Subscription::new();
        let watcher = conn("w1");
        sub.sub(&watcher, &["u1".to_owned()], &[]);
        sub.sub(&watcher, &["u1".to_owned()], &[]);
        assert_eq!(sub.get("u1").len(), 1);

        sub.sub(&watcher, &[], &["does-not-exist".to_owned()]);
        assert_eq!(sub.get("u1").len(), 1);
    }

    #[test]
    fn del_client_clears_all_watched_users() {
        let sub = Subscription::new();
        let watcher = conn("w1");
        sub.sub(&watcher, &["u1".to_owned(), "u2".to_owned()], &[]);
        sub.del_client("w1");
        assert!(sub.get("u1").is_empty());
        assert!(sub.get("u2").is_empty());
    }
}
