use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use crate::conn::GatewayConnection;
use crate::error::CoreError;

/// A group/chat membership whose broadcasts fan out to every connected
/// member. Once the last member leaves, the room is marked dropped and
/// refuses further joins (the owning bucket removes dropped rooms from its
/// room map in the same call that empties them).
pub struct Room {
    pub id: String,
    pub room_type: i32,
    members: RwLock<HashMap<String, Arc<dyn GatewayConnection>>>,
    online: AtomicI32,
    drop: std::sync::atomic::AtomicBool,
    metadata: RwLock<HashMap<String, serde_json::Value>>,
}

impl Room {
    pub fn new(id: impl Into<String>, room_type: i32) -> Self {
        Self {
            id: id.into(),
            room_type,
            members: RwLock::new(HashMap::new()),
            online: AtomicI32::new(0),
            drop: std::sync::atomic::AtomicBool::new(false),
            metadata: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.drop.load(Ordering::SeqCst)
    }

    pub fn online_count(&self) -> i32 {
        self.online.load(Ordering::SeqCst)
    }

    pub fn add(&self, conn: Arc<dyn GatewayConnection>) -> Result<(), CoreError> {
        let mut members = self.members.write().expect("room members lock poisoned");
        if self.is_dropped() {
            return Err(CoreError::RoomDropped);
        }
        members.insert(conn.conn_id().to_owned(), conn);
        self.online.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Remove a member by connection id. Returns `true` if the room is now
    /// empty and has transitioned to dropped (the caller must remove it
    /// from the owning bucket's room map).
    pub fn remove(&self, conn_id: &str) -> bool {
        let mut members = self.members.write().expect("room members lock poisoned");
        if members.remove(conn_id).is_none() {
            return self.is_dropped();
        }
        let remaining = self.online.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining <= 0 {
            self.drop.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.online_count() <= 0
    }

    pub fn get_clients(&self) -> Vec<Arc<dyn GatewayConnection>> {
        self.members
            .read()
            .expect("room members lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Non-blocking broadcast to every member; members whose send queue is
    /// full are silently skipped, a dropped broadcast is never retried.
    pub fn broadcast(&self, frame: &[u8]) {
        self.broadcast_filter(frame, |_| true);
    }

    pub fn broadcast_filter(&self, frame: &[u8], predicate: impl Fn(&dyn GatewayConnection) -> bool) {
        let members = self.members.read().expect("room members lock poisoned");
        for conn in members.values() {
            if predicate(conn.as_ref()) {
                let _ = conn.push_frame(frame.to_vec());
            }
        }
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata
            .write()
            .expect("room metadata lock poisoned")
            .insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.metadata
            .read()
            .expect("room metadata lock poisoned")
            .get(key)
            .cloned()
    }

    /// Mark the room dropped and close every current member.
    pub fn close(&self) {
        self.drop.store(true, Ordering::SeqCst);
        let members = self.members.read().expect("room members lock poisoned");
        for conn in members.values() {
            conn.close();
        }
    }
}
