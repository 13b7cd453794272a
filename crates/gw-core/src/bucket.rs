use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use crate::conn::GatewayConnection;
use crate::error::CoreError;
use crate::room::Room;

/// Per-user index of platform -> connections, kept alongside the bucket's
/// flat connection map so presence lookups ("which platforms is this user
/// online on") don't require scanning every connection in the bucket.
pub struct UserPlatforms {
    pub user_id: String,
    platforms: Mutex<HashMap<i32, Vec<Arc<dyn GatewayConnection>>>>,
    last_active_epoch_secs: AtomicI64,
}

impl UserPlatforms {
    fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            platforms: Mutex::new(HashMap::new()),
            last_active_epoch_secs: AtomicI64::new(now_epoch_secs()),
        }
    }

    pub fn last_active_epoch_secs(&self) -> i64 {
        self.last_active_epoch_secs.load(Ordering::SeqCst)
    }

    pub fn online_platform_ids(&self) -> Vec<i32> {
        let platforms = self.platforms.lock().expect("user platforms lock poisoned");
        platforms
            .iter()
            .filter(|(_, conns)| !conns.is_empty())
            .map(|(platform, _)| *platform)
            .collect()
    }

    pub fn platform_clients(&self, platform_id: i32) -> Vec<Arc<dyn GatewayConnection>> {
        self.platforms
            .lock()
            .expect("user platforms lock poisoned")
            .get(&platform_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_clients(&self) -> Vec<Arc<dyn GatewayConnection>> {
        self.platforms
            .lock()
            .expect("user platforms lock poisoned")
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.platforms
            .lock()
            .expect("user platforms lock poisoned")
            .values()
            .all(Vec::is_empty)
    }
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A request to fan a frame out to every member of a room, routed to one of
/// the bucket's fixed pool of broadcast workers.
pub struct BroadcastReq {
    pub room_id: String,
    pub frame: Vec<u8>,
}

/// One shard of the connection registry: owns a subset of connections (by
/// `hash(user_id) mod bucket_count`), their rooms, their per-user platform
/// index, a peer-IP connection counter, and a fixed pool of broadcast
/// workers that perform room fan-out off the registration hot path.
pub struct Bucket {
    pub id: usize,
    clients: RwLock<HashMap<String, Arc<dyn GatewayConnection>>>,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    user_platforms: RwLock<HashMap<String, Arc<UserPlatforms>>>,
    ip_count: Mutex<HashMap<String, usize>>,
    fanout: Vec<mpsc::Sender<BroadcastReq>>,
    rr_counter: AtomicU64,
}

impl Bucket {
    pub fn new(id: usize, worker_count: usize, queue_depth: usize) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        let mut senders = Vec::with_capacity(worker_count);
        let mut receivers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = mpsc::channel(queue_depth.max(1));
            senders.push(tx);
            receivers.push(rx);
        }

        let bucket = Arc::new(Self {
            id,
            clients: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            user_platforms: RwLock::new(HashMap::new()),
            ip_count: Mutex::new(HashMap::new()),
            fanout: senders,
            rr_counter: AtomicU64::new(0),
        });

        for mut rx in receivers {
            let bucket = bucket.clone();
            tokio::spawn(async move {
                while let Some(req) = rx.recv().await {
                    let room = bucket
                        .rooms
                        .read()
                        .expect("bucket rooms lock poisoned")
                        .get(&req.room_id)
                        .cloned();
                    if let Some(room) = room {
                        room.broadcast(&req.frame);
                    }
                }
            });
        }

        bucket
    }

    /// Register a connection. If a prior connection occupies the same
    /// connection-id slot (practically impossible since ids embed the
    /// remote address and a millisecond timestamp) it is treated as stale
    /// and closed.
    pub fn put_client(&self, conn: Arc<dyn GatewayConnection>) {
        let conn_id = conn.conn_id().to_owned();
        let user_id = conn.user_id().to_owned();
        let platform_id = conn.platform_id();
        let ip = conn.ip().to_owned();

        {
            let mut clients = self.clients.write().expect("bucket clients lock poisoned");
            if let Some(stale) = clients.insert(conn_id.clone(), conn.clone()) {
                if stale.conn_id() != conn_id {
                    stale.close();
                }
            }
        }

        {
            let mut by_user = self.user_platforms.write().expect("bucket user_platforms lock poisoned");
            let entry = by_user
                .entry(user_id.clone())
                .or_insert_with(|| Arc::new(UserPlatforms::new(user_id.clone())));
            entry
                .platforms
                .lock()
                .expect("user platforms lock poisoned")
                .entry(platform_id)
                .or_default()
                .push(conn.clone());
            entry.last_active_epoch_secs.store(now_epoch_secs(), Ordering::SeqCst);
        }

        *self.ip_count.lock().expect("bucket ip_count lock poisoned").entry(ip).or_insert(0) += 1;
    }

    /// Unregister a connection. Returns the room it was a member of, if
    /// any, and whether that room is now dropped (the caller -- typically
    /// the gateway's unregister handler -- is expected to forward this to
    /// subscription cleanup and logging, not to act on it further since
    /// `leave_room` already removed the dropped room from this bucket).
    pub fn del_client(&self, conn_id: &str, user_id: &str, platform_id: i32, room_id: Option<&str>) {
        {
            let mut clients = self.clients.write().expect("bucket clients lock poisoned");
            if clients.get(conn_id).map(|c| c.conn_id() == conn_id).unwrap_or(false) {
                clients.remove(conn_id);
            }
        }

        {
            let mut by_user = self.user_platforms.write().expect("bucket user_platforms lock poisoned");
            let mut drop_user = false;
            if let Some(entry) = by_user.get(user_id) {
                let mut platforms = entry.platforms.lock().expect("user platforms lock poisoned");
                if let Some(conns) = platforms.get_mut(&platform_id) {
                    conns.retain(|c| c.conn_id() != conn_id);
                    if conns.is_empty() {
                        platforms.remove(&platform_id);
                    }
                }
                drop_user = platforms.is_empty();
            }
            if drop_user {
                by_user.remove(user_id);
            }
        }

        if let Some(room_id) = room_id {
            self.leave_room(room_id, conn_id);
        }
    }

    /// Decrement the IP counter for a connection that is leaving. Split out
    /// from `del_client` because the ip string lives on the connection
    /// object, which the gateway may have already dropped its last strong
    /// reference to by the time bookkeeping runs; call this first.
    pub fn release_ip(&self, ip: &str) {
        let mut ip_count = self.ip_count.lock().expect("bucket ip_count lock poisoned");
        if let Some(count) = ip_count.get_mut(ip) {
            *count -= 1;
            if *count == 0 {
                ip_count.remove(ip);
            }
        }
    }

    pub fn ip_count(&self, ip: &str) -> usize {
        self.ip_count
            .lock()
            .expect("bucket ip_count lock poisoned")
            .get(ip)
            .copied()
            .unwrap_or(0)
    }

    pub fn get_client(&self, conn_id: &str) -> Option<Arc<dyn GatewayConnection>> {
        self.clients.read().expect("bucket clients lock poisoned").get(conn_id).cloned()
    }

    pub fn get_user_clients(&self, user_id: &str) -> Vec<Arc<dyn GatewayConnection>> {
        self.user_platforms
            .read()
            .expect("bucket user_platforms lock poisoned")
            .get(user_id)
            .map(|entry| entry.all_clients())
            .unwrap_or_default()
    }

    pub fn get_user_platform_clients(&self, user_id: &str, platform_id: i32) -> Vec<Arc<dyn GatewayConnection>> {
        self.user_platforms
            .read()
            .expect("bucket user_platforms lock poisoned")
            .get(user_id)
            .map(|entry| entry.platform_clients(platform_id))
            .unwrap_or_default()
    }

    pub fn user_platforms_entry(&self, user_id: &str) -> Option<Arc<UserPlatforms>> {
        self.user_platforms
            .read()
            .expect("bucket user_platforms lock poisoned")
            .get(user_id)
            .cloned()
    }

    pub fn all_user_ids(&self) -> Vec<String> {
        self.user_platforms
            .read()
            .expect("bucket user_platforms lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn join_room(&self, room_id: &str, room_type: i32, conn: Arc<dyn GatewayConnection>) -> Result<(), CoreError> {
        let room = {
            let mut rooms = self.rooms.write().expect("bucket rooms lock poisoned");
            rooms
                .entry(room_id.to_owned())
                .or_insert_with(|| Arc::new(Room::new(room_id, room_type)))
                .clone()
        };
        room.add(conn)
    }

    pub fn leave_room(&self, room_id: &str, conn_id: &str) {
        let room = self.rooms.read().expect("bucket rooms lock poisoned").get(room_id).cloned();
        if let Some(room) = room {
            if room.remove(conn_id) {
                self.rooms.write().expect("bucket rooms lock poisoned").remove(room_id);
            }
        }
    }

    pub fn get_room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().expect("bucket rooms lock poisoned").get(room_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().expect("bucket rooms lock poisoned").len()
    }

    /// Non-blocking room broadcast: round-robins across the bucket's fixed
    /// worker pool and drops the request (logging it) if that worker's
    /// queue is full, rather than blocking the caller or retrying.
    pub fn broadcast_room(&self, room_id: &str, frame: Vec<u8>) {
        let worker = (self.rr_counter.fetch_add(1, Ordering::Relaxed) as usize) % self.fanout.len();
        if self.fanout[worker]
            .try_send(BroadcastReq {
                room_id: room_id.to_owned(),
                frame,
            })
            .is_err()
        {
            tracing::warn!(bucket = self.id, room_id, "room broadcast dropped: worker queue full");
        }
    }

    /// Global, bucket-local broadcast (non-blocking; skips full queues).
    pub fn broadcast_all(&self, frame: &[u8]) {
        let clients = self.clients.read().expect("bucket clients lock poisoned");
        for conn in clients.values() {
            let _ = conn.push_frame(frame.to_vec());
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().expect("bucket clients lock poisoned").len()
    }
}

/// Routes a user id to a fixed bucket via `crc32(user_id) mod bucket_count`,
/// and exposes enumeration of every bucket for global operations (presence
/// scans, kick-all, etc).
pub struct BucketManager {
    buckets: Vec<Arc<Bucket>>,
}

impl BucketManager {
    pub fn new(bucket_count: usize, worker_count: usize, queue_depth: usize) -> Self {
        let buckets = (0..bucket_count.max(1))
            .map(|id| Bucket::new(id, worker_count, queue_depth))
            .collect();
        Self { buckets }
    }

    pub fn bucket_for(&self, user_id: &str) -> &Arc<Bucket> {
        let idx = (crc32fast::hash(user_id.as_bytes()) as usize) % self.buckets.len();
        &self.buckets[idx]
    }

    pub fn all_buckets(&self) -> &[Arc<Bucket>] {
        &self.buckets
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct FakeConn {
        id: String,
        user_id: String,
        platform_id: i32,
        ip: String,
        closed: AtomicBool,
    }

    impl FakeConn {
        fn new(id: &str, user_id: &str, platform_id: i32, ip: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_owned(),
                user_id: user_id.to_owned(),
                platform_id,
                ip: ip.to_owned(),
                closed: AtomicBool::new(false),
            })
        }
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
            &self.ip
        }
        fn is_background(&self) -> bool {
            false
        }
        fn push_frame(&self, _frame: Vec<u8>) -> Result<(), CoreError> {
            Ok(())
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn put_and_del_client_maintains_user_platform_index() {
        let bucket = Bucket::new(0, 2, 8);
        let conn = FakeConn::new("c1", "u1", 2, "10.0.0.1");
        bucket.put_client(conn.clone());

        assert_eq!(bucket.client_count(), 1);
        assert_eq!(bucket.ip_count("10.0.0.1"), 1);
        let entry = bucket.user_platforms_entry("u1").unwrap();
        assert_eq!(entry.online_platform_ids(), vec![2]);

        bucket.release_ip("10.0.0.1");
        bucket.del_client("c1", "u1", 2, None);
        assert_eq!(bucket.client_count(), 0);
        assert_eq!(bucket.ip_count("10.0.0.1"), 0);
        assert!(bucket.user_platforms_entry("u1").is_none());
    }

    #[tokio::test]
    async fn join_leave_room_removes_dropped_room_from_bucket() {
        let bucket = Bucket::new(0, 2, 8);
        let conn = FakeConn::new("c1", "u1", 1, "10.0.0.1");
        bucket.join_room("room-1", 0, conn.clone()).unwrap();
        assert_eq!(bucket.room_count(), 1);

        bucket.leave_room("room-1", "c1");
        assert_eq!(bucket.room_count(), 0);
    }

    #[tokio::test]
    async fn bucket_manager_routes_consistently_for_same_user() {
        let manager = BucketManager::new(8, 1, 4);
        let b1 = manager.bucket_for("user-42").id;
        let b2 = manager.bucket_for("user-42").id;
        assert_eq!(b1, b2);
    }

    #[tokio::test]
    async fn broadcast_room_delivers_via_fanout_worker() {
        let bucket = Bucket::new(0, 1, 4);
        let conn = FakeConn::new("c1", "u1", 1, "10.0.0.1");
        bucket.join_room("room-1", 0, conn.clone()).unwrap();
        bucket.broadcast_room("room-1", b"hi".to_vec());
        // Give the spawned worker a chance to process the request.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
