/// The seam between the transport-agnostic registry logic in this crate
/// (buckets, rooms, subscriptions, presence) and the actual per-socket I/O
/// loops, which live alongside the axum WebSocket handler that owns them.
///
/// Room membership is a `HashMap` keyed by connection id holding
/// `Arc<dyn GatewayConnection>` rather than an intrusive linked list: it
/// gets the same O(1)-removal-by-key property without manual prev/next
/// pointers, at the cost of a fixed iteration order broadcasts never
/// actually depend on.
pub trait GatewayConnection: Send + Sync {
    fn conn_id(&self) -> &str;
    fn user_id(&self) -> &str;
    fn platform_id(&self) -> i32;
    fn token(&self) -> &str;
    fn ip(&self) -> &str;
    fn is_background(&self) -> bool;

    /// Non-blocking enqueue onto this connection's outbound writer. Returns
    /// `Err` if the queue is full or the connection already closed; the
    /// frame is dropped in either case, never retried by the caller.
    fn push_frame(&self, frame: Vec<u8>) -> Result<(), crate::error::CoreError>;

    /// Begin an asynchronous close; idempotent.
    fn close(&self);

    /// Server-initiated eviction: notify the peer (if the transport can
    /// synthesize a response frame in the session's own encoding) then
    /// close. The default just closes; transports able to speak the wire
    /// protocol back to this specific connection should override it to
    /// send a `KICK_ONLINE_MSG` response first.
    fn kick(&self, _reason: &str) {
        self.close();
    }

    /// Push a server-originated payload tagged with `req_identifier`,
    /// encoded in this connection's own wire encoding (e.g. a presence
    /// `SubUserOnlineStatusTips` push). Returns `Err` on the same conditions
    /// as `push_frame` (full outbound queue, already-closed connection), so
    /// callers like the operator push RPC can surface a per-recipient push
    /// failure instead of reporting success unconditionally. The default is
    /// a no-op `Ok` since core-only test fakes have no wire encoding to
    /// speak; the real transport implementation overrides it.
    fn push_typed(&self, _req_identifier: i32, _data: Vec<u8>) -> Result<(), crate::error::CoreError> {
        Ok(())
    }
}
