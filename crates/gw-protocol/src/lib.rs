// gw-protocol: Wire types for the long-connection IM gateway.
//
// The data-plane frame envelope (`RequestEnvelope` / `ResponseEnvelope`) is
// shared by both supported encodings (structured-binary via `gw-codec`'s
// bincode path, and JSON). The small control channel used for
// application-level keepalive when the transport's own ping/pong frames are
// unavailable uses a `type`-tagged union, the same shape the reference
// gateway's WebSocket helper types use elsewhere in this workspace.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request identifiers (client <-> server)
// ---------------------------------------------------------------------------

/// Frozen v1 request identifiers. Unknown values are rejected by the session
/// with a non-zero `err_code` in the reply; the session itself stays open.
pub mod req_id {
    pub const GET_NEWEST_SEQ: i32 = 1001;
    pub const PULL_MSG_BY_SEQ_LIST: i32 = 1002;
    pub const SEND_MSG: i32 = 1003;
    pub const SEND_SIGNAL_MSG: i32 = 1004;
    pub const PULL_MSG: i32 = 1005;
    pub const GET_CONV_MAX_READ_SEQ: i32 = 1006;
    pub const PULL_CONV_LAST_MESSAGE: i32 = 1007;
    /// Server -> client only.
    pub const PUSH_MSG: i32 = 2001;
    /// Server -> client only.
    pub const KICK_ONLINE_MSG: i32 = 2002;
    pub const LOGOUT_MSG: i32 = 2003;
    pub const SET_BACKGROUND_STATUS: i32 = 2004;
    pub const SUB_USER_ONLINE_STATUS: i32 = 2005;
    /// Server -> client only; malformed-data reply.
    pub const DATA_ERROR: i32 = 3001;
}

// ---------------------------------------------------------------------------
// Data-plane frame envelope
// ---------------------------------------------------------------------------

/// A client -> server request frame.
///
/// `send_id` must equal the session's authenticated user id; a mismatch is
/// rejected without closing the session (see `req_id::DATA_ERROR`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub req_identifier: i32,
    pub token: String,
    pub send_id: String,
    #[serde(default)]
    pub operation_id: String,
    /// Client-assigned correlation id, echoed back in the response.
    pub msg_incr: u64,
    /// Opaque payload bytes. Both supported wire encodings carry this as a
    /// length-prefixed byte string rather than a self-describing value, so
    /// it round-trips through bincode as well as JSON; callers that need
    /// structure serialize/deserialize their own type into/out of it (e.g.
    /// `serde_json::to_vec`/`from_slice`).
    #[serde(default)]
    pub data: Vec<u8>,
}

/// A server -> client response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub req_identifier: i32,
    pub msg_incr: u64,
    #[serde(default)]
    pub operation_id: String,
    pub err_code: i32,
    #[serde(default)]
    pub err_msg: String,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl ResponseEnvelope {
    pub fn ok(req_identifier: i32, msg_incr: u64, operation_id: &str, data: Vec<u8>) -> Self {
        Self {
            req_identifier,
            msg_incr,
            operation_id: operation_id.to_owned(),
            err_code: 0,
            err_msg: String::new(),
            data,
        }
    }

    pub fn error(req_identifier: i32, msg_incr: u64, operation_id: &str, err_code: i32, err_msg: impl Into<String>) -> Self {
        Self {
            req_identifier,
            msg_incr,
            operation_id: operation_id.to_owned(),
            err_code,
            err_msg: err_msg.into(),
            data: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Control channel (application-level keepalive over text frames)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ControlMessage {
    Ping,
    Pong,
}

// ---------------------------------------------------------------------------
// Presence subscription (req_id::SUB_USER_ONLINE_STATUS)
// ---------------------------------------------------------------------------

/// Request body carried in a `SUB_USER_ONLINE_STATUS` request's `data` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUserOnlineStatus {
    #[serde(default)]
    pub sub_user_id: Vec<String>,
    #[serde(default)]
    pub unsub_user_id: Vec<String>,
}

/// Pushed to every watcher when a watched user's online platform set changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUserOnlineStatusTips {
    pub subscribers: Vec<SubUserOnlineStatusElem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUserOnlineStatusElem {
    pub user_id: String,
    pub online_platform_ids: Vec<i32>,
}

// ---------------------------------------------------------------------------
// Server-side push / management operations (back-end -> gateway)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDetail {
    pub platform_id: i32,
    pub conn_id: String,
    pub token: String,
    pub is_background: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOnlineStatusResult {
    pub user_id: String,
    /// 1 = online (at least one connection), 0 = offline.
    pub status: i32,
    pub platform_details: Vec<PlatformDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GetUsersOnlineStatusResp {
    pub successful_result: Vec<UserOnlineStatusResult>,
}

/// Per-platform push outcome. `500` = push error, `501` = suppressed because
/// the recipient platform is backgrounded on a push-terminal (iOS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleMsgToUserPlatform {
    pub recv_platform_id: i32,
    pub result_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleMsgToUserResults {
    pub user_id: String,
    pub online_push: bool,
    pub results: Vec<SingleMsgToUserPlatform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OnlineBatchPushOneMsgResp {
    pub results: Vec<SingleMsgToUserResults>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KickUserOfflineResp {
    pub kicked_conn_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MultiTerminalLoginCheckResp {
    pub kicked_conn_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Error codes & HTTP envelope
// ---------------------------------------------------------------------------

pub mod error_codes {
    pub const INVALID_ARGS: &str = "INVALID_ARGS";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const IDENTITY_MISMATCH: &str = "IDENTITY_MISMATCH";
    pub const TOO_MANY_CONNECTIONS: &str = "TOO_MANY_CONNECTIONS";
    pub const UNSUPPORTED_MESSAGE: &str = "UNSUPPORTED_MESSAGE";
    pub const SEND_QUEUE_FULL: &str = "SEND_QUEUE_FULL";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Frozen HTTP error envelope used by the operator HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_envelope_ok_has_zero_err_code() {
        let resp = ResponseEnvelope::ok(req_id::SEND_MSG, 7, "op-1", serde_json::to_vec(&serde_json::json!({"seq": 5})).unwrap());
        assert_eq!(resp.err_code, 0);
        assert_eq!(resp.msg_incr, 7);
        assert!(resp.err_msg.is_empty());
    }

    #[test]
    fn request_envelope_roundtrips_through_json() {
        let req = RequestEnvelope {
            req_identifier: req_id::SEND_MSG,
            token: "tok".into(),
            send_id: "u1".into(),
            operation_id: "op-1".into(),
            msg_incr: 1,
            data: serde_json::to_vec(&serde_json::json!({"text": "hi"})).unwrap(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: RequestEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn request_envelope_roundtrips_through_bincode() {
        let req = RequestEnvelope {
            req_identifier: req_id::SEND_MSG,
            token: "tok".into(),
            send_id: "u1".into(),
            operation_id: "op-1".into(),
            msg_incr: 1,
            data: serde_json::to_vec(&serde_json::json!({"text": "hi"})).unwrap(),
        };
        let bytes = bincode::serialize(&req).unwrap();
        let back: RequestEnvelope = bincode::deserialize(&bytes).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn control_message_serializes_with_type_tag() {
        let ping = serde_json::to_string(&ControlMessage::Ping).unwrap();
        assert_eq!(ping, r#"{"type":"ping"}"#);
        let parsed: ControlMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(parsed, ControlMessage::Pong);
    }
}
