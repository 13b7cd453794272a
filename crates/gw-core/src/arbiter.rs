use std::sync::Arc;

use crate::conn::GatewayConnection;

/// Multi-terminal login policy: a same-token login on the same
/// (user, platform) is a reconnect and every existing session survives.
/// A different-token login evicts every existing session on that platform
/// whose token doesn't match the incoming one.
pub fn clients_to_kick(existing: &[Arc<dyn GatewayConnection>], incoming_token: &str) -> Vec<Arc<dyn GatewayConnection>> {
    existing
        .iter()
        .filter(|c| c.token() != incoming_token)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    struct FakeConn {
        token: String,
    }

    impl GatewayConnection for FakeConn {
        fn conn_id(&self) -> &str {
            "c"
        }
        fn user_id(&self) -> &str {
            "u"
        }
        fn platform_id(&self) -> i32 {
            1
        }
        fn token(&self) -> &str {
            &self.token
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

    fn conn(token: &str) -> Arc<dyn GatewayConnection> {
        Arc::new(FakeConn { token: token.to_owned() })
    }

    #[test]
    fn same_token_reconnect_kicks_nobody() {
        let existing = vec![conn("t1")];
        assert!(clients_to_kick(&existing, "t1").is_empty());
    }

    #[test]
    fn different_token_kicks_only_mismatched_sessions() {
        let existing = vec![conn("t1"), conn("t2")];
        let kicked = clients_to_kick(&existing, "t2");
        assert_eq!(kicked.len(), 1);
        assert_eq!(kicked[0].token(), "t1");
    }
}
