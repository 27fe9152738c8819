use std::collections::HashMap;

use async_trait::async_trait;
use ilp_btp::BtpServerAuth;
use parking_lot::RwLock;

/// Resolves an inbound BTP auth token to the peer id it authenticates as.
///
/// Tokens registered for a known peer (via `register`) always authenticate
/// as that peer, independent of the permissionless flag. In permissionless
/// mode, an otherwise-unrecognized token (including an empty one) still
/// authenticates, as the peer id it carries itself — so unconfigured callers
/// can connect without a prior `register_peer`.
pub struct ConnectorAuth {
    permissionless: bool,
    tokens: RwLock<HashMap<String, String>>,
}

impl ConnectorAuth {
    pub fn new(permissionless: bool) -> Self {
        ConnectorAuth {
            permissionless,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, token: impl Into<String>, peer_id: impl Into<String>) {
        self.tokens.write().insert(token.into(), peer_id.into());
    }

    pub fn revoke_peer(&self, peer_id: &str) {
        self.tokens.write().retain(|_, id| id != peer_id);
    }
}

#[async_trait]
impl BtpServerAuth for ConnectorAuth {
    async fn authenticate(&self, token: &str) -> Option<String> {
        if let Some(peer_id) = self.tokens.read().get(token).cloned() {
            return Some(peer_id);
        }
        if self.permissionless {
            return Some(if token.is_empty() {
                "anonymous".to_string()
            } else {
                token.to_string()
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_token_authenticates_as_its_peer() {
        let auth = ConnectorAuth::new(false);
        auth.register("secret", "alice");
        assert_eq!(auth.authenticate("secret").await, Some("alice".to_string()));
    }

    #[tokio::test]
    async fn unknown_token_is_rejected_when_not_permissionless() {
        let auth = ConnectorAuth::new(false);
        assert_eq!(auth.authenticate("anything").await, None);
    }

    #[tokio::test]
    async fn permissionless_mode_accepts_any_token() {
        let auth = ConnectorAuth::new(true);
        assert_eq!(auth.authenticate("").await, Some("anonymous".to_string()));
        assert_eq!(auth.authenticate("bob").await, Some("bob".to_string()));
    }

    #[tokio::test]
    async fn revoke_peer_removes_its_registered_tokens() {
        let auth = ConnectorAuth::new(false);
        auth.register("secret", "alice");
        auth.revoke_peer("alice");
        assert_eq!(auth.authenticate("secret").await, None);
    }
}
