//! Session verification

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Resolves an opaque session token to the user it belongs to.
///
/// Token issuance and expiry belong to the authentication service in front of the core.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<String>;
}

/// In-memory tokens for local use and tests
#[derive(Default)]
pub struct StaticSessions {
    tokens: RwLock<HashMap<String, String>>,
}

impl StaticSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `user_id`
    pub fn issue(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.write().insert(token.clone(), user_id.to_string());
        debug!("Issued session token for {}", user_id);
        token
    }

    /// Forget a token, returning whether it was known
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }
}

#[async_trait]
impl SessionVerifier for StaticSessions {
    async fn verify(&self, token: &str) -> Option<String> {
        self.tokens.read().get(token).cloned()
    }
}
