use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use chitchat_core::ids::UserId;

use crate::provider::{IdentityClaims, IdentityError, IdentityProfile, IdentityProvider};

/// Identity provider with pre-programmed token → profile outcomes, for
/// deterministic testing without the real provider.
#[derive(Default)]
pub struct MockIdentity {
    profiles: Mutex<HashMap<String, IdentityProfile>>,
    outage: Mutex<Option<IdentityError>>,
    call_count: AtomicUsize,
}

impl MockIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token the mock will accept.
    pub fn accept(&self, token: &str, profile: IdentityProfile) {
        self.profiles.lock().insert(token.to_owned(), profile);
    }

    /// Make every subsequent call fail with the given error.
    pub fn fail_with(&self, error: IdentityError) {
        *self.outage.lock() = Some(error);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Convenience: a fully-populated profile.
    pub fn profile(uid: &str, display_name: &str, email: &str) -> IdentityProfile {
        IdentityProfile {
            uid: UserId::from_raw(uid),
            display_name: Some(display_name.to_owned()),
            email: Some(email.to_owned()),
            photo_url: None,
        }
    }

    fn resolve(&self, id_token: &str) -> Result<IdentityProfile, IdentityError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.outage.lock().clone() {
            return Err(err);
        }
        self.profiles
            .lock()
            .get(id_token)
            .cloned()
            .ok_or_else(|| IdentityError::InvalidToken("unknown token".into()))
    }
}

#[async_trait]
impl IdentityProvider for MockIdentity {
    async fn verify_token(&self, id_token: &str) -> Result<IdentityClaims, IdentityError> {
        self.resolve(id_token).map(|p| IdentityClaims { uid: p.uid })
    }

    async fn fetch_profile(&self, id_token: &str) -> Result<IdentityProfile, IdentityError> {
        self.resolve(id_token)
    }
}
