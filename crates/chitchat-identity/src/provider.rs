use async_trait::async_trait;

use chitchat_core::errors::ApiError;
use chitchat_core::ids::UserId;

/// Verified claims extracted from a bearer credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityClaims {
    pub uid: UserId,
}

/// The provider's user record, as needed for the login upsert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityProfile {
    pub uid: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

/// Errors from the identity provider boundary.
#[derive(Clone, Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid or expired token: {0}")]
    InvalidToken(String),
    #[error("provider error {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidToken(_) => {
                ApiError::Unauthenticated("invalid or expired token".into())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// External identity provider boundary. Verifies bearer credentials and
/// exposes the provider's user record for the login upsert.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a bearer token and return the subject it identifies.
    async fn verify_token(&self, id_token: &str) -> Result<IdentityClaims, IdentityError>;

    /// Verify a bearer token and return the full provider profile.
    async fn fetch_profile(&self, id_token: &str) -> Result<IdentityProfile, IdentityError>;
}
