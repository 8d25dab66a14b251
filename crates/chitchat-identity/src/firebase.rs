use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use chitchat_core::ids::UserId;

use crate::provider::{IdentityClaims, IdentityError, IdentityProfile, IdentityProvider};

const LOOKUP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:lookup";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity provider backed by the Firebase Identity Toolkit REST API.
///
/// One `accounts:lookup` call both verifies the ID token and returns the
/// subject's user record, so `verify_token` and `fetch_profile` share a
/// single request path.
pub struct FirebaseIdentity {
    client: Client,
    api_key: SecretString,
}

impl FirebaseIdentity {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            api_key,
        }
    }

    async fn lookup(&self, id_token: &str) -> Result<IdentityProfile, IdentityError> {
        let url = format!("{LOOKUP_URL}?key={}", self.api_key.expose_secret());
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "idToken": id_token }))
            .send()
            .await
            .map_err(|e| IdentityError::NetworkError(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| IdentityError::NetworkError(e.to_string()))?;

        parse_lookup_response(status, &body)
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn verify_token(&self, id_token: &str) -> Result<IdentityClaims, IdentityError> {
        let profile = self.lookup(id_token).await?;
        Ok(IdentityClaims { uid: profile.uid })
    }

    async fn fetch_profile(&self, id_token: &str) -> Result<IdentityProfile, IdentityError> {
        self.lookup(id_token).await
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
struct LookupUser {
    #[serde(rename = "localId")]
    local_id: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    email: Option<String>,
    #[serde(rename = "photoUrl")]
    photo_url: Option<String>,
}

/// Classify an `accounts:lookup` response.
///
/// The toolkit reports token problems as 400 with an error message such as
/// INVALID_ID_TOKEN or TOKEN_EXPIRED; anything else is a provider failure.
fn parse_lookup_response(status: u16, body: &str) -> Result<IdentityProfile, IdentityError> {
    if status == 200 {
        let parsed: LookupResponse = serde_json::from_str(body)
            .map_err(|e| IdentityError::Provider {
                status,
                body: format!("malformed lookup response: {e}"),
            })?;
        let user = parsed.users.into_iter().next().ok_or_else(|| {
            IdentityError::InvalidToken("token resolved to no user".into())
        })?;
        return Ok(IdentityProfile {
            uid: UserId::from_raw(user.local_id),
            display_name: user.display_name,
            email: user.email,
            photo_url: user.photo_url,
        });
    }

    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.to_owned());

    match status {
        400 | 401 | 403 => Err(IdentityError::InvalidToken(message)),
        _ => Err(IdentityError::Provider {
            status,
            body: message,
        }),
    }
}
