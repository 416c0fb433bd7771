use crate::error::AppError;
use anyhow::anyhow;
use axum_extra::extract::cookie::CookieJar;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_hc::Hc128Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use tracing::debug;

pub const SESSION_COOKIE: &str = "SESSION-COOKIE";
const SESSION_TTL_MINUTES: i64 = 8 * 60;
const TOKEN_BYTES: usize = 32;
/// Unpadded base64url length of [`TOKEN_BYTES`] random bytes.
const TOKEN_CHARS: usize = 43;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SessionInfo {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// SHA-1 fingerprint of a session token. Only fingerprints are stored
/// server-side; the raw token lives in the client's cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenId(String);

impl TryFrom<&str> for TokenId {
    type Error = AppError;

    fn try_from(raw: &str) -> Result<Self, AppError> {
        let well_formed = raw.len() == TOKEN_CHARS
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !well_formed {
            return Err(AppError::Unauthenticated);
        }
        Ok(Self(fingerprint(raw)))
    }
}

fn fingerprint(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha1::digest(raw.as_bytes()))
}

fn session_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE}={token}; SameSite=Strict; Secure; HttpOnly; Path=/; Max-Age={}",
        SESSION_TTL_MINUTES * 60
    )
}

#[derive(Debug)]
struct Session {
    user_id: String,
    expires_at: DateTime<Utc>,
}

/// What the identity provider answers for valid credentials.
#[derive(Debug, Deserialize)]
struct VerifiedIdentity {
    user_id: String,
}

/// Session management. Credentials are never checked here — they go to the
/// external identity provider, which owns the user ids. This app only keeps
/// the opaque session tokens it hands out afterwards.
pub struct AuthApp {
    sessions: HashMap<TokenId, Session>,
    client: reqwest::Client,
    idp_url: String,
}

impl AuthApp {
    pub fn new(idp_url: String) -> Self {
        Self {
            sessions: HashMap::new(),
            client: reqwest::Client::new(),
            idp_url,
        }
    }

    /// Verify credentials with the identity provider, then open a session.
    /// Returns the `Set-Cookie` value and the session summary.
    pub async fn authenticate_user(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(String, SessionInfo), AppError> {
        let identity = self.verify_with_provider(username, password).await?;
        debug!("Identity provider accepted {username}");
        Ok(self.open_session(identity.user_id))
    }

    async fn verify_with_provider(
        &self,
        username: &str,
        password: &str,
    ) -> Result<VerifiedIdentity, AppError> {
        let response = self
            .client
            .post(&self.idp_url)
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| AppError::Persistence(anyhow!("identity provider unreachable: {e}")))?;

        if !response.status().is_success() {
            debug!("Identity provider rejected credentials for {username}");
            return Err(AppError::Unauthenticated);
        }

        response
            .json::<VerifiedIdentity>()
            .await
            .map_err(|e| AppError::Persistence(anyhow!("malformed identity response: {e}")))
    }

    /// Open a session for an already-verified user id.
    pub fn open_session(&mut self, user_id: String) -> (String, SessionInfo) {
        let mut bytes = [0u8; TOKEN_BYTES];
        Hc128Rng::from_entropy().fill(&mut bytes[..]);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let expires_at = Utc::now() + Duration::minutes(SESSION_TTL_MINUTES);
        self.sessions.insert(
            TokenId(fingerprint(&token)),
            Session {
                user_id: user_id.clone(),
                expires_at,
            },
        );

        (
            session_cookie(&token),
            SessionInfo {
                user_id,
                expires_at,
            },
        )
    }

    /// The request-scoped identity input: the current session, or
    /// `Unauthenticated`.
    pub fn assert_login(&self, cookies: &CookieJar) -> Result<SessionInfo, AppError> {
        let cookie = cookies
            .get(SESSION_COOKIE)
            .ok_or(AppError::Unauthenticated)?;
        let token_id = TokenId::try_from(cookie.value())?;
        let session = self
            .sessions
            .get(&token_id)
            .ok_or(AppError::Unauthenticated)?;
        if session.expires_at < Utc::now() {
            return Err(AppError::Unauthenticated);
        }
        Ok(SessionInfo {
            user_id: session.user_id.clone(),
            expires_at: session.expires_at,
        })
    }

    /// Slide the session's expiry and re-issue the cookie.
    pub fn refresh(&mut self, cookies: &CookieJar) -> Result<String, AppError> {
        let cookie = cookies
            .get(SESSION_COOKIE)
            .ok_or(AppError::Unauthenticated)?;
        let raw = cookie.value().to_string();
        let token_id = TokenId::try_from(raw.as_str())?;
        let session = self
            .sessions
            .get_mut(&token_id)
            .ok_or(AppError::Unauthenticated)?;
        if session.expires_at < Utc::now() {
            return Err(AppError::Unauthenticated);
        }
        session.expires_at = Utc::now() + Duration::minutes(SESSION_TTL_MINUTES);
        Ok(session_cookie(&raw))
    }

    pub fn logout(&mut self, cookies: &CookieJar) -> Result<(), AppError> {
        let cookie = cookies
            .get(SESSION_COOKIE)
            .ok_or(AppError::Unauthenticated)?;
        let token_id = TokenId::try_from(cookie.value())?;
        self.sessions
            .remove(&token_id)
            .map(|_| ())
            .ok_or(AppError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_extra::extract::cookie::Cookie;

    fn jar_from(set_cookie: &str) -> CookieJar {
        CookieJar::new().add(Cookie::parse(set_cookie.to_string()).unwrap())
    }

    #[test]
    fn session_roundtrip() {
        let mut auth = AuthApp::new("http://localhost:0/verify".into());
        let (cookie, info) = auth.open_session("user-a".into());
        assert_eq!(info.user_id, "user-a");

        let jar = jar_from(&cookie);
        let session = auth.assert_login(&jar).unwrap();
        assert_eq!(session.user_id, "user-a");
    }

    #[test]
    fn anonymous_and_garbage_tokens_are_rejected() {
        let mut auth = AuthApp::new("http://localhost:0/verify".into());
        auth.open_session("user-a".into());

        assert!(matches!(
            auth.assert_login(&CookieJar::new()).unwrap_err(),
            AppError::Unauthenticated
        ));

        let forged = jar_from(&format!("{SESSION_COOKIE}=not-a-real-token; Path=/"));
        assert!(matches!(
            auth.assert_login(&forged).unwrap_err(),
            AppError::Unauthenticated
        ));

        // Right shape, wrong bytes.
        let fake = jar_from(&session_cookie(&"A".repeat(TOKEN_CHARS)));
        assert!(matches!(
            auth.assert_login(&fake).unwrap_err(),
            AppError::Unauthenticated
        ));
    }

    #[test]
    fn logout_invalidates_the_session() {
        let mut auth = AuthApp::new("http://localhost:0/verify".into());
        let (cookie, _) = auth.open_session("user-a".into());
        let jar = jar_from(&cookie);

        auth.logout(&jar).unwrap();
        assert!(auth.assert_login(&jar).is_err());
        // A second logout has nothing to remove.
        assert!(auth.logout(&jar).is_err());
    }

    #[test]
    fn refresh_keeps_the_same_token() {
        let mut auth = AuthApp::new("http://localhost:0/verify".into());
        let (cookie, _) = auth.open_session("user-a".into());
        let jar = jar_from(&cookie);

        let reissued = auth.refresh(&jar).unwrap();
        assert_eq!(reissued, cookie);
        assert!(auth.assert_login(&jar_from(&reissued)).is_ok());
    }
}
