use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;
use ulid::Ulid;

use crate::app::error::FeedError;
use crate::domain::session::Session;

const ISSUER: &str = "chirp";

/// Source of the signed-in user for a request.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_session(&self, token: &str) -> Result<Option<Session>>;

    /// Ends the session behind `token`. Returns `false` for tokens that were
    /// not valid to begin with.
    async fn sign_out(&self, token: &str) -> Result<bool>;
}

/// Maps a missing session to [`FeedError::Unauthenticated`].
pub fn require_session(session: Option<Session>) -> Result<Session, FeedError> {
    session.ok_or(FeedError::Unauthenticated)
}

/// Revoked token ids with the expiry of their token.
type Revocations = HashMap<String, OffsetDateTime>;

/// Sessions carried in PASETO v4.local tokens.
///
/// Revocations are kept only until the token would have expired anyway.
#[derive(Clone)]
pub struct TokenIdentity {
    key: [u8; 32],
    ttl_hours: u64,
    revoked: Arc<RwLock<Revocations>>,
}

impl TokenIdentity {
    pub fn new(key: [u8; 32], ttl_hours: u64) -> Self {
        Self {
            key,
            ttl_hours,
            revoked: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn issue(&self, session: &Session) -> Result<String> {
        let duration = std::time::Duration::from_secs(self.ttl_hours * 60 * 60);
        let mut claims = Claims::new_expires_in(&duration)?;
        claims.issuer(ISSUER)?;
        claims.audience(ISSUER)?;
        claims.subject(&session.user_id)?;
        claims.token_identifier(&Ulid::new().to_string())?;
        claims.add_additional("name", session.name.as_str())?;
        claims.add_additional("tag", session.handle.as_str())?;
        if let Some(image) = &session.avatar_url {
            claims.add_additional("image", image.as_str())?;
        }

        let key = SymmetricKey::<V4>::from(&self.key)?;
        Ok(local::encrypt(&key, &claims, None, None)?)
    }

    fn decrypt_claims(&self, token: &str) -> Result<Option<Claims>> {
        let key = SymmetricKey::<V4>::from(&self.key)?;
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with(ISSUER);
        rules.validate_audience_with(ISSUER);

        let untrusted = match UntrustedToken::<Local, V4>::try_from(token) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        let trusted = match local::decrypt(&key, &untrusted, &rules, None, None) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        Ok(trusted.payload_claims().cloned())
    }
}

/// Expired tokens fail validation on their own, so their ids can go.
fn forget_expired(revoked: &mut Revocations, now: OffsetDateTime) {
    revoked.retain(|_, expires_at| *expires_at > now);
}

fn claim_str<'a>(claims: &'a Claims, name: &str) -> Option<&'a str> {
    claims.get_claim(name).and_then(|value| value.as_str())
}

fn session_from_claims(claims: &Claims) -> Result<Session> {
    let user_id = claim_str(claims, "sub").ok_or_else(|| anyhow!("missing sub claim"))?;
    let name = claim_str(claims, "name").ok_or_else(|| anyhow!("missing name claim"))?;
    let handle = claim_str(claims, "tag").ok_or_else(|| anyhow!("missing tag claim"))?;
    let session = Session::new(user_id, name, handle);
    Ok(match claim_str(claims, "image") {
        Some(image) => session.with_avatar(image),
        None => session,
    })
}

#[async_trait]
impl IdentityProvider for TokenIdentity {
    async fn current_session(&self, token: &str) -> Result<Option<Session>> {
        let claims = match self.decrypt_claims(token)? {
            Some(claims) => claims,
            None => return Ok(None),
        };
        if let Some(jti) = claim_str(&claims, "jti") {
            if self.revoked.read().await.contains_key(jti) {
                return Ok(None);
            }
        }
        session_from_claims(&claims).map(Some)
    }

    async fn sign_out(&self, token: &str) -> Result<bool> {
        let claims = match self.decrypt_claims(token)? {
            Some(claims) => claims,
            None => return Ok(false),
        };
        let jti = claim_str(&claims, "jti").ok_or_else(|| anyhow!("missing jti claim"))?;
        let expires_at = claim_str(&claims, "exp").ok_or_else(|| anyhow!("missing exp claim"))?;
        let expires_at = OffsetDateTime::parse(expires_at, &Rfc3339)?;

        let mut revoked = self.revoked.write().await;
        forget_expired(&mut revoked, OffsetDateTime::now_utc());
        let newly_revoked = revoked.insert(jti.to_string(), expires_at).is_none();
        if newly_revoked {
            debug!(user_id = ?claim_str(&claims, "sub"), "session signed out");
        }
        Ok(newly_revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> TokenIdentity {
        TokenIdentity::new([7u8; 32], 1)
    }

    #[tokio::test]
    async fn issued_token_round_trips_session() {
        let identity = identity();
        let session = Session::new("u1", "Ann", "ann").with_avatar("https://img/ann.png");
        let token = identity.issue(&session).unwrap();
        assert_eq!(identity.current_session(&token).await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn foreign_or_garbage_tokens_are_anonymous() {
        let token = TokenIdentity::new([1u8; 32], 1)
            .issue(&Session::new("u1", "Ann", "ann"))
            .unwrap();
        assert_eq!(identity().current_session(&token).await.unwrap(), None);
        assert_eq!(identity().current_session("not-a-token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sign_out_revokes_token() {
        let identity = identity();
        let token = identity.issue(&Session::new("u1", "Ann", "ann")).unwrap();
        assert!(identity.sign_out(&token).await.unwrap());
        assert!(!identity.sign_out(&token).await.unwrap());
        assert_eq!(identity.current_session(&token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn revocations_are_dropped_once_tokens_expire() {
        let identity = identity();
        let token = identity.issue(&Session::new("u1", "Ann", "ann")).unwrap();
        assert!(identity.sign_out(&token).await.unwrap());

        let mut revoked = identity.revoked.write().await;
        forget_expired(&mut revoked, OffsetDateTime::now_utc());
        assert_eq!(revoked.len(), 1);
        forget_expired(&mut revoked, OffsetDateTime::now_utc() + time::Duration::hours(2));
        assert!(revoked.is_empty());
    }

    #[test]
    fn missing_session_is_unauthenticated() {
        assert!(matches!(require_session(None), Err(FeedError::Unauthenticated)));
    }
}
