//! Auth core (C5, spec §4.5): stateless JWT access/refresh issuance backed
//! by distributed revocation in Redis.
//!
//! The donor's module built a full RBAC/ABAC/MFA/multi-provider framework
//! (`permission`, `role`, `session`, `policy`, `provider` submodules) around
//! its `JwtManager`/`UserManager` pair. None of that survives here — spec's
//! auth core has no roles or policies, just login/refresh/logout/validate
//! against a single `User` shape. What's kept is the donor's idea of a
//! facade struct wiring token issuance to user lookup in one place
//! (`AuthSystem` there, `AuthCore` here), generalized so the facade also
//! owns the Redis-backed revocation state the donor kept in-process.

pub mod jwt;
pub mod user;

use std::time::Duration;

use uuid::Uuid;

pub use jwt::{JwtConfig, JwtManager, TokenClaims, TokenPair, TokenType};

use crate::cache::CacheClient;
use crate::error::{Error, Result};
use crate::store::{User, UserRepository};

fn refresh_key(user_id: &str, jti: &str) -> String {
    format!("refresh_token:{user_id}:{jti}")
}

fn blacklist_key(jti: &str) -> String {
    format!("blacklist:{jti}")
}

/// Facade wiring JWT issuance, password verification, and distributed
/// revocation into the four operations the gateway's `/auth/*` routes need.
#[derive(Clone)]
pub struct AuthCore {
    jwt: std::sync::Arc<JwtManager>,
    cache: CacheClient,
    users: UserRepository,
}

impl AuthCore {
    pub fn new(jwt: JwtManager, cache: CacheClient, users: UserRepository) -> Self {
        Self {
            jwt: std::sync::Arc::new(jwt),
            cache,
            users,
        }
    }

    /// `login(email, password)`: verifies credentials, issues a token
    /// pair, and persists the refresh token's jti so it can later be
    /// revoked or rotated.
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, TokenPair)> {
        let user = self
            .users
            .find_by_email(email)
            .await
            .map_err(|_| Error::Unauthorized("invalid email or password".into()))?;

        let valid = user::verify_password(password, &user.password_hash)?;
        if !valid {
            return Err(Error::Unauthorized("invalid email or password".into()));
        }

        let pair = self.jwt.issue_pair(&user.id.to_string(), &user.email)?;
        self.persist_refresh(&user.id.to_string(), &pair.refresh_jti)
            .await;

        Ok((user, pair))
    }

    /// `refresh(refresh_token)`: validates the token, confirms it has not
    /// been blacklisted or rotated away, then atomically retires it and
    /// issues a fresh pair (rotation — spec §4.5).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.jwt.decode_claims(refresh_token)?;
        if claims.token_type != TokenType::Refresh {
            return Err(Error::Unauthorized("not a refresh token".into()));
        }

        if self.is_blacklisted(&claims.jti).await {
            return Err(Error::Unauthorized("refresh token has been revoked".into()));
        }

        let stored = self
            .cache
            .exists(&refresh_key(&claims.sub, &claims.jti))
            .await
            .unwrap_or(false);
        if !stored {
            return Err(Error::Unauthorized("refresh token is unknown or expired".into()));
        }

        let user = self
            .users
            .find_by_id(
                Uuid::parse_str(&claims.sub)
                    .map_err(|_| Error::Unauthorized("malformed subject claim".into()))?,
            )
            .await?;

        let pair = self.jwt.issue_pair(&user.id.to_string(), &user.email)?;

        let _ = self
            .cache
            .delete(&refresh_key(&claims.sub, &claims.jti))
            .await;
        self.blacklist(&claims.jti, self.jwt.refresh_ttl()).await;
        self.persist_refresh(&user.id.to_string(), &pair.refresh_jti)
            .await;

        Ok(pair)
    }

    /// `logout(access_token)`: blacklists the access token's jti and
    /// deletes every `refresh_token:{user_id}:*` marker so an already-issued
    /// refresh token can no longer be redeemed (spec §4.5).
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        let claims = self.jwt.decode_claims(access_token)?;
        self.blacklist(&claims.jti, self.jwt.access_ttl()).await;
        if let Err(e) = self
            .cache
            .delete_matching(&format!("refresh_token:{}:*", claims.sub))
            .await
        {
            tracing::warn!(error = %e, user_id = %claims.sub, "failed to clear refresh tokens on logout");
        }
        Ok(())
    }

    /// `validate(access_token)`: signature + expiry + blacklist check,
    /// returning the subject claims a handler needs.
    pub async fn validate(&self, access_token: &str) -> Result<TokenClaims> {
        let claims = self.jwt.decode_claims(access_token)?;
        if claims.token_type != TokenType::Access {
            return Err(Error::Unauthorized("not an access token".into()));
        }
        if self.is_blacklisted(&claims.jti).await {
            return Err(Error::Unauthorized("token has been revoked".into()));
        }
        Ok(claims)
    }

    async fn persist_refresh(&self, user_id: &str, jti: &str) {
        let key = refresh_key(user_id, jti);
        if let Err(e) = self
            .cache
            .set(&key, b"1", Some(self.jwt.refresh_ttl()))
            .await
        {
            tracing::warn!(error = %e, user_id, "failed to persist refresh token marker");
        }
    }

    async fn blacklist(&self, jti: &str, ttl: Duration) {
        let key = blacklist_key(jti);
        if let Err(e) = self.cache.set(&key, b"1", Some(ttl)).await {
            tracing::warn!(error = %e, jti, "failed to write blacklist marker");
        }
    }

    async fn is_blacklisted(&self, jti: &str) -> bool {
        self.cache
            .exists(&blacklist_key(jti))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_and_blacklist_keys_match_spec_format() {
        assert_eq!(refresh_key("u1", "j1"), "refresh_token:u1:j1");
        assert_eq!(blacklist_key("j1"), "blacklist:j1");
    }
}
