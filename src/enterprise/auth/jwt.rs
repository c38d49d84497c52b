//! Stateless HS256 access/refresh token issuance and verification (C5).
//!
//! Generalized from the donor's `JwtManager` (claim shape, `create_token_pair`/
//! `verify_access_token`/`verify_refresh_token`) from its in-memory
//! `HashMap`/`RwLock` blacklist and refresh-token store onto the
//! Redis-backed key formats spec §3/§4.5 name exactly
//! (`refresh_token:{user_id}:{jti}`, `blacklist:{jti}`); the RSA/ECDSA
//! algorithm options, token rotation map, and fingerprinting the donor also
//! carried are dropped — spec's auth core signs exactly HS256 and binds no
//! client fingerprint.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Claims carried by both access and refresh tokens (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub email: String,
    pub jti: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Access + refresh token pair as returned by login/refresh (§6).
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub access_jti: String,
    pub refresh_jti: String,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Stateless JWT signer/verifier — holds only keys, no mutable state. The
/// refresh-token store and blacklist live in Redis (see
/// [`crate::enterprise::auth::AuthCore`]), not here, so every gateway and
/// user-service replica agrees.
pub struct JwtManager {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Issues a fresh access/refresh pair for `user_id`/`email`. Does not
    /// touch Redis — persisting the refresh token and reading it back is
    /// the caller's (`AuthCore`) responsibility.
    pub fn issue_pair(&self, user_id: &str, email: &str) -> Result<TokenPair> {
        let now = Self::now();
        let access_jti = Uuid::new_v4().to_string();
        let refresh_jti = Uuid::new_v4().to_string();

        let access_claims = TokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            jti: access_jti.clone(),
            token_type: TokenType::Access,
            iat: now,
            exp: now + self.config.access_ttl.as_secs(),
        };
        let refresh_claims = TokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            jti: refresh_jti.clone(),
            token_type: TokenType::Refresh,
            iat: now,
            exp: now + self.config.refresh_ttl.as_secs(),
        };

        let header = Header::new(Algorithm::HS256);
        let access_token = encode(&header, &access_claims, &self.encoding_key)?;
        let refresh_token = encode(&header, &refresh_claims, &self.encoding_key)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.config.access_ttl.as_secs(),
            access_jti,
            refresh_jti,
        })
    }

    /// Verifies signature and expiry only — no blacklist/store check (that
    /// happens in `AuthCore`, which needs the cache anyway).
    pub fn decode_claims(&self, token: &str) -> Result<TokenClaims> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.config.refresh_ttl
    }

    pub fn access_ttl(&self) -> Duration {
        self.config.access_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new(JwtConfig {
            secret: "test-secret-key-used-for-unit-tests".to_string(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(604_800),
        })
    }

    #[test]
    fn issues_distinct_access_and_refresh_tokens() {
        let pair = manager().issue_pair("u1", "a@b.c").unwrap();
        assert_ne!(pair.access_token, pair.refresh_token);
        assert_ne!(pair.access_jti, pair.refresh_jti);
    }

    #[test]
    fn decodes_claims_with_expected_subject() {
        let mgr = manager();
        let pair = mgr.issue_pair("u1", "a@b.c").unwrap();
        let claims = mgr.decode_claims(&pair.access_token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn rejects_tampered_token() {
        let mgr = manager();
        let pair = mgr.issue_pair("u1", "a@b.c").unwrap();
        let tampered = format!("{}x", pair.access_token);
        assert!(mgr.decode_claims(&tampered).is_err());
    }
}
