//! Signed session tokens
//!
//! A token is `base64url(claims_json) "." base64url(ed25519_signature)` where the
//! signature covers the encoded claims. The gateway only holds the verifying
//! key; `TokenIssuer` exists for the operator tool and tests.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::channels;
use crate::errors::GatewayError;

/// Role carried by an authenticated identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        };
        write!(f, "{}", name)
    }
}

/// Who a connection is, once authenticated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

/// Authentication state of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated(Identity),
}

impl AuthState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthState::Authenticated(identity) => Some(identity),
            AuthState::Unauthenticated => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }
}

/// Token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub role: Role,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Issued at, unix seconds
    #[serde(default)]
    pub iat: i64,
}

/// Checks token signature and expiry
#[derive(Clone)]
pub struct TokenVerifier {
    key: VerifyingKey,
    leeway_secs: i64,
}

impl TokenVerifier {
    pub fn new(key: VerifyingKey, leeway_secs: u64) -> Self {
        Self {
            key,
            leeway_secs: leeway_secs as i64,
        }
    }

    /// Build from a base64 (standard alphabet) 32-byte public key
    pub fn from_base64(public_key: &str, leeway_secs: u64) -> Result<Self, String> {
        let bytes = STANDARD
            .decode(public_key.trim())
            .map_err(|e| format!("Invalid auth public key encoding: {}", e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("Auth public key must be 32 bytes, got {}", b.len()))?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| format!("Invalid auth public key: {}", e))?;
        Ok(Self::new(key, leeway_secs))
    }

    /// Verify against the current wall clock
    pub fn verify(&self, token: &str) -> Result<Identity, GatewayError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify with an explicit "now" (unix seconds)
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Identity, GatewayError> {
        let (payload, signature) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| GatewayError::auth("malformed token"))?;

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| GatewayError::auth("malformed token signature"))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| GatewayError::auth("malformed token signature"))?;

        self.key
            .verify(payload.as_bytes(), &signature)
            .map_err(|_| GatewayError::auth("signature verification failed"))?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| GatewayError::auth("malformed token payload"))?;
        let claims: Claims = serde_json::from_slice(&claims_bytes)
            .map_err(|e| GatewayError::auth(format!("malformed token claims: {}", e)))?;

        if claims.sub.is_empty() {
            return Err(GatewayError::auth("token has no subject"));
        }
        if !channels::is_valid_user_id(&claims.sub) {
            return Err(GatewayError::auth(format!(
                "token subject '{}' is not a valid user id",
                claims.sub
            )));
        }
        if claims.exp + self.leeway_secs < now {
            return Err(GatewayError::auth("token expired"));
        }

        Ok(Identity {
            user_id: claims.sub,
            role: claims.role,
        })
    }
}

/// Mints tokens (operator tooling and tests)
pub struct TokenIssuer {
    key: SigningKey,
}

impl TokenIssuer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Build from a base64 (standard alphabet) 32-byte secret key
    pub fn from_base64(secret_key: &str) -> Result<Self, String> {
        let bytes = STANDARD
            .decode(secret_key.trim())
            .map_err(|e| format!("Invalid signing key encoding: {}", e))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("Signing key must be 32 bytes, got {}", b.len()))?;
        Ok(Self::new(SigningKey::from_bytes(&bytes)))
    }

    /// Fresh random key pair
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.key.verifying_key().to_bytes())
    }

    pub fn secret_key_base64(&self) -> String {
        STANDARD.encode(self.key.to_bytes())
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, serde_json::Error> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signature = self.key.sign(payload.as_bytes());
        Ok(format!(
            "{}.{}",
            payload,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    /// Token for `user_id` valid for `ttl_secs` from now
    pub fn issue_for(&self, user_id: &str, role: Role, ttl_secs: i64) -> Result<String, serde_json::Error> {
        let now = Utc::now().timestamp();
        self.issue(&Claims {
            sub: user_id.to_string(),
            role,
            exp: now + ttl_secs,
            iat: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SigningKey::from_bytes(&[7u8; 32]))
    }

    fn claims(sub: &str, role: Role, exp: i64) -> Claims {
        Claims {
            sub: sub.to_string(),
            role,
            exp,
            iat: 0,
        }
    }

    #[test]
    fn test_valid_token_yields_identity() {
        let issuer = issuer();
        let verifier = TokenVerifier::new(issuer.verifying_key(), 0);
        let token = issuer.issue(&claims("alice", Role::Admin, 2_000)).unwrap();

        let identity = verifier.verify_at(&token, 1_000).unwrap();
        assert_eq!(identity.user_id, "alice");
        assert_eq!(identity.role, Role::Admin);
    }

    #[test]
    fn test_expired_token_rejected() {
        let issuer = issuer();
        let verifier = TokenVerifier::new(issuer.verifying_key(), 5);
        let token = issuer.issue(&claims("alice", Role::User, 1_000)).unwrap();

        assert!(verifier.verify_at(&token, 1_005).is_ok());
        let err = verifier.verify_at(&token, 1_006).unwrap_err();
        assert_eq!(err, GatewayError::auth("token expired"));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let issuer = issuer();
        let verifier = TokenVerifier::new(issuer.verifying_key(), 0);
        let token = issuer.issue(&claims("alice", Role::User, 2_000)).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let forged_payload = URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&claims("alice", Role::SuperAdmin, 2_000)).unwrap());
        let forged = format!("{}.{}", forged_payload, signature);

        let err = verifier.verify_at(&forged, 1_000).unwrap_err();
        assert_eq!(err.code(), "auth_error");
        assert!(err.to_string().contains("signature"));
    }

    #[test]
    fn test_subject_must_be_channel_safe() {
        let issuer = issuer();
        let verifier = TokenVerifier::new(issuer.verifying_key(), 0);

        let token = issuer
            .issue(&claims("bob@example.com", Role::User, 2_000))
            .unwrap();
        let err = verifier.verify_at(&token, 1_000).unwrap_err();
        assert_eq!(err.code(), "auth_error");
        assert!(err.to_string().contains("not a valid user id"));

        let token = issuer.issue(&claims("bob.smith-2", Role::User, 2_000)).unwrap();
        let identity = verifier.verify_at(&token, 1_000).unwrap();
        assert_eq!(
            channels::authorize(
                &channels::user_channel(&identity.user_id),
                &AuthState::Authenticated(identity)
            )
            .unwrap(),
            channels::AccessPolicy::UserScoped("bob.smith-2".to_string())
        );
    }

    #[test]
    fn test_foreign_key_rejected() {
        let other = TokenIssuer::new(SigningKey::from_bytes(&[9u8; 32]));
        let verifier = TokenVerifier::new(issuer().verifying_key(), 0);
        let token = other.issue(&claims("mallory", Role::Admin, 2_000)).unwrap();

        assert!(verifier.verify_at(&token, 1_000).is_err());
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let verifier = TokenVerifier::new(issuer().verifying_key(), 0);
        for token in ["", "no-dot", "a.b", "!!!.???"] {
            let err = verifier.verify_at(token, 0).unwrap_err();
            assert_eq!(err.code(), "auth_error", "token {:?}", token);
        }
    }

    #[test]
    fn test_key_round_trip_through_base64() {
        let issuer = issuer();
        let verifier = TokenVerifier::from_base64(&issuer.public_key_base64(), 0).unwrap();
        let token = issuer.issue(&claims("bob", Role::User, 10)).unwrap();
        assert_eq!(verifier.verify_at(&token, 0).unwrap().user_id, "bob");

        let reloaded = TokenIssuer::from_base64(&issuer.secret_key_base64()).unwrap();
        assert_eq!(reloaded.public_key_base64(), issuer.public_key_base64());

        assert!(TokenVerifier::from_base64("c2hvcnQ=", 0).is_err());
    }
}
