//! Signed authorization token check
//!
//! Tokens are compact JWS strings signed with HMAC-SHA256 over
//! `base64url(header) + "." + base64url(payload)` using the operator's shared
//! secret. Signature comparison is constant-time via aws-lc-rs.

use std::fmt;

use aws_lc_rs::hmac;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use modelserve_common::SigningSecret;

use crate::error::TokenError;

/// Token types accepted at admission
pub const ACCEPTED_TOKEN_TYPES: [&str; 2] = ["internal", "user"];

/// Only supported signing algorithm
pub const TOKEN_ALGORITHM: &str = "HS256";

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
}

/// Claims carried in a token payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenClaims {
    /// Subject (caller identity)
    #[serde(default)]
    pub sub: String,

    /// Token type, one of [`ACCEPTED_TOKEN_TYPES`]
    #[serde(rename = "type", default)]
    pub token_type: String,

    /// Expiry (Unix seconds)
    pub exp: i64,

    /// Issued at (Unix seconds)
    #[serde(default)]
    pub iat: i64,
}

/// Verifies tokens against a shared HMAC secret
pub struct TokenVerifier {
    key: hmac::Key,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Create a verifier for `secret`
    pub fn new(secret: &SigningSecret) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.expose()),
        }
    }

    /// Verify `token` at time `now` and return its claims.
    ///
    /// Checks in order: shape, header, claims, signature, expiry, type.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, TokenError> {
        let mut segments = token.trim().split('.');
        let (header_b64, payload_b64, signature_b64) =
            match (segments.next(), segments.next(), segments.next(), segments.next()) {
                (Some(h), Some(p), Some(s), None) => (h, p, s),
                _ => return Err(TokenError::Format),
            };

        let header: TokenHeader = decode_json(header_b64).map_err(TokenError::Header)?;
        if header.alg != TOKEN_ALGORITHM {
            return Err(TokenError::Algorithm(header.alg));
        }

        let claims: TokenClaims = decode_json(payload_b64).map_err(TokenError::Claims)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Signature)?;
        let signed = format!("{header_b64}.{payload_b64}");
        hmac::verify(&self.key, signed.as_bytes(), &signature)
            .map_err(|_| TokenError::Signature)?;

        if claims.exp < now.timestamp() {
            return Err(TokenError::Expired);
        }

        if !ACCEPTED_TOKEN_TYPES.contains(&claims.token_type.as_str()) {
            return Err(TokenError::Type(claims.token_type));
        }

        Ok(claims)
    }
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| format!("bad encoding: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Sign arbitrary header and payload JSON with `secret`
    pub(crate) fn mint_raw(secret: &str, header: &str, payload: &str) -> String {
        let header_b64 = URL_SAFE_NO_PAD.encode(header);
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
        let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
        let tag = hmac::sign(&key, format!("{header_b64}.{payload_b64}").as_bytes());
        format!(
            "{header_b64}.{payload_b64}.{}",
            URL_SAFE_NO_PAD.encode(tag.as_ref())
        )
    }

    /// Sign an HS256 token of `token_type` expiring at `exp`
    pub(crate) fn mint(secret: &str, token_type: &str, exp: i64) -> String {
        let claims = serde_json::json!({
            "sub": "caller-1",
            "type": token_type,
            "exp": exp,
            "iat": exp - 3600,
        });
        mint_raw(secret, r#"{"alg":"HS256","typ":"JWT"}"#, &claims.to_string())
    }
}
