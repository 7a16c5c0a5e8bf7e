//! Handshake authentication.
//!
//! Clients authenticate before the WebSocket upgrade with a signed JWT,
//! carried either in an `Authorization: Bearer` header or, for browser
//! clients that cannot set headers, a `token` query parameter. A request
//! with no verifiable credential is rejected with 401 and never upgraded.

use async_trait::async_trait;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use roomcast_core::{IdentityVerifier, UserId, VerifyError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Claims carried by a Roomcast token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id, as a decimal string.
    pub sub: String,
    /// Expiry, seconds since the epoch.
    pub exp: usize,
}

/// HS256 token verifier.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier over an HMAC secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<UserId, VerifyError> {
        let data = decode::<Claims>(credential, &self.decoding_key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                VerifyError::InvalidCredential
            })?;
        data.claims
            .sub
            .parse::<UserId>()
            .map_err(|_| VerifyError::InvalidCredential)
    }
}

/// Pull the bearer token out of an `Authorization` header, if present.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
