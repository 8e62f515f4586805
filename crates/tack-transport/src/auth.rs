//! Identity verification at connect time.
//!
//! Token issuance lives outside Tack; this side only verifies.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tack_core::{Identity, UserId};
use tracing::debug;

use crate::traits::TransportError;

/// Turns a presented token into a verified identity.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, TransportError>;
}

/// JWT claims carried by identity tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Expiration time (Unix timestamp).
    pub exp: u64,
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify the signature and expiry and return the claims.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for a bad signature, an expired token or
    /// malformed claims.
    pub fn claims(&self, token: &str) -> Result<Claims, TransportError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| TransportError::Unauthenticated(format!("token verification failed: {e}")))
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, TransportError> {
        let claims = self.claims(token)?;
        let user_id = UserId::parse(&claims.sub)
            .map_err(|e| TransportError::Unauthenticated(format!("invalid subject: {e}")))?;
        debug!(user = %user_id, "Token verified");
        Ok(Identity::new(user_id, claims.email))
    }
}
