/// Session-token verification
///
/// The identity provider signs session tokens as JWTs. Production
/// deployments verify them with the provider's RS256 public key; local setups
/// can use an HS256 shared secret.
///
/// # Validation
///
/// - Signature with the configured key and algorithm
/// - `exp` and `nbf`, with the library's default leeway
/// - `iss`, when an issuer is configured
///
/// # Example
///
/// ```no_run
/// use civictask_shared::auth::identity::IdentityVerifier;
/// use civictask_shared::auth::jwt::JwtVerifier;
///
/// # async fn example(pem: &[u8], token: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let verifier = JwtVerifier::from_rsa_pem(pem)?.with_issuer("https://clerk.example.com");
/// let identity = verifier.verify(token).await?;
/// println!("signed in as {}", identity.subject);
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::identity::{IdentityVerifier, VerifiedIdentity};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Invalid verification key: {0}")]
    InvalidKey(String),

    #[error("Token has expired")]
    Expired,

    #[error("Invalid issuer")]
    InvalidIssuer,

    #[error("Failed to validate token: {0}")]
    ValidationError(String),
}

/// Claims read from a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Provider user id
    pub sub: String,

    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    // Optional custom claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl From<SessionClaims> for VerifiedIdentity {
    fn from(claims: SessionClaims) -> Self {
        VerifiedIdentity {
            subject: claims.sub,
            email: claims.email,
            first_name: claims.first_name,
            last_name: claims.last_name,
        }
    }
}

/// [`IdentityVerifier`] for JWT session tokens
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    fn with_key(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self { key, validation }
    }

    /// RS256 verification with a PEM-encoded public key
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, JwtError> {
        let key = DecodingKey::from_rsa_pem(pem).map_err(|e| JwtError::InvalidKey(e.to_string()))?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    /// HS256 verification with a shared secret
    pub fn from_secret(secret: &[u8]) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256)
    }

    /// Rejects tokens from any other issuer
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn decode(&self, token: &str) -> Result<SessionClaims, JwtError> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidIssuer => JwtError::InvalidIssuer,
            _ => JwtError::ValidationError(e.to_string()),
        })?;
        Ok(data.claims)
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> CoreResult<VerifiedIdentity> {
        let claims = self.decode(token).map_err(|e| {
            debug!(error = %e, "Session token rejected");
            CoreError::Authentication(e.to_string())
        })?;
        Ok(claims.into())
    }
}
