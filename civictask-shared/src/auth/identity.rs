/// Caller identification
///
/// A bearer token is verified by an [`IdentityVerifier`] and its subject is
/// looked up as a local user's `external_id`. Unknown subjects fail with
/// `Authentication`; blocked users fail with `Authorization`.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::models::user::User;

/// Claims the identity provider vouches for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Provider user id; matches `users.external_id`
    pub subject: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl VerifiedIdentity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Default::default()
        }
    }
}

/// Verifies a raw session token
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Fails with `Authentication` when the token is not valid
    async fn verify(&self, token: &str) -> CoreResult<VerifiedIdentity>;
}

/// Fixed token table for development and tests
#[derive(Debug, Clone, Default)]
pub struct StaticVerifier {
    tokens: HashMap<String, VerifiedIdentity>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: VerifiedIdentity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> CoreResult<VerifiedIdentity> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| CoreError::Authentication("unknown session token".to_string()))
    }
}

/// Token from an `Authorization` header value
///
/// Accepts `Bearer <token>` with any casing of the scheme, as well as a bare
/// token. A scheme with nothing after it is a missing token.
pub fn extract_bearer_token(header: &str) -> CoreResult<&str> {
    let header = header.trim();
    let token = match header.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if header.eq_ignore_ascii_case("bearer") => "",
        _ => header,
    };

    if token.is_empty() {
        return Err(CoreError::Authentication("missing bearer token".to_string()));
    }
    Ok(token)
}

/// Resolves the caller behind an `Authorization` header
pub async fn authenticate(
    conn: &mut PgConnection,
    verifier: &dyn IdentityVerifier,
    authorization: &str,
) -> CoreResult<User> {
    let token = extract_bearer_token(authorization)?;
    let identity = verifier.verify(token).await?;

    let user = User::find_by_external_id(conn, &identity.subject)
        .await?
        .ok_or_else(|| {
            warn!(subject = %identity.subject, "Verified identity has no local user");
            CoreError::Authentication(format!("no user for subject {}", identity.subject))
        })?;

    if user.blocked {
        return Err(CoreError::Authorization(format!("user {} is blocked", user.id)));
    }

    debug!(user_id = %user.id, "Caller authenticated");
    Ok(user)
}

/// Fails unless `user` has the admin role
pub fn require_admin(user: &User) -> CoreResult<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(CoreError::Authorization(format!("user {} is not an admin", user.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserRole;

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc.def").unwrap(), "abc.def");
        assert_eq!(extract_bearer_token("bearer abc").unwrap(), "abc");
        assert_eq!(extract_bearer_token("  abc  ").unwrap(), "abc");
        assert!(matches!(
            extract_bearer_token("Bearer "),
            Err(CoreError::Authentication(_))
        ));
        assert!(extract_bearer_token("").is_err());
    }

    #[test]
    fn test_extract_bearer_token_scheme_variants() {
        assert_eq!(extract_bearer_token("BEARER  abc ").unwrap(), "abc");
        assert_eq!(extract_bearer_token("Bearer\tabc").unwrap(), "abc");
        assert!(extract_bearer_token("Bearer").is_err());
        assert!(extract_bearer_token("  bearer   ").is_err());
        assert_eq!(extract_bearer_token("Bearerabc").unwrap(), "Bearerabc");
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticVerifier::new().with_token("t1", VerifiedIdentity::new("user_1"));

        let identity = verifier.verify("t1").await.unwrap();
        assert_eq!(identity.subject, "user_1");

        let err = verifier.verify("t2").await.unwrap_err();
        assert!(matches!(err, CoreError::Authentication(_)));
    }

    #[test]
    fn test_require_admin() {
        let mut user = User::new("user_1");
        assert!(matches!(require_admin(&user), Err(CoreError::Authorization(_))));

        user.role = UserRole::Admin;
        assert!(require_admin(&user).is_ok());
    }
}
