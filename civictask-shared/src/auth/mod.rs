/// Authentication and authorization
///
/// Identities are issued by an external provider; this crate only verifies
/// them and maps them onto local users.
///
/// # Modules
///
/// - [`identity`]: the [`identity::IdentityVerifier`] seam, bearer-token
///   authentication, and role checks
/// - [`jwt`]: session-token verification with `jsonwebtoken`
/// - [`webhook`]: signed provider webhooks and user-event ingestion
///
/// # Example
///
/// ```no_run
/// use civictask_shared::auth::identity::{authenticate, require_admin};
/// use civictask_shared::auth::jwt::JwtVerifier;
///
/// # async fn example(conn: &mut sqlx::PgConnection, header: &str) -> civictask_shared::error::CoreResult<()> {
/// let verifier = JwtVerifier::from_secret(b"dev-session-secret");
/// let user = authenticate(conn, &verifier, header).await?;
/// require_admin(&user)?;
/// # Ok(())
/// # }
/// ```

pub mod identity;
pub mod jwt;
pub mod webhook;
