/// Signed identity-provider webhooks
///
/// The provider delivers user events through Svix. Each delivery carries
/// three headers:
///
/// - `svix-id`: message id
/// - `svix-timestamp`: unix seconds
/// - `svix-signature`: space-separated `v1,<base64>` signatures
///
/// A signature is HMAC-SHA256 over `{id}.{timestamp}.{body}`, keyed with the
/// base64 part of the `whsec_` secret. Deliveries older or newer than five
/// minutes are rejected.
///
/// # Example
///
/// ```no_run
/// use civictask_shared::auth::webhook::{ingest_user_event, SvixVerifier, WebhookHeaders};
/// # async fn example(conn: &mut sqlx::PgConnection, body: &[u8]) -> civictask_shared::error::CoreResult<()> {
/// let verifier = SvixVerifier::new("whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw")?;
/// let headers = WebhookHeaders {
///     id: "msg_2abc".to_string(),
///     timestamp: "1700000000".to_string(),
///     signature: "v1,K5oZfzN95Z9UVu1EsfQmfVNQhnkZ2pj9o9NDN/H/pI4=".to_string(),
/// };
///
/// let outcome = ingest_user_event(conn, &verifier, &headers, body).await?;
/// println!("{:?}", outcome);
/// # Ok(())
/// # }
/// ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgConnection;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::models::user::User;
use crate::services::users::{create_user_from_event, ExternalUser};

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";

/// Allowed clock difference between sender and receiver, in seconds
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid webhook secret")]
    InvalidSecret,

    #[error("Missing or empty header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid webhook timestamp")]
    InvalidTimestamp,

    #[error("Webhook timestamp outside tolerance")]
    TimestampOutOfTolerance,

    #[error("No matching webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

impl From<WebhookError> for CoreError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidPayload(_) => CoreError::Validation(err.to_string()),
            _ => CoreError::Authentication(err.to_string()),
        }
    }
}

/// The three Svix delivery headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookHeaders {
    pub id: String,
    pub timestamp: String,
    pub signature: String,
}

impl WebhookHeaders {
    /// Reads headers by name, case-insensitively
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut headers = WebhookHeaders::default();
        for (name, value) in pairs {
            match name.to_ascii_lowercase().as_str() {
                "svix-id" => headers.id = value.to_string(),
                "svix-timestamp" => headers.timestamp = value.to_string(),
                "svix-signature" => headers.signature = value.to_string(),
                _ => {}
            }
        }
        headers
    }
}

/// Authenticates a webhook delivery
pub trait WebhookVerifier: Send + Sync {
    fn verify(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<(), WebhookError>;
}

/// Svix signature scheme
#[derive(Clone)]
pub struct SvixVerifier {
    key: Vec<u8>,
}

impl SvixVerifier {
    /// Accepts the secret with or without the `whsec_` prefix
    pub fn new(secret: &str) -> Result<Self, WebhookError> {
        let encoded = secret.trim();
        let encoded = encoded.strip_prefix(SECRET_PREFIX).unwrap_or(encoded);

        let key = STANDARD
            .decode(encoded)
            .map_err(|_| WebhookError::InvalidSecret)?;
        if key.is_empty() {
            return Err(WebhookError::InvalidSecret);
        }
        Ok(Self { key })
    }

    fn mac(&self, id: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| WebhookError::InvalidSecret)?;
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }

    /// `v1,<base64>` signature for a delivery
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> Result<String, WebhookError> {
        let mac = self.mac(id, &timestamp.to_string(), body)?;
        Ok(format!("v1,{}", STANDARD.encode(mac.finalize().into_bytes())))
    }

    /// Verifies against an explicit clock
    pub fn verify_at(&self, headers: &WebhookHeaders, body: &[u8], now: i64) -> Result<(), WebhookError> {
        if headers.id.is_empty() {
            return Err(WebhookError::MissingHeader("svix-id"));
        }
        if headers.timestamp.is_empty() {
            return Err(WebhookError::MissingHeader("svix-timestamp"));
        }
        if headers.signature.is_empty() {
            return Err(WebhookError::MissingHeader("svix-signature"));
        }

        let timestamp = headers
            .timestamp
            .trim()
            .parse::<i64>()
            .map_err(|_| WebhookError::InvalidTimestamp)?;
        if now.abs_diff(timestamp) > TIMESTAMP_TOLERANCE_SECS.unsigned_abs() {
            return Err(WebhookError::TimestampOutOfTolerance);
        }

        let mac = self.mac(&headers.id, headers.timestamp.trim(), body)?;
        let matched = headers
            .signature
            .split_whitespace()
            .filter_map(|entry| entry.split_once(','))
            .filter(|(version, _)| *version == "v1")
            .filter_map(|(_, signature)| STANDARD.decode(signature).ok())
            .any(|signature| mac.clone().verify_slice(&signature).is_ok());

        if matched {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        }
    }
}

impl WebhookVerifier for SvixVerifier {
    fn verify(&self, headers: &WebhookHeaders, body: &[u8]) -> Result<(), WebhookError> {
        self.verify_at(headers, body, Utc::now().timestamp())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailAddress {
    pub id: String,
    pub email_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhoneNumber {
    pub id: String,
    pub phone_number: String,
}

/// User object inside a provider event
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderUser {
    pub id: String,

    #[serde(default)]
    pub first_name: Option<String>,

    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,

    #[serde(default)]
    pub primary_email_address_id: Option<String>,

    #[serde(default)]
    pub phone_numbers: Vec<PhoneNumber>,

    #[serde(default)]
    pub primary_phone_number_id: Option<String>,

    /// Epoch milliseconds as a string, or empty
    #[serde(default)]
    pub birthday: Option<String>,
}

impl ProviderUser {
    /// The primary email, falling back to the first listed
    pub fn email(&self) -> Option<&str> {
        let primary = self
            .primary_email_address_id
            .as_deref()
            .and_then(|id| self.email_addresses.iter().find(|e| e.id == id));
        primary
            .or_else(|| self.email_addresses.first())
            .map(|e| e.email_address.as_str())
    }

    pub fn phone_number(&self) -> Option<&str> {
        let primary = self
            .primary_phone_number_id
            .as_deref()
            .and_then(|id| self.phone_numbers.iter().find(|p| p.id == id));
        primary
            .or_else(|| self.phone_numbers.first())
            .map(|p| p.phone_number.as_str())
    }

    pub fn to_external_user(&self) -> ExternalUser {
        ExternalUser {
            external_id: self.id.clone(),
            first_name: self.first_name.clone().unwrap_or_default(),
            last_name: self.last_name.clone().unwrap_or_default(),
            email: self.email().map(str::to_string),
            phone_number: self.phone_number().map(str::to_string),
            birthday: self.birthday.clone(),
        }
    }
}

/// Envelope of a provider user event
#[derive(Debug, Clone, Deserialize)]
pub struct UserEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    pub data: serde_json::Value,

    /// Epoch milliseconds
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// What ingestion did with an event
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Created(User),
    Ignored(String),
}

/// Verifies a delivery and applies it
///
/// `user.created` persists a local user. Every other event type is
/// acknowledged without changes.
pub async fn ingest_user_event(
    conn: &mut PgConnection,
    verifier: &dyn WebhookVerifier,
    headers: &WebhookHeaders,
    body: &[u8],
) -> CoreResult<IngestOutcome> {
    if let Err(e) = verifier.verify(headers, body) {
        warn!(message_id = %headers.id, error = %e, "Webhook verification failed");
        return Err(e.into());
    }

    let event: UserEvent =
        serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    match event.event_type.as_str() {
        "user.created" => {
            let user: ProviderUser = serde_json::from_value(event.data)
                .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

            let created = create_user_from_event(conn, &user.to_external_user()).await?;
            info!(message_id = %headers.id, user_id = %created.id, "Ingested user.created");
            Ok(IngestOutcome::Created(created))
        }
        other => {
            debug!(message_id = %headers.id, event_type = other, "Ignoring webhook event");
            Ok(IngestOutcome::Ignored(other.to_string()))
        }
    }
}
