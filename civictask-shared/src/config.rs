/// Configuration management
///
/// Loads configuration from environment variables (and a `.env` file when
/// present) into a type-safe struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `UPLOAD_DIR`: where uploaded media is written (default: ./uploads)
/// - `PUBLIC_BASE_URL`: URL the upload directory is served at
///   (default: http://localhost:8080)
/// - `S3_BUCKET`, `S3_REGION`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`:
///   upload to S3 instead of `UPLOAD_DIR`; set all four or none
/// - `S3_ENDPOINT`: path-style endpoint for S3-compatible stores
/// - `S3_PUBLIC_BASE_URL`: base of returned media links (default: object URL)
/// - `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_PHONE_NUMBER`: SMS
///   credentials; set all three or none
/// - `CLERK_WEBHOOK_SECRET`: `whsec_` signing secret for user events
/// - `CLERK_JWT_KEY`: PEM public key for session tokens
/// - `SESSION_JWT_SECRET`: HS256 secret for session tokens in development
/// - `CLERK_ISSUER`: expected `iss` of session tokens
/// - `LOG_FORMAT`: `text` or `json` (default: text)
///
/// # Example
///
/// ```no_run
/// use civictask_shared::config::AppConfig;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = AppConfig::from_env()?;
/// println!("uploads go to {}", config.storage.upload_dir);
/// # Ok(())
/// # }
/// ```

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use crate::auth::jwt::JwtVerifier;
use crate::auth::webhook::SvixVerifier;
use crate::db::pool::DatabaseConfig;
use crate::notifications::{TwilioConfig, TwilioSms};
use crate::storage::{LocalStorage, ObjectStorage, S3Config, S3Storage};

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,

    /// None disables SMS notifications
    pub twilio: Option<TwilioConfig>,

    pub auth: AuthConfig,
    pub log_format: LogFormat,
}

/// Media storage configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub public_base_url: String,

    /// Takes precedence over the upload directory when set
    pub s3: Option<S3Config>,
}

/// Identity provider configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    pub webhook_secret: Option<String>,
    pub jwt_public_key: Option<String>,

    /// Must be at least 32 characters
    pub jwt_secret: Option<String>,

    pub issuer: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `DATABASE_URL` is missing
    /// - a numeric variable does not parse
    /// - only some of the Twilio variables are set
    /// - `SESSION_JWT_SECRET` is shorter than 32 characters
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_connections = var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse::<u32>()
            .map_err(|e| anyhow::anyhow!("DATABASE_MAX_CONNECTIONS is invalid: {}", e))?;

        let s3 = match (
            var("S3_BUCKET"),
            var("S3_REGION"),
            var("AWS_ACCESS_KEY_ID"),
            var("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(bucket), Some(region), Some(access_key_id), Some(secret_access_key)) => Some(S3Config {
                bucket,
                region,
                access_key_id,
                secret_access_key,
                endpoint: var("S3_ENDPOINT"),
                public_base_url: var("S3_PUBLIC_BASE_URL"),
            }),
            (None, None, None, None) => None,
            _ => anyhow::bail!(
                "S3_BUCKET, S3_REGION, AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together"
            ),
        };

        let storage = StorageConfig {
            upload_dir: var("UPLOAD_DIR").unwrap_or_else(|| "./uploads".to_string()),
            public_base_url: var("PUBLIC_BASE_URL").unwrap_or_else(|| "http://localhost:8080".to_string()),
            s3,
        };

        let twilio = match (
            var("TWILIO_ACCOUNT_SID"),
            var("TWILIO_AUTH_TOKEN"),
            var("TWILIO_PHONE_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                from_number,
            }),
            (None, None, None) => None,
            _ => anyhow::bail!(
                "TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_PHONE_NUMBER must be set together"
            ),
        };

        let jwt_secret = var("SESSION_JWT_SECRET");
        if let Some(secret) = &jwt_secret {
            if secret.len() < 32 {
                anyhow::bail!("SESSION_JWT_SECRET must be at least 32 characters long");
            }
        }

        let auth = AuthConfig {
            webhook_secret: var("CLERK_WEBHOOK_SECRET"),
            jwt_public_key: var("CLERK_JWT_KEY"),
            jwt_secret,
            issuer: var("CLERK_ISSUER"),
        };

        let log_format = var("LOG_FORMAT")
            .map(|v| v.parse::<LogFormat>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            database: DatabaseConfig::new(database_url).with_max_connections(max_connections),
            storage,
            twilio,
            auth,
            log_format,
        })
    }

    pub fn local_storage(&self) -> LocalStorage {
        LocalStorage::new(&self.storage.upload_dir, &self.storage.public_base_url)
    }

    /// S3 when configured, the upload directory otherwise
    pub fn object_storage(&self) -> Arc<dyn ObjectStorage> {
        match &self.storage.s3 {
            Some(s3) => Arc::new(S3Storage::new(s3.clone())),
            None => Arc::new(self.local_storage()),
        }
    }

    pub fn sms_sender(&self) -> Option<TwilioSms> {
        self.twilio.clone().map(TwilioSms::new)
    }

    /// Session verifier; the PEM key wins over the shared secret
    pub fn identity_verifier(&self) -> anyhow::Result<Option<JwtVerifier>> {
        let verifier = match (&self.auth.jwt_public_key, &self.auth.jwt_secret) {
            (Some(pem), _) => Some(JwtVerifier::from_rsa_pem(pem.as_bytes())?),
            (None, Some(secret)) => Some(JwtVerifier::from_secret(secret.as_bytes())),
            (None, None) => None,
        };

        Ok(match (verifier, &self.auth.issuer) {
            (Some(verifier), Some(issuer)) => Some(verifier.with_issuer(issuer)),
            (verifier, _) => verifier,
        })
    }

    pub fn webhook_verifier(&self) -> anyhow::Result<Option<SvixVerifier>> {
        self.auth
            .webhook_secret
            .as_deref()
            .map(SvixVerifier::new)
            .transpose()
            .map_err(|e| anyhow::anyhow!("CLERK_WEBHOOK_SECRET is invalid: {}", e))
    }
}
