/// Outbound SMS notifications
///
/// [`TwilioSms`] posts to the Twilio Messages API with basic auth.
/// [`MemorySmsSender`] records messages instead of sending them.
///
/// Notifications are best effort: [`notify_best_effort`] logs a failure and
/// carries on, so an SMS outage never fails the write that triggered it.
///
/// # Example
///
/// ```no_run
/// use civictask_shared::notifications::{SmsSender, TwilioConfig, TwilioSms};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sms = TwilioSms::new(TwilioConfig {
///     account_sid: "AC123".to_string(),
///     auth_token: "secret".to_string(),
///     from_number: "+15005550006".to_string(),
/// });
/// sms.send("+15551234567", "A new task was posted near you").await?;
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("SMS request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("SMS provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), NotificationError>;
}

/// Twilio account credentials
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,

    /// Sending number in E.164 form
    pub from_number: String,
}

#[derive(Debug, Clone)]
pub struct TwilioSms {
    client: reqwest::Client,
    config: TwilioConfig,
    api_base: String,
}

impl TwilioSms {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_base: TWILIO_API_BASE.to_string(),
        }
    }

    /// Points the sender at another API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl SmsSender for TwilioSms {
    async fn send(&self, to: &str, body: &str) -> Result<(), NotificationError> {
        if to.trim().is_empty() {
            return Err(NotificationError::InvalidRecipient(to.to_string()));
        }

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        info!(to, "SMS sent");
        Ok(())
    }
}

/// A message captured by [`MemorySmsSender`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub body: String,
}

/// Records messages in memory; optionally fails every send
#[derive(Debug, Default)]
pub struct MemorySmsSender {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl MemorySmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SmsSender for MemorySmsSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), NotificationError> {
        if self.fail {
            return Err(NotificationError::Provider {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        self.sent.lock().await.push(SentMessage {
            to: to.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Sends and logs failures; returns whether the message went out
pub async fn notify_best_effort(sender: &dyn SmsSender, to: &str, body: &str) -> bool {
    match sender.send(to, body).await {
        Ok(()) => true,
        Err(e) => {
            warn!(to, error = %e, "Failed to send SMS notification");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC42".to_string(),
            auth_token: "token".to_string(),
            from_number: "+15005550006".to_string(),
        }
    }

    #[test]
    fn test_messages_url() {
        let sms = TwilioSms::new(config());
        assert_eq!(
            sms.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC42/Messages.json"
        );

        let sms = sms.with_api_base("http://localhost:4010/");
        assert_eq!(sms.messages_url(), "http://localhost:4010/Accounts/AC42/Messages.json");
    }

    #[tokio::test]
    async fn test_empty_recipient_rejected() {
        let sms = TwilioSms::new(config());
        let err = sms.send("  ", "hello").await.unwrap_err();
        assert!(matches!(err, NotificationError::InvalidRecipient(_)));
    }

    #[tokio::test]
    async fn test_memory_sender_records() {
        let sender = MemorySmsSender::new();
        assert!(notify_best_effort(&sender, "+1555", "hi").await);
        assert_eq!(
            sender.sent().await,
            vec![SentMessage {
                to: "+1555".to_string(),
                body: "hi".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failure() {
        let sender = MemorySmsSender::failing();
        assert!(!notify_best_effort(&sender, "+1555", "hi").await);
        assert!(sender.sent().await.is_empty());
    }
}
