//! Mail transports.
//!
//! `console` logs the rendered context and reports the message queued; `http`
//! posts it to a transactional mail API.

use async_trait::async_trait;
use domain::models::{DeliveryStatus, MailContext};
use domain::services::{MailError, MailTransport};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::MailConfig;

/// Builds the transport selected by `mail.provider`.
pub fn build_mail_transport(config: &MailConfig) -> Result<Arc<dyn MailTransport>, reqwest::Error> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpMailTransport::new(config)?)),
        _ => Ok(Arc::new(ConsoleMailTransport::new(&config.sender_email))),
    }
}

/// Development transport that writes messages to the log.
pub struct ConsoleMailTransport {
    sender: String,
}

impl ConsoleMailTransport {
    pub fn new(sender: &str) -> Self {
        Self {
            sender: sender.to_string(),
        }
    }
}

#[async_trait]
impl MailTransport for ConsoleMailTransport {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        context: &MailContext,
    ) -> Result<DeliveryStatus, MailError> {
        info!(
            from = %self.sender,
            to = %recipient,
            template_id,
            invitation_id = %context.invitation_id,
            school = %context.school_name,
            role = %context.role.as_str(),
            invite_url = %context.invite_url,
            "[CONSOLE MAIL] invitation"
        );
        Ok(DeliveryStatus::Queued)
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    template_id: &'a str,
    context: &'a MailContext,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    status: Option<DeliveryStatus>,
}

/// Transport posting JSON to a mail provider API.
pub struct HttpMailTransport {
    client: Client,
    api_url: String,
    api_key: String,
    sender: String,
}

impl HttpMailTransport {
    pub fn new(config: &MailConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            sender: config.sender_email.clone(),
        })
    }
}

/// Maps a provider response status onto a delivery outcome.
fn outcome_for(status: StatusCode) -> Result<Option<DeliveryStatus>, MailError> {
    if status.is_success() {
        Ok(None)
    } else if status == StatusCode::UNPROCESSABLE_ENTITY {
        // Provider refused the recipient address outright.
        Ok(Some(DeliveryStatus::Bounced))
    } else {
        Err(MailError::Provider {
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        context: &MailContext,
    ) -> Result<DeliveryStatus, MailError> {
        let body = SendRequest {
            from: &self.sender,
            to: recipient,
            template_id,
            context,
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if let Some(outcome) = outcome_for(status)? {
            warn!(invitation_id = %context.invitation_id, %status, "Mail provider rejected recipient");
            return Ok(outcome);
        }

        // A body without a status means the provider only accepted the message.
        let parsed = response.json::<SendResponse>().await.ok();
        let outcome = parsed
            .and_then(|r| r.status)
            .unwrap_or(DeliveryStatus::Queued);
        debug!(invitation_id = %context.invitation_id, outcome = outcome.as_str(), "Mail accepted by provider");
        Ok(outcome)
    }
}
