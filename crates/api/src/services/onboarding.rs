//! Onboarding signalers.

use async_trait::async_trait;
use domain::models::OnboardingRequest;
use domain::services::{OnboardingSignaler, SignalError};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::OnboardingConfig;

/// Builds the signaler selected by `onboarding.provider`.
pub fn build_onboarding_signaler(
    config: &OnboardingConfig,
) -> Result<Arc<dyn OnboardingSignaler>, reqwest::Error> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpOnboardingSignaler::new(config)?)),
        _ => Ok(Arc::new(LogOnboardingSignaler)),
    }
}

/// Records onboarding requests in the log only.
pub struct LogOnboardingSignaler;

#[async_trait]
impl OnboardingSignaler for LogOnboardingSignaler {
    async fn begin_onboarding(&self, request: &OnboardingRequest) -> Result<(), SignalError> {
        let roles: Vec<&str> = request.roles.iter().map(|r| r.as_str()).collect();
        info!(
            signal_id = %request.signal_id,
            user_id = %request.user_id,
            school_id = %request.school_id,
            invitation_id = %request.invitation_id,
            roles = ?roles,
            "[LOG ONBOARDING] begin onboarding"
        );
        Ok(())
    }
}

/// Posts onboarding requests to the profile service.
pub struct HttpOnboardingSignaler {
    client: Client,
    url: String,
}

impl HttpOnboardingSignaler {
    pub fn new(config: &OnboardingConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl OnboardingSignaler for HttpOnboardingSignaler {
    async fn begin_onboarding(&self, request: &OnboardingRequest) -> Result<(), SignalError> {
        let response = self
            .client
            .post(&self.url)
            // The signal id lets the receiver drop redelivered requests.
            .header("Idempotency-Key", request.signal_id.to_string())
            .json(request)
            .send()
            .await
            .map_err(|e| SignalError::Failed(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SignalError::Failed(format!(
                "onboarding service returned {}",
                response.status()
            )))
        }
    }
}
