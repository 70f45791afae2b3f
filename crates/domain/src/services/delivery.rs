//! Delivery tracking.
//!
//! Hands invitations to the mail collaborator, records each outcome on the
//! invitation, and schedules retries with capped exponential backoff.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::state_machine::InvitationStateMachine;
use super::store::{InvitationStore, StatusAdvance};
use crate::errors::InvitationError;
use crate::metrics;
use crate::models::{
    DeliveryResult, DeliveryStatus, DeliveryUpdate, Invitation, InvitationStatus, MailContext,
    RetryPolicy,
};

/// Template used for invitation mail.
pub const DEFAULT_TEMPLATE_ID: &str = "school_invitation";

/// Error raised by a mail transport before the provider reported an outcome.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail transport error: {0}")]
    Transport(String),

    #[error("Mail provider returned status {status}")]
    Provider { status: u16 },
}

/// Mail collaborator. Rendering and transport happen on the other side.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        context: &MailContext,
    ) -> Result<DeliveryStatus, MailError>;
}

/// A message captured by [`MockMailTransport`].
#[derive(Debug, Clone)]
pub struct SentMail {
    pub recipient: String,
    pub template_id: String,
    pub context: MailContext,
}

/// Mock mail transport for development and testing.
///
/// Replies with scripted outcomes in order, then with the default outcome.
pub struct MockMailTransport {
    default_outcome: DeliveryStatus,
    scripted: Mutex<VecDeque<DeliveryStatus>>,
    sent: Mutex<Vec<SentMail>>,
}

impl Default for MockMailTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMailTransport {
    pub fn new() -> Self {
        Self::with_default(DeliveryStatus::Queued)
    }

    pub fn with_default(default_outcome: DeliveryStatus) -> Self {
        Self {
            default_outcome,
            scripted: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queues outcomes returned before falling back to the default.
    pub fn script(&self, outcomes: impl IntoIterator<Item = DeliveryStatus>) {
        self.scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(outcomes);
    }

    /// Messages handed to this transport so far.
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MailTransport for MockMailTransport {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        context: &MailContext,
    ) -> Result<DeliveryStatus, MailError> {
        let outcome = self
            .scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(self.default_outcome);

        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentMail {
                recipient: recipient.to_string(),
                template_id: template_id.to_string(),
                context: context.clone(),
            });

        tracing::debug!(
            invitation_id = %context.invitation_id,
            outcome = %outcome,
            "Mock: Would send invitation mail"
        );
        Ok(outcome)
    }
}

/// Records dispatch attempts and manages retry scheduling.
pub struct DeliveryTracker {
    store: Arc<dyn InvitationStore>,
    transport: Arc<dyn MailTransport>,
    policy: RetryPolicy,
    template_id: String,
    invite_base_url: String,
}

impl DeliveryTracker {
    pub fn new(
        store: Arc<dyn InvitationStore>,
        transport: Arc<dyn MailTransport>,
        policy: RetryPolicy,
        invite_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
            invite_base_url: invite_base_url.into(),
        }
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = template_id.into();
        self
    }

    /// Link the recipient follows to respond.
    pub fn invite_url(&self, token: &str) -> String {
        format!(
            "{}/invitations/{}",
            self.invite_base_url.trim_end_matches('/'),
            token
        )
    }

    fn cached(invitation: &Invitation) -> Option<DeliveryResult> {
        invitation.delivery_status.map(|status| DeliveryResult {
            invitation_id: invitation.id,
            status,
            retry_count: invitation.retry_count,
            next_retry_at: invitation.next_retry_at,
            failed_permanently: invitation.delivery_failed_permanently,
            cached: true,
        })
    }

    /// Sends the invitation and records the outcome.
    ///
    /// Already-delivered invitations return their recorded result without a send.
    pub async fn dispatch(&self, invitation: &Invitation) -> Result<DeliveryResult, InvitationError> {
        if invitation.status.is_terminal() {
            return Err(InvitationStateMachine::terminal_error(invitation.status));
        }
        if invitation.delivery_status == Some(DeliveryStatus::Delivered) {
            if let Some(result) = Self::cached(invitation) {
                return Ok(result);
            }
        }
        if invitation.delivery_failed_permanently {
            return Err(InvitationError::DeliveryFailedPermanently);
        }

        let school = self
            .store
            .find_school(invitation.school_id)
            .await?
            .ok_or(InvitationError::SchoolNotFound)?;
        let context = MailContext {
            invitation_id: invitation.id,
            school_name: school.name,
            role: invitation.role,
            invite_url: self.invite_url(&invitation.token),
            expires_at: invitation.expires_at,
            message: invitation.message.clone(),
        };

        let (status, error) = match self
            .transport
            .send(&invitation.email, &self.template_id, &context)
            .await
        {
            Ok(status) => (status, None),
            Err(e) => {
                warn!(invitation_id = %invitation.id, error = %e, "Mail transport error");
                (DeliveryStatus::Failed, Some(e.to_string()))
            }
        };
        metrics::record_delivery_attempt(status.as_str());

        self.apply(invitation, status, error, Utc::now()).await
    }

    /// Clears failure state and dispatches again. Callers authorize first.
    pub async fn resend(&self, invitation: &Invitation) -> Result<DeliveryResult, InvitationError> {
        let reset = self
            .store
            .reset_delivery(invitation.id)
            .await?
            .ok_or(InvitationError::TokenInvalid)?;
        info!(invitation_id = %reset.id, "Resending invitation");
        self.dispatch(&reset).await
    }

    /// Applies an asynchronous status callback from the mail provider.
    ///
    /// Feedback that would move delivery backwards is ignored.
    pub async fn record_status(
        &self,
        invitation_id: Uuid,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<DeliveryResult, InvitationError> {
        let invitation = self
            .store
            .find_by_id(invitation_id)
            .await?
            .ok_or(InvitationError::TokenInvalid)?;

        let stale = match status {
            DeliveryStatus::Queued => invitation.delivery_status.is_some(),
            DeliveryStatus::Delivered => {
                invitation.delivery_status == Some(DeliveryStatus::Delivered)
            }
            DeliveryStatus::Failed => {
                invitation.delivery_status == Some(DeliveryStatus::Delivered)
                    || invitation.delivery_failed_permanently
            }
            DeliveryStatus::Bounced => invitation.delivery_failed_permanently,
        };
        if stale {
            if let Some(result) = Self::cached(&invitation) {
                return Ok(result);
            }
        }

        self.apply(&invitation, status, error, Utc::now()).await
    }

    /// Re-dispatches invitations whose retry is due. Returns the number attempted.
    pub async fn retry_due(&self, limit: i64) -> Result<usize, InvitationError> {
        let due = self.store.due_for_retry(Utc::now(), limit).await?;
        let mut attempted = 0;
        for invitation in &due {
            attempted += 1;
            if let Err(e) = self.dispatch(invitation).await {
                warn!(
                    invitation_id = %invitation.id,
                    error = %e,
                    "Delivery retry failed"
                );
            }
        }
        Ok(attempted)
    }

    /// Delivery fields after `status` is observed for `invitation`.
    pub fn next_update(
        &self,
        invitation: &Invitation,
        status: DeliveryStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> DeliveryUpdate {
        match status {
            DeliveryStatus::Queued | DeliveryStatus::Delivered => DeliveryUpdate {
                delivery_status: status,
                retry_count: invitation.retry_count,
                next_retry_at: None,
                last_error: None,
                failed_permanently: false,
            },
            DeliveryStatus::Bounced => DeliveryUpdate {
                delivery_status: status,
                retry_count: invitation.retry_count,
                next_retry_at: None,
                last_error: Some(error.unwrap_or_else(|| "Recipient address bounced".to_string())),
                failed_permanently: true,
            },
            DeliveryStatus::Failed => {
                let attempts = invitation.retry_count + 1;
                let exhausted = self.policy.is_exhausted(attempts);
                DeliveryUpdate {
                    delivery_status: status,
                    retry_count: attempts,
                    next_retry_at: (!exhausted).then(|| now + self.policy.backoff(attempts)),
                    last_error: Some(error.unwrap_or_else(|| "Delivery failed".to_string())),
                    failed_permanently: exhausted,
                }
            }
        }
    }

    async fn apply(
        &self,
        invitation: &Invitation,
        status: DeliveryStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DeliveryResult, InvitationError> {
        let update = self.next_update(invitation, status, error, now);
        let advance: Option<StatusAdvance> = match status {
            DeliveryStatus::Queued => {
                InvitationStateMachine::forward(invitation.status, InvitationStatus::Sent)
            }
            DeliveryStatus::Delivered => {
                InvitationStateMachine::forward(invitation.status, InvitationStatus::Delivered)
            }
            DeliveryStatus::Bounced | DeliveryStatus::Failed => None,
        };

        let updated = self
            .store
            .record_delivery(invitation.id, &update, advance.as_ref())
            .await?
            .ok_or(InvitationError::TokenInvalid)?;

        if updated.delivery_failed_permanently {
            warn!(
                invitation_id = %updated.id,
                school_id = %updated.school_id,
                retry_count = updated.retry_count,
                "Invitation delivery failed permanently"
            );
        } else {
            info!(
                invitation_id = %updated.id,
                delivery_status = %status,
                retry_count = updated.retry_count,
                "Invitation delivery recorded"
            );
        }

        Ok(DeliveryResult {
            invitation_id: updated.id,
            status,
            retry_count: updated.retry_count,
            next_retry_at: updated.next_retry_at,
            failed_permanently: updated.delivery_failed_permanently,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvitationRole, NewInvitation, School};
    use crate::services::memory::InMemoryInvitationStore;
    use chrono::Duration;

    struct Fixture {
        store: Arc<InMemoryInvitationStore>,
        transport: Arc<MockMailTransport>,
        tracker: DeliveryTracker,
    }

    fn fixture(default_outcome: DeliveryStatus) -> Fixture {
        let store = Arc::new(InMemoryInvitationStore::new());
        let transport = Arc::new(MockMailTransport::with_default(default_outcome));
        let tracker = DeliveryTracker::new(
            store.clone(),
            transport.clone(),
            RetryPolicy::default(),
            "https://tutors.example.com/",
        );
        Fixture {
            store,
            transport,
            tracker,
        }
    }

    async fn seed(store: &InMemoryInvitationStore) -> Invitation {
        let school = School {
            id: Uuid::new_v4(),
            name: "School A".to_string(),
        };
        store.seed_school(school.clone());
        let new = NewInvitation {
            email: "teacher@example.com".to_string(),
            school_id: school.id,
            role: InvitationRole::Teacher,
            invited_by: Uuid::new_v4(),
            message: Some("Join us".to_string()),
            batch_id: None,
            expires_at: Utc::now() + Duration::days(7),
        };
        store
            .insert_invitation(&new.with_token(shared::crypto::generate_invitation_token(), Utc::now()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_queued_dispatch_marks_sent() {
        let f = fixture(DeliveryStatus::Queued);
        let inv = seed(&f.store).await;

        let result = f.tracker.dispatch(&inv).await.unwrap();
        assert_eq!(result.status, DeliveryStatus::Queued);
        assert!(!result.cached);

        let stored = f.store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Sent);
        assert_eq!(stored.delivery_status, Some(DeliveryStatus::Queued));

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "teacher@example.com");
        assert_eq!(sent[0].context.school_name, "School A");
        assert_eq!(
            sent[0].context.invite_url,
            format!("https://tutors.example.com/invitations/{}", inv.token)
        );
    }

    #[tokio::test]
    async fn test_dispatch_of_delivered_is_cached_noop() {
        let f = fixture(DeliveryStatus::Delivered);
        let inv = seed(&f.store).await;

        f.tracker.dispatch(&inv).await.unwrap();
        let delivered = f.store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(delivered.status, InvitationStatus::Delivered);

        let again = f.tracker.dispatch(&delivered).await.unwrap();
        assert!(again.cached);
        assert_eq!(again.status, DeliveryStatus::Delivered);
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_schedules_backoff() {
        let f = fixture(DeliveryStatus::Failed);
        let inv = seed(&f.store).await;

        let before = Utc::now();
        let first = f.tracker.dispatch(&inv).await.unwrap();
        assert_eq!(first.retry_count, 1);
        assert!(!first.failed_permanently);
        let next = first.next_retry_at.unwrap();
        assert!(next >= before + Duration::seconds(60));
        assert!(next <= Utc::now() + Duration::seconds(60));

        let current = f.store.find_by_id(inv.id).await.unwrap().unwrap();
        let second = f.tracker.dispatch(&current).await.unwrap();
        assert_eq!(second.retry_count, 2);
        assert!(second.next_retry_at.unwrap() >= before + Duration::seconds(120));
        assert_eq!(current.status, InvitationStatus::Pending);
    }

    #[tokio::test]
    async fn test_exhausted_retries_flag_permanent_failure() {
        let f = fixture(DeliveryStatus::Failed);
        let inv = seed(&f.store).await;

        let mut last = None;
        for _ in 0..5 {
            let current = f.store.find_by_id(inv.id).await.unwrap().unwrap();
            last = Some(f.tracker.dispatch(&current).await.unwrap());
        }
        let last = last.unwrap();
        assert!(last.failed_permanently);
        assert!(last.next_retry_at.is_none());

        let current = f.store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(current.status, InvitationStatus::Pending);
        assert!(matches!(
            f.tracker.dispatch(&current).await,
            Err(InvitationError::DeliveryFailedPermanently)
        ));
    }

    #[tokio::test]
    async fn test_bounce_is_permanent_and_resend_clears_it() {
        let f = fixture(DeliveryStatus::Queued);
        f.transport.script([DeliveryStatus::Bounced]);
        let inv = seed(&f.store).await;

        let bounced = f.tracker.dispatch(&inv).await.unwrap();
        assert!(bounced.failed_permanently);

        let current = f.store.find_by_id(inv.id).await.unwrap().unwrap();
        let resent = f.tracker.resend(&current).await.unwrap();
        assert!(!resent.failed_permanently);
        assert_eq!(resent.status, DeliveryStatus::Queued);
        assert_eq!(resent.retry_count, 0);
    }

    #[tokio::test]
    async fn test_out_of_order_callbacks_are_ignored() {
        let f = fixture(DeliveryStatus::Queued);
        let inv = seed(&f.store).await;
        f.tracker.dispatch(&inv).await.unwrap();

        let delivered = f
            .tracker
            .record_status(inv.id, DeliveryStatus::Delivered, None)
            .await
            .unwrap();
        assert!(!delivered.cached);

        let late_queued = f
            .tracker
            .record_status(inv.id, DeliveryStatus::Queued, None)
            .await
            .unwrap();
        assert!(late_queued.cached);
        assert_eq!(late_queued.status, DeliveryStatus::Delivered);

        let stored = f.store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Delivered);
    }

    #[tokio::test]
    async fn test_delivery_feedback_does_not_regress_viewed() {
        let f = fixture(DeliveryStatus::Queued);
        let inv = seed(&f.store).await;
        InvitationStateMachine::new(f.store.clone())
            .mark_viewed(&inv, Utc::now())
            .await
            .unwrap();

        f.tracker
            .record_status(inv.id, DeliveryStatus::Delivered, None)
            .await
            .unwrap();
        let stored = f.store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Viewed);
        assert_eq!(stored.delivery_status, Some(DeliveryStatus::Delivered));
    }

    #[tokio::test]
    async fn test_retry_due_redispatches() {
        let f = fixture(DeliveryStatus::Queued);
        f.transport.script([DeliveryStatus::Failed]);
        let inv = seed(&f.store).await;
        f.tracker.dispatch(&inv).await.unwrap();

        assert_eq!(f.tracker.retry_due(10).await.unwrap(), 0);

        f.store.force_retry_due(inv.id);
        assert_eq!(f.tracker.retry_due(10).await.unwrap(), 1);
        let stored = f.store.find_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, Some(DeliveryStatus::Queued));
        assert!(stored.next_retry_at.is_none());
    }
}
