//! In-memory store.
//!
//! Implements [`InvitationStore`] and [`OnboardingOutbox`] behind one mutex so
//! every operation is atomic, mirroring the guarantees of the PostgreSQL
//! repositories. Used by tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::store::{
    AcceptInvitation, AcceptOutcome, InvitationStore, ListPosition, OnboardingOutbox, Response,
    StatusAdvance, ACTIVE_INVITATION_CONSTRAINT, INVITATION_TOKEN_CONSTRAINT,
};
use crate::errors::StoreError;
use crate::models::{
    BatchCounts, DeliveryStatus, DeliveryUpdate, Invitation, InvitationBatch, InvitationRole,
    InvitationStatus, MembershipRole, OnboardingSignal, School, SchoolMembership,
};

#[derive(Default)]
struct State {
    schools: HashMap<Uuid, School>,
    memberships: Vec<SchoolMembership>,
    invitations: Vec<Invitation>,
    batches: HashMap<Uuid, InvitationBatch>,
    signals: Vec<OnboardingSignal>,
    injected_token_collisions: u32,
    fail_next_accept: bool,
}

impl State {
    fn invitation_mut(&mut self, id: Uuid) -> Option<&mut Invitation> {
        self.invitations.iter_mut().find(|inv| inv.id == id)
    }
}

#[derive(Default)]
pub struct InMemoryInvitationStore {
    state: Mutex<State>,
}

impl InMemoryInvitationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seed_school(&self, school: School) {
        self.lock().schools.insert(school.id, school);
    }

    /// Grants `user_id` the admin role at `school_id`.
    pub fn seed_admin(&self, school_id: Uuid, user_id: Uuid) {
        self.lock().memberships.push(SchoolMembership {
            id: Uuid::new_v4(),
            user_id,
            school_id,
            role: MembershipRole::Admin,
            source_invitation_id: None,
            granted_at: Utc::now(),
        });
    }

    /// Makes the next `n` inserts fail with a token collision.
    pub fn inject_token_collisions(&self, n: u32) {
        self.lock().injected_token_collisions = n;
    }

    /// Makes the next acceptance transaction fail after its guard passed.
    pub fn fail_next_accept(&self) {
        self.lock().fail_next_accept = true;
    }

    /// Moves an invitation's retry time into the past.
    pub fn force_retry_due(&self, id: Uuid) {
        if let Some(inv) = self.lock().invitation_mut(id) {
            inv.next_retry_at = Some(Utc::now() - Duration::seconds(1));
        }
    }

    /// Memberships held by `user_id` at `school_id`.
    pub fn memberships_of(&self, user_id: Uuid, school_id: Uuid) -> Vec<SchoolMembership> {
        self.lock()
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id && m.school_id == school_id)
            .cloned()
            .collect()
    }

    pub fn signals(&self) -> Vec<OnboardingSignal> {
        self.lock().signals.clone()
    }

    pub fn invitations(&self) -> Vec<Invitation> {
        self.lock().invitations.clone()
    }
}

fn same_tuple(inv: &Invitation, email: &str, school_id: Uuid, role: InvitationRole) -> bool {
    inv.email.eq_ignore_ascii_case(email) && inv.school_id == school_id && inv.role == role
}

#[async_trait]
impl InvitationStore for InMemoryInvitationStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_school(&self, school_id: Uuid) -> Result<Option<School>, StoreError> {
        Ok(self.lock().schools.get(&school_id).cloned())
    }

    async fn is_school_admin(&self, school_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock().memberships.iter().any(|m| {
            m.school_id == school_id && m.user_id == user_id && m.role == MembershipRole::Admin
        }))
    }

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<Invitation, StoreError> {
        let mut state = self.lock();
        if state.injected_token_collisions > 0 {
            state.injected_token_collisions -= 1;
            return Err(StoreError::UniqueViolation {
                constraint: INVITATION_TOKEN_CONSTRAINT.to_string(),
            });
        }
        if state.invitations.iter().any(|i| i.token == invitation.token) {
            return Err(StoreError::UniqueViolation {
                constraint: INVITATION_TOKEN_CONSTRAINT.to_string(),
            });
        }
        if state.invitations.iter().any(|i| {
            i.status.is_active()
                && same_tuple(i, &invitation.email, invitation.school_id, invitation.role)
        }) {
            return Err(StoreError::UniqueViolation {
                constraint: ACTIVE_INVITATION_CONSTRAINT.to_string(),
            });
        }
        state.invitations.push(invitation.clone());
        Ok(invitation.clone())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Invitation>, StoreError> {
        Ok(self
            .lock()
            .invitations
            .iter()
            .find(|i| i.token == token)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Invitation>, StoreError> {
        Ok(self.lock().invitations.iter().find(|i| i.id == id).cloned())
    }

    async fn find_active(
        &self,
        email: &str,
        school_id: Uuid,
        role: InvitationRole,
    ) -> Result<Option<Invitation>, StoreError> {
        Ok(self
            .lock()
            .invitations
            .iter()
            .find(|i| i.status.is_active() && same_tuple(i, email, school_id, role))
            .cloned())
    }

    async fn last_declined_at(
        &self,
        email: &str,
        school_id: Uuid,
        role: InvitationRole,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .lock()
            .invitations
            .iter()
            .filter(|i| {
                i.status == InvitationStatus::Declined && same_tuple(i, email, school_id, role)
            })
            .filter_map(|i| i.responded_at)
            .max())
    }

    async fn advance_status(
        &self,
        id: Uuid,
        advance: &StatusAdvance,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(inv) = state.invitation_mut(id) else {
            return Ok(false);
        };
        if !advance.from.contains(&inv.status) || inv.is_past_expiry(now) {
            return Ok(false);
        }
        inv.status = advance.to;
        if advance.to == InvitationStatus::Viewed && inv.viewed_at.is_none() {
            inv.viewed_at = Some(now);
        }
        Ok(true)
    }

    async fn mark_expired(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.invitation_mut(id) {
            Some(inv) if inv.status.is_active() => {
                inv.status = InvitationStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_overdue(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let mut expired = 0u64;
        for inv in state
            .invitations
            .iter_mut()
            .filter(|i| i.status.is_active() && i.is_past_expiry(now))
            .take(limit.max(0) as usize)
        {
            inv.status = InvitationStatus::Expired;
            expired += 1;
        }
        Ok(expired)
    }

    async fn respond(
        &self,
        id: Uuid,
        response: &Response,
        responded_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, StoreError> {
        let mut state = self.lock();
        let Some(inv) = state.invitation_mut(id) else {
            return Ok(None);
        };
        if !inv.is_open(now) {
            return Ok(None);
        }
        inv.status = response.status();
        inv.responded_at = Some(now);
        inv.responded_by = responded_by;
        match response {
            Response::Declined { reason } => inv.decline_reason = reason.clone(),
            Response::Cancelled { by } => inv.cancelled_by = Some(*by),
        }
        Ok(Some(inv.clone()))
    }

    async fn accept(&self, command: &AcceptInvitation) -> Result<AcceptOutcome, StoreError> {
        let mut state = self.lock();
        let open = state
            .invitations
            .iter()
            .any(|i| i.id == command.invitation_id && i.is_open(command.now));
        if !open {
            return Ok(AcceptOutcome::NotActive);
        }
        if state.fail_next_accept {
            state.fail_next_accept = false;
            return Err(StoreError::Database("injected failure".to_string()));
        }

        let mut memberships = Vec::with_capacity(command.roles.len());
        for role in &command.roles {
            let existing = state
                .memberships
                .iter()
                .find(|m| {
                    m.user_id == command.user_id
                        && m.school_id == command.school_id
                        && m.role == *role
                })
                .cloned();
            let membership = match existing {
                Some(m) => m,
                None => {
                    let m = SchoolMembership {
                        id: Uuid::new_v4(),
                        user_id: command.user_id,
                        school_id: command.school_id,
                        role: *role,
                        source_invitation_id: Some(command.invitation_id),
                        granted_at: command.now,
                    };
                    state.memberships.push(m.clone());
                    m
                }
            };
            memberships.push(membership);
        }

        state.signals.push(command.signal.clone());
        let Some(inv) = state.invitation_mut(command.invitation_id) else {
            return Ok(AcceptOutcome::NotActive);
        };
        inv.status = InvitationStatus::Accepted;
        inv.responded_at = Some(command.now);
        inv.responded_by = Some(command.user_id);

        Ok(AcceptOutcome::Accepted {
            invitation: inv.clone(),
            memberships,
            signal: command.signal.clone(),
        })
    }

    async fn record_delivery(
        &self,
        id: Uuid,
        update: &DeliveryUpdate,
        advance: Option<&StatusAdvance>,
    ) -> Result<Option<Invitation>, StoreError> {
        let mut state = self.lock();
        let Some(inv) = state.invitation_mut(id) else {
            return Ok(None);
        };
        inv.delivery_status = Some(update.delivery_status);
        inv.retry_count = update.retry_count;
        inv.next_retry_at = update.next_retry_at;
        inv.last_delivery_error = update.last_error.clone();
        inv.delivery_failed_permanently = update.failed_permanently;
        if let Some(advance) = advance {
            if advance.from.contains(&inv.status) {
                inv.status = advance.to;
            }
        }
        Ok(Some(inv.clone()))
    }

    async fn reset_delivery(&self, id: Uuid) -> Result<Option<Invitation>, StoreError> {
        let mut state = self.lock();
        let Some(inv) = state.invitation_mut(id) else {
            return Ok(None);
        };
        inv.delivery_status = None;
        inv.retry_count = 0;
        inv.next_retry_at = None;
        inv.last_delivery_error = None;
        inv.delivery_failed_permanently = false;
        Ok(Some(inv.clone()))
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invitation>, StoreError> {
        let mut due: Vec<Invitation> = self
            .lock()
            .invitations
            .iter()
            .filter(|i| {
                i.is_open(now)
                    && !i.delivery_failed_permanently
                    && i.delivery_status == Some(DeliveryStatus::Failed)
                    && i.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|i| i.next_retry_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn create_batch(&self, batch: &InvitationBatch) -> Result<InvitationBatch, StoreError> {
        self.lock().batches.insert(batch.id, batch.clone());
        Ok(batch.clone())
    }

    async fn find_batch(&self, id: Uuid) -> Result<Option<InvitationBatch>, StoreError> {
        Ok(self.lock().batches.get(&id).cloned())
    }

    async fn batch_counts(&self, batch_id: Uuid) -> Result<BatchCounts, StoreError> {
        let state = self.lock();
        let mut by_status: HashMap<InvitationStatus, i64> = HashMap::new();
        let mut failed = 0;
        for inv in state
            .invitations
            .iter()
            .filter(|i| i.batch_id == Some(batch_id))
        {
            *by_status.entry(inv.status).or_default() += 1;
            if inv.delivery_failed_permanently {
                failed += 1;
            }
        }
        let mut by_status: Vec<_> = by_status.into_iter().collect();
        by_status.sort();
        Ok(BatchCounts {
            by_status,
            delivery_failed_permanently: failed,
        })
    }

    async fn list_by_school(
        &self,
        school_id: Uuid,
        status: Option<InvitationStatus>,
        after: Option<ListPosition>,
        limit: i64,
    ) -> Result<Vec<Invitation>, StoreError> {
        let mut rows: Vec<Invitation> = self
            .lock()
            .invitations
            .iter()
            .filter(|i| i.school_id == school_id)
            .filter(|i| status.map_or(true, |s| i.status == s))
            .filter(|i| after.map_or(true, |p| (i.created_at, i.id) < (p.created_at, p.id)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl OnboardingOutbox for InMemoryInvitationStore {
    async fn pending_signals(&self, limit: i64) -> Result<Vec<OnboardingSignal>, StoreError> {
        let mut pending: Vec<_> = self
            .lock()
            .signals
            .iter()
            .filter(|s| s.dispatched_at.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|s| s.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.lock();
        let signal = state
            .signals
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound)?;
        signal.dispatched_at = Some(at);
        signal.attempts += 1;
        Ok(())
    }

    async fn record_dispatch_failure(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let signal = state
            .signals
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound)?;
        signal.attempts += 1;
        signal.last_error = Some(error.to_string());
        Ok(())
    }
}
