//! Second, administrator-scoped verification in front of a protected
//! operation.
//!
//! ```text
//! Initial ──primary scan ok──► PendingAdminVerification ──admin match──► Completed
//!                                   │        ▲
//!                                   └─fail───┘ (until max_admin_attempts) ──► Rejected
//! ```
//!
//! Failed administrator scans never resolve to `Completed` on their own; once
//! the attempt budget is spent the gate is `Rejected` for good. A completed
//! gate is spent by [`AdminEscalationGate::execute`].

use crate::common::config::Config;
use crate::common::{FingerprintError, Result};
use crate::core::attempts::AttemptTracker;
use crate::core::auth::AuthenticationOrchestrator;
use crate::core::classifier::ErrorKind;
use crate::core::scan::{ScanOutcome, SessionRegistry};
use crate::storage::Store;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Initial,
    PendingAdminVerification,
    Completed,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    pub required_for_enrollment: bool,
    pub max_admin_attempts: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            required_for_enrollment: false,
            max_admin_attempts: 3,
        }
    }
}

impl EscalationPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            required_for_enrollment: config.escalation.require_admin_for_enrollment,
            max_admin_attempts: config.escalation.max_admin_attempts,
        }
    }
}

pub struct AdminEscalationGate {
    auth: Arc<AuthenticationOrchestrator>,
    store: Arc<dyn Store>,
    sessions: Arc<SessionRegistry>,
    policy: EscalationPolicy,
    state: GateState,
    admin_attempts: AttemptTracker,
    last_error: Option<ErrorKind>,
}

impl AdminEscalationGate {
    pub fn new(
        auth: Arc<AuthenticationOrchestrator>,
        store: Arc<dyn Store>,
        sessions: Arc<SessionRegistry>,
        policy: EscalationPolicy,
    ) -> Self {
        Self {
            auth,
            store,
            sessions,
            policy,
            state: GateState::Initial,
            admin_attempts: AttemptTracker::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn admin_attempts(&self) -> u32 {
        self.admin_attempts.count()
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// Scans the primary subject. A successful capture moves the gate to
    /// `PendingAdminVerification`; a failure leaves it in `Initial`.
    pub async fn verify_primary(&mut self, subject: &str) -> Result<GateState> {
        if self.state != GateState::Initial {
            return Err(FingerprintError::InvalidTransition(format!(
                "primary verification is not valid in {:?}",
                self.state
            )));
        }

        let session = self.sessions.acquire(&format!("gate:{}", subject));
        session.reset();
        let outcome = session.run().await?;
        // the primary template is not kept
        session.reset();

        match outcome {
            ScanOutcome::Captured(_) => {
                info!("Primary scan for '{}' accepted, administrator verification required", subject);
                self.state = GateState::PendingAdminVerification;
                self.last_error = None;
            }
            ScanOutcome::Failed(err) => {
                warn!("Primary scan for '{}' failed: {}", subject, err);
                self.last_error = Some(err.kind);
            }
            ScanOutcome::Cancelled => {
                self.last_error = Some(ErrorKind::InternalError);
            }
        }
        Ok(self.state)
    }

    /// Authenticates `admin_username` against the stored administrator
    /// template.
    ///
    /// Unknown or non-administrator identities are refused without spending
    /// an attempt. A failed scan keeps the gate pending until
    /// `max_admin_attempts` is reached, at which point it is `Rejected`.
    pub async fn verify_admin(&mut self, admin_username: &str) -> Result<GateState> {
        if self.state != GateState::PendingAdminVerification {
            return Err(FingerprintError::InvalidTransition(format!(
                "administrator verification is not valid in {:?}",
                self.state
            )));
        }

        let admin = self
            .store
            .get_user_by_username(admin_username)
            .await?
            .ok_or_else(|| FingerprintError::UserNotFound(admin_username.to_string()))?;
        if !admin.user.is_administrator() {
            return Err(FingerprintError::InsufficientPrivilege(admin_username.to_string()));
        }

        let result = self.auth.authenticate(admin_username).await;
        if result.success {
            info!("Administrator '{}' approved the operation", admin_username);
            self.admin_attempts.reset();
            self.last_error = None;
            self.state = GateState::Completed;
            return Ok(self.state);
        }

        let attempts = self.admin_attempts.increment();
        self.last_error = result.error;
        if self.admin_attempts.should_escalate(self.policy.max_admin_attempts) {
            warn!(
                "Administrator verification rejected after {} failed attempts",
                attempts
            );
            self.state = GateState::Rejected;
        } else {
            warn!(
                "Administrator verification failed ({}/{})",
                attempts, self.policy.max_admin_attempts
            );
        }
        Ok(self.state)
    }

    /// Runs `operation` only once the gate is `Completed`.
    ///
    /// Consumes the gate: one approval authorizes exactly one operation.
    ///
    /// ```compile_fail
    /// # async fn twice(gate: fingergate::AdminEscalationGate) {
    /// let _ = gate.execute(async { Ok(1) }).await;
    /// let _ = gate.execute(async { Ok(2) }).await;
    /// # }
    /// ```
    pub async fn execute<T, F>(self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.state != GateState::Completed {
            return Err(FingerprintError::EscalationRequired);
        }
        operation.await
    }
}
