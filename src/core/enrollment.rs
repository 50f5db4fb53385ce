//! Two-phase enrollment: capture a candidate, confirm it with a second read
//! of the same finger, then commit exactly one user record.

use crate::common::config::Config;
use crate::common::{FingerprintError, Result};
use crate::core::attempts::AttemptTracker;
use crate::core::classifier::{classify, ErrorKind};
use crate::core::scan::{ScanOutcome, ScanSession, SessionRegistry};
use crate::core::template::BiometricTemplate;
use crate::core::{ENROLLMENT_ACCEPT_QUALITY, MATCH_SIMILARITY_THRESHOLD};
use crate::device::Matcher;
use crate::storage::{NewUser, Store, UserId};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EnrollmentPolicy {
    pub accept_quality: u8,
    pub similarity_threshold: f32,
    pub max_attempts: u32,
}

impl Default for EnrollmentPolicy {
    fn default() -> Self {
        Self {
            accept_quality: ENROLLMENT_ACCEPT_QUALITY,
            similarity_threshold: MATCH_SIMILARITY_THRESHOLD,
            max_attempts: 5,
        }
    }
}

impl EnrollmentPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            accept_quality: config.quality.enrollment_accept_quality,
            similarity_threshold: config.matching.similarity_threshold,
            max_attempts: config.enrollment.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentPhase {
    Idle,
    /// Phase 1; `attempt` is 1-based. `rejected` is why the previous attempt
    /// failed, if there was one.
    Capturing {
        attempt: u32,
        rejected: Option<ErrorKind>,
    },
    /// Phase 2, with the quality of the pending candidate.
    Confirming { candidate_quality: u8 },
    Committed(UserId),
    Aborted(ErrorKind),
}

/// Candidate awaiting confirmation. Dropped on mismatch, consumed on commit.
struct EnrollmentRecord {
    candidate: BiometricTemplate,
    confirmed: bool,
}

impl EnrollmentRecord {
    fn new(candidate: BiometricTemplate) -> Self {
        Self {
            candidate,
            confirmed: false,
        }
    }

    fn confirm(mut self) -> Self {
        self.confirmed = true;
        self
    }

    fn into_template(self) -> Option<BiometricTemplate> {
        self.confirmed.then_some(self.candidate)
    }
}

pub struct EnrollmentOrchestrator {
    matcher: Arc<dyn Matcher>,
    store: Arc<dyn Store>,
    sessions: Arc<SessionRegistry>,
    policy: EnrollmentPolicy,
    phase_tx: watch::Sender<EnrollmentPhase>,
}

impl EnrollmentOrchestrator {
    pub fn new(
        matcher: Arc<dyn Matcher>,
        store: Arc<dyn Store>,
        sessions: Arc<SessionRegistry>,
        policy: EnrollmentPolicy,
    ) -> Self {
        let (phase_tx, _) = watch::channel(EnrollmentPhase::Idle);
        Self {
            matcher,
            store,
            sessions,
            policy,
            phase_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<EnrollmentPhase> {
        self.phase_tx.subscribe()
    }

    pub fn phase(&self) -> EnrollmentPhase {
        self.phase_tx.borrow().clone()
    }

    /// Scan session used for `username`'s enrollment, e.g. to watch progress.
    pub fn session_for(&self, username: &str) -> ScanSession {
        self.sessions.acquire(&format!("enroll:{}", username))
    }

    /// Runs the whole protocol and returns the id of the committed user.
    ///
    /// Fails with `EnrollmentAborted` once `max_attempts` logical attempts
    /// have failed. Nothing is written to the store unless the candidate was
    /// confirmed.
    pub async fn enroll(&self, profile: NewUser) -> Result<UserId> {
        if self.store.get_user_by_username(&profile.username).await?.is_some() {
            return Err(FingerprintError::UsernameTaken(profile.username));
        }

        info!("Starting enrollment for '{}'", profile.username);
        let session = self.session_for(&profile.username);
        let mut attempts = AttemptTracker::new();

        let result = self.run_phases(&session, &profile, &mut attempts).await;
        // never leave the session scanning behind us
        session.reset();

        match &result {
            Ok(id) => {
                info!("Enrollment for '{}' committed as {}", profile.username, id);
                self.phase_tx.send_replace(EnrollmentPhase::Committed(id.clone()));
            }
            Err(err) => {
                warn!("Enrollment for '{}' aborted: {}", profile.username, err);
                self.phase_tx.send_replace(EnrollmentPhase::Aborted(classify(err)));
            }
        }
        result
    }

    async fn run_phases(
        &self,
        session: &ScanSession,
        profile: &NewUser,
        attempts: &mut AttemptTracker,
    ) -> Result<UserId> {
        let mut rejected = None;
        loop {
            if attempts.should_escalate(self.policy.max_attempts) {
                return Err(FingerprintError::EnrollmentAborted {
                    attempts: attempts.count(),
                });
            }

            // Phase 1: candidate
            self.phase_tx.send_replace(EnrollmentPhase::Capturing {
                attempt: attempts.count() + 1,
                rejected: rejected.take(),
            });
            let candidate = match self.capture(session).await? {
                Ok(candidate) => candidate,
                Err(kind) => {
                    rejected = Some(kind);
                    attempts.increment();
                    continue;
                }
            };
            if candidate.quality() < self.policy.accept_quality {
                warn!(
                    "Candidate quality {} below enrollment minimum {}",
                    candidate.quality(),
                    self.policy.accept_quality
                );
                rejected = Some(ErrorKind::PoorQuality);
                attempts.increment();
                continue;
            }
            let record = EnrollmentRecord::new(candidate);

            // Phase 2: confirmation
            self.phase_tx.send_replace(EnrollmentPhase::Confirming {
                candidate_quality: record.candidate.quality(),
            });
            let confirmation = match self.capture(session).await? {
                Ok(confirmation) => confirmation,
                Err(kind) => {
                    // candidate is recaptured, never reused
                    rejected = Some(kind);
                    attempts.increment();
                    continue;
                }
            };

            let similarity = self
                .matcher
                .compare(record.candidate.as_bytes(), confirmation.as_bytes())
                .await?;
            if !similarity.exceeds(self.policy.similarity_threshold) {
                info!(
                    "Confirmation did not match candidate (similarity {:.2}), restarting capture",
                    similarity.score()
                );
                rejected = Some(ErrorKind::ReadFailure);
                attempts.increment();
                continue;
            }

            let template = record
                .confirm()
                .into_template()
                .ok_or_else(|| FingerprintError::InvalidTransition("candidate not confirmed".into()))?;
            return self.store.create_user(profile.clone(), template).await;
        }
    }

    /// One scan. Retryable failures come back as `Ok(Err(kind))`; errors
    /// that should end the enrollment are returned as `Err`.
    async fn capture(
        &self,
        session: &ScanSession,
    ) -> Result<std::result::Result<BiometricTemplate, ErrorKind>> {
        session.reset();
        match session.run().await? {
            ScanOutcome::Captured(template) => Ok(Ok(template)),
            ScanOutcome::Failed(err) if err.kind.is_retryable() => {
                warn!("Enrollment capture failed: {}", err);
                Ok(Err(err.kind))
            }
            ScanOutcome::Failed(err) => Err(err.into_error()),
            ScanOutcome::Cancelled => Err(FingerprintError::Cancelled),
        }
    }
}
