use crate::common::config::Config;
use crate::common::Result;
use crate::core::attempts::AttemptTracker;
use crate::core::classifier::{classify, ErrorKind};
use crate::core::scan::{ScanOutcome, ScanSession, SessionRegistry};
use crate::core::template::BiometricTemplate;
use crate::core::MATCH_SIMILARITY_THRESHOLD;
use crate::device::{Matcher, Similarity};
use crate::storage::{Store, User, UserRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

// tracker key for template-only identification
const IDENTIFY_SUBJECT: &str = "*identify";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticationResult {
    pub success: bool,
    pub user: Option<User>,
    pub error: Option<ErrorKind>,
    pub attempts: u32,
}

impl AuthenticationResult {
    fn granted(user: User) -> Self {
        Self {
            success: true,
            user: Some(user),
            error: None,
            attempts: 0,
        }
    }

    fn denied(error: ErrorKind, attempts: u32) -> Self {
        Self {
            success: false,
            user: None,
            error: Some(error),
            attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub similarity_threshold: f32,
    pub escalation_threshold: u32,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: MATCH_SIMILARITY_THRESHOLD,
            escalation_threshold: 3,
        }
    }
}

impl AuthPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            similarity_threshold: config.matching.similarity_threshold,
            escalation_threshold: config.auth.escalation_threshold,
        }
    }
}

pub struct AuthenticationOrchestrator {
    matcher: Arc<dyn Matcher>,
    store: Arc<dyn Store>,
    sessions: Arc<SessionRegistry>,
    policy: AuthPolicy,
    attempts: Mutex<HashMap<String, AttemptTracker>>,
}

impl AuthenticationOrchestrator {
    pub fn new(
        matcher: Arc<dyn Matcher>,
        store: Arc<dyn Store>,
        sessions: Arc<SessionRegistry>,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            matcher,
            store,
            sessions,
            policy,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_for(&self, username: &str) -> ScanSession {
        self.sessions.acquire(&format!("auth:{}", username))
    }

    /// Verifies that the finger on the scanner belongs to `username`.
    ///
    /// Never returns an error: every failure is reported through
    /// [`AuthenticationResult::error`]. Unknown users do not count as failed
    /// attempts.
    pub async fn authenticate(&self, username: &str) -> AuthenticationResult {
        let record = match self.store.get_user_by_username(username).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!("Authentication requested for unknown user '{}'", username);
                return AuthenticationResult::denied(ErrorKind::UserNotFound, self.attempts_for(username));
            }
            Err(e) => {
                error!("User lookup for '{}' failed: {}", username, e);
                return AuthenticationResult::denied(ErrorKind::InternalError, self.attempts_for(username));
            }
        };

        let captured = match self.capture(username).await {
            Ok(template) => template,
            Err(denied) => return denied,
        };

        match self.compare(&record, &captured).await {
            Ok(similarity) if similarity.exceeds(self.policy.similarity_threshold) => {
                if let Err(e) = self.store.update_last_access(&record.user.id).await {
                    error!("Failed to record access for '{}': {}", username, e);
                    return AuthenticationResult::denied(ErrorKind::InternalError, self.attempts_for(username));
                }
                self.reset_attempts(username);
                info!("✓ Authentication successful for '{}' (similarity {:.3})", username, similarity.score());
                AuthenticationResult::granted(record.user)
            }
            Ok(similarity) => {
                let attempts = self.record_failure(username);
                warn!(
                    "✗ Fingerprint did not match '{}' (similarity {:.3}, attempt {})",
                    username,
                    similarity.score(),
                    attempts
                );
                AuthenticationResult::denied(ErrorKind::ReadFailure, attempts)
            }
            Err(e) => {
                error!("Template comparison for '{}' failed: {}", username, e);
                AuthenticationResult::denied(ErrorKind::InternalError, self.attempts_for(username))
            }
        }
    }

    /// Captures once and searches every enrolled user for a match.
    pub async fn identify(&self) -> AuthenticationResult {
        let users = match self.store.list_users().await {
            Ok(users) => users,
            Err(e) => {
                error!("Listing users failed: {}", e);
                return AuthenticationResult::denied(ErrorKind::InternalError, self.attempts_for(IDENTIFY_SUBJECT));
            }
        };

        let captured = match self.capture(IDENTIFY_SUBJECT).await {
            Ok(template) => template,
            Err(denied) => return denied,
        };

        for user in users {
            let record = match self.store.get_user_by_id(&user.id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    error!("Loading user {} failed: {}", user.id, e);
                    return AuthenticationResult::denied(ErrorKind::InternalError, self.attempts_for(IDENTIFY_SUBJECT));
                }
            };

            match self.compare(&record, &captured).await {
                Ok(similarity) if similarity.exceeds(self.policy.similarity_threshold) => {
                    if let Err(e) = self.store.update_last_access(&record.user.id).await {
                        error!("Failed to record access for {}: {}", record.user.id, e);
                        return AuthenticationResult::denied(ErrorKind::InternalError, self.attempts_for(IDENTIFY_SUBJECT));
                    }
                    self.reset_attempts(IDENTIFY_SUBJECT);
                    info!("Identified user '{}'", record.user.username);
                    return AuthenticationResult::granted(record.user);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Template comparison failed: {}", e);
                    return AuthenticationResult::denied(ErrorKind::InternalError, self.attempts_for(IDENTIFY_SUBJECT));
                }
            }
        }

        let attempts = self.record_failure(IDENTIFY_SUBJECT);
        AuthenticationResult::denied(ErrorKind::ReadFailure, attempts)
    }

    pub fn attempts_for(&self, username: &str) -> u32 {
        self.trackers()
            .get(username)
            .map(AttemptTracker::count)
            .unwrap_or(0)
    }

    /// Whether `username` has failed often enough to require escalation.
    pub fn requires_escalation(&self, username: &str) -> bool {
        self.trackers()
            .get(username)
            .is_some_and(|t| t.should_escalate(self.policy.escalation_threshold))
    }

    /// Explicit abandonment of `username`'s authentication.
    pub fn reset_attempts(&self, username: &str) {
        self.trackers().remove(username);
    }

    fn trackers(&self) -> std::sync::MutexGuard<'_, HashMap<String, AttemptTracker>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_failure(&self, username: &str) -> u32 {
        self.trackers()
            .entry(username.to_string())
            .or_default()
            .increment()
    }

    async fn capture(&self, subject: &str) -> std::result::Result<BiometricTemplate, AuthenticationResult> {
        let session = self.session_for(subject);
        session.reset();

        match session.run().await {
            Ok(ScanOutcome::Captured(template)) => Ok(template),
            Ok(ScanOutcome::Failed(err)) if err.kind.counts_as_attempt() => {
                let attempts = self.record_failure(subject);
                warn!("Capture for '{}' failed ({}), attempt {}", subject, err.kind, attempts);
                Err(AuthenticationResult::denied(err.kind, attempts))
            }
            Ok(ScanOutcome::Failed(err)) => {
                error!("Capture for '{}' failed: {}", subject, err);
                Err(AuthenticationResult::denied(err.kind, self.attempts_for(subject)))
            }
            Ok(ScanOutcome::Cancelled) => {
                warn!("Capture for '{}' was superseded", subject);
                Err(AuthenticationResult::denied(ErrorKind::InternalError, self.attempts_for(subject)))
            }
            Err(e) => {
                error!("Could not start scan for '{}': {}", subject, e);
                Err(AuthenticationResult::denied(classify(&e), self.attempts_for(subject)))
            }
        }
    }

    async fn compare(&self, record: &UserRecord, captured: &BiometricTemplate) -> Result<Similarity> {
        self.matcher
            .compare(record.template.as_bytes(), captured.as_bytes())
            .await
    }
}
