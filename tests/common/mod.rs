#![allow(dead_code)]

use async_trait::async_trait;
use fingergate::core::{
    AuthPolicy, AuthenticationOrchestrator, BiometricTemplate, EnrollmentOrchestrator,
    EnrollmentPolicy, ScanSettings, SessionRegistry, TEMPLATE_LEN,
};
use fingergate::device::ScriptedMatcher;
use fingergate::storage::{
    AccessLevel, MemoryStore, NewUser, Store, User, UserId, UserRecord, UserUpdate,
};
use fingergate::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Store wrapper that counts `create_user` calls.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    creates: AtomicUsize,
}

impl CountingStore {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub async fn seed(&self, name: &str, username: &str, level: AccessLevel) -> UserId {
        let template = BiometricTemplate::new(vec![0xEE; TEMPLATE_LEN], 90).unwrap();
        self.inner
            .insert(NewUser::new(name, username, level).into_record(template))
            .await
            .unwrap()
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn create_user(&self, profile: NewUser, template: BiometricTemplate) -> Result<UserId> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_user(profile, template).await
    }

    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<UserRecord>> {
        self.inner.get_user_by_id(id).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.inner.get_user_by_username(username).await
    }

    async fn update_user(&self, id: &UserId, update: UserUpdate) -> Result<bool> {
        self.inner.update_user(id, update).await
    }

    async fn delete_user(&self, id: &UserId) -> Result<bool> {
        self.inner.delete_user(id).await
    }

    async fn update_last_access(&self, id: &UserId) -> Result<()> {
        self.inner.update_last_access(id).await
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.inner.list_users().await
    }
}

pub struct Harness {
    pub matcher: Arc<ScriptedMatcher>,
    pub store: Arc<CountingStore>,
    pub sessions: Arc<SessionRegistry>,
}

impl Harness {
    pub fn new(matcher: ScriptedMatcher) -> Self {
        let matcher = Arc::new(matcher);
        let sessions = Arc::new(SessionRegistry::new(matcher.clone(), ScanSettings::default()));
        Self {
            matcher,
            store: Arc::new(CountingStore::default()),
            sessions,
        }
    }

    pub fn enrollment(&self, max_attempts: u32) -> EnrollmentOrchestrator {
        EnrollmentOrchestrator::new(
            self.matcher.clone(),
            self.store.clone(),
            self.sessions.clone(),
            EnrollmentPolicy {
                max_attempts,
                ..EnrollmentPolicy::default()
            },
        )
    }

    pub fn auth(&self) -> AuthenticationOrchestrator {
        AuthenticationOrchestrator::new(
            self.matcher.clone(),
            self.store.clone(),
            self.sessions.clone(),
            AuthPolicy::default(),
        )
    }
}
