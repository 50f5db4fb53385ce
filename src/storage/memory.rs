use crate::common::{FingerprintError, Result};
use crate::core::BiometricTemplate;
use crate::storage::{AccessLevel, NewUser, Store, User, UserId, UserRecord, UserUpdate};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Store kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding a single administrator, so approvals are possible
    /// before anyone has enrolled.
    pub fn with_bootstrap_admin(
        name: impl Into<String>,
        username: impl Into<String>,
        template: BiometricTemplate,
    ) -> Self {
        let record = NewUser::new(name, username, AccessLevel::Administrator).into_record(template);
        tracing::info!("Seeded administrator '{}'", record.user.username);

        let mut users = HashMap::new();
        users.insert(record.user.id.clone(), record);
        Self {
            users: RwLock::new(users),
        }
    }

    /// Inserts an already-built record, e.g. a bootstrap administrator.
    pub async fn insert(&self, record: UserRecord) -> Result<UserId> {
        let mut users = self.users.write().await;
        if users.values().any(|r| r.user.username == record.user.username) {
            return Err(FingerprintError::UsernameTaken(record.user.username));
        }
        let id = record.user.id.clone();
        users.insert(id.clone(), record);
        Ok(id)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, profile: NewUser, template: BiometricTemplate) -> Result<UserId> {
        let id = self.insert(profile.into_record(template)).await?;
        tracing::info!("Created user {}", id);
        Ok(id)
    }

    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|r| r.user.username == username)
            .cloned())
    }

    async fn update_user(&self, id: &UserId, update: UserUpdate) -> Result<bool> {
        let mut users = self.users.write().await;

        if let Some(username) = &update.username {
            if users.values().any(|r| &r.user.username == username && &r.user.id != id) {
                return Err(FingerprintError::UsernameTaken(username.clone()));
            }
        }

        match users.get_mut(id) {
            Some(record) => {
                update.apply(&mut record.user);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_user(&self, id: &UserId) -> Result<bool> {
        Ok(self.users.write().await.remove(id).is_some())
    }

    async fn update_last_access(&self, id: &UserId) -> Result<()> {
        if let Some(record) = self.users.write().await.get_mut(id) {
            record.user.last_access = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .map(|r| r.user.clone())
            .collect();
        users.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }
}
