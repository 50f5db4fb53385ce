pub mod memory;
pub mod user_store;

use crate::common::{FingerprintError, Result};
use crate::core::BiometricTemplate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use user_store::FileStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn generate() -> Self {
        Self(format!("user-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Privilege levels. Declared in ascending order so the derived `Ord` ranks
/// `Administrator` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessLevel {
    Guest,
    Operator,
    Supervisor,
    Administrator,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 4] = [
        AccessLevel::Administrator,
        AccessLevel::Supervisor,
        AccessLevel::Operator,
        AccessLevel::Guest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Administrator => "Administrator",
            AccessLevel::Supervisor => "Supervisor",
            AccessLevel::Operator => "Operator",
            AccessLevel::Guest => "Guest",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self> {
        AccessLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| FingerprintError::Config(format!("Unknown access level: {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub access_level: AccessLevel,
    pub fingerprint_id: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_access: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_administrator(&self) -> bool {
        self.access_level == AccessLevel::Administrator
    }
}

/// Profile data supplied when enrolling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub access_level: AccessLevel,
}

impl NewUser {
    pub fn new(name: impl Into<String>, username: impl Into<String>, access_level: AccessLevel) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            access_level,
        }
    }

    /// Builds the persisted record; the template is bound here and never
    /// replaced afterwards.
    pub fn into_record(self, template: BiometricTemplate) -> UserRecord {
        let user = User {
            id: UserId::generate(),
            name: self.name,
            username: self.username,
            access_level: self.access_level,
            fingerprint_id: template.fingerprint_id(),
            registered_at: Utc::now(),
            last_access: None,
        };
        UserRecord { user, template }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub username: Option<String>,
    pub access_level: Option<AccessLevel>,
}

impl UserUpdate {
    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(level) = self.access_level {
            user.access_level = level;
        }
    }
}

/// A user together with the enrolled template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user: User,
    pub template: BiometricTemplate,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, profile: NewUser, template: BiometricTemplate) -> Result<UserId>;

    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<UserRecord>>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Returns `false` when no such user exists.
    async fn update_user(&self, id: &UserId, update: UserUpdate) -> Result<bool>;

    async fn delete_user(&self, id: &UserId) -> Result<bool>;

    async fn update_last_access(&self, id: &UserId) -> Result<()>;

    async fn list_users(&self) -> Result<Vec<User>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_levels_are_ordered_by_privilege() {
        assert!(AccessLevel::Administrator > AccessLevel::Supervisor);
        assert!(AccessLevel::Supervisor > AccessLevel::Operator);
        assert!(AccessLevel::Operator > AccessLevel::Guest);
    }

    #[test]
    fn access_level_parses_case_insensitively() {
        assert_eq!("administrator".parse::<AccessLevel>().unwrap(), AccessLevel::Administrator);
        assert_eq!("Guest".parse::<AccessLevel>().unwrap(), AccessLevel::Guest);
        assert!("root".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn update_touches_only_given_fields() {
        let template = BiometricTemplate::new(vec![3; crate::core::TEMPLATE_LEN], 80).unwrap();
        let mut user = NewUser::new("Ana", "ana", AccessLevel::Operator)
            .into_record(template)
            .user;

        UserUpdate {
            access_level: Some(AccessLevel::Supervisor),
            ..Default::default()
        }
        .apply(&mut user);

        assert_eq!(user.access_level, AccessLevel::Supervisor);
        assert_eq!(user.name, "Ana");
        assert_eq!(user.username, "ana");
    }
}
