use crate::common::{DevMode, FingerprintError, Result};
use crate::core::BiometricTemplate;
use crate::storage::{NewUser, Store, User, UserId, UserRecord, UserUpdate};
use async_trait::async_trait;
use chrono::Utc;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const STORAGE_VERSION: u32 = 1;
const FILE_EXTENSION: &str = "bincode";

#[derive(Serialize, Deserialize)]
struct StoredUser {
    version: u32,
    record: UserRecord,
}

/// One bincode file per user under `data_dir`.
pub struct FileStore {
    data_dir: PathBuf,
    // serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new_with_path(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn new() -> Result<Self> {
        let dirs = ProjectDirs::from("com", "fingergate", "FingerGate")
            .ok_or_else(|| FingerprintError::Storage("Failed to get project dirs".into()))?;

        Self::new_with_path(dirs.data_dir().join("users"))
    }

    pub fn new_with_dev_mode(dev_mode: &DevMode) -> Result<Self> {
        match dev_mode.data_dir() {
            Some(data_dir) => {
                tracing::debug!("FileStore using dev directory: {:?}", data_dir);
                Self::new_with_path(data_dir)
            }
            None => Self::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn user_file(&self, id: &UserId) -> PathBuf {
        self.data_dir.join(format!("{}.{}", id, FILE_EXTENSION))
    }

    async fn write_record(&self, record: &UserRecord) -> Result<()> {
        let stored = StoredUser {
            version: STORAGE_VERSION,
            record: record.clone(),
        };
        let encoded = bincode::serialize(&stored)?;

        // write then rename so a crash never leaves a half-written user
        let target = self.user_file(&record.user.id);
        let tmp = target.with_extension("tmp");
        fs::write(&tmp, encoded).await?;
        fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn read_file(path: &Path) -> Result<UserRecord> {
        let data = fs::read(path).await?;
        let stored: StoredUser = bincode::deserialize(&data)?;

        if stored.version > STORAGE_VERSION {
            return Err(FingerprintError::Storage(format!(
                "{} was written by a newer version ({})",
                path.display(),
                stored.version
            )));
        }

        Ok(stored.record)
    }

    async fn read_record(&self, id: &UserId) -> Result<Option<UserRecord>> {
        let path = self.user_file(id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        Self::read_file(&path).await.map(Some)
    }

    async fn read_all(&self) -> Result<Vec<UserRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.data_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            match Self::read_file(&path).await {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable user file {:?}: {}", path, e),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl Store for FileStore {
    async fn create_user(&self, profile: NewUser, template: BiometricTemplate) -> Result<UserId> {
        let _guard = self.write_lock.lock().await;

        if self.read_all().await?.iter().any(|r| r.user.username == profile.username) {
            return Err(FingerprintError::UsernameTaken(profile.username));
        }

        let record = profile.into_record(template);
        self.write_record(&record).await?;
        tracing::info!("Saved user {} to {:?}", record.user.id, self.data_dir);
        Ok(record.user.id)
    }

    async fn get_user_by_id(&self, id: &UserId) -> Result<Option<UserRecord>> {
        self.read_record(id).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|r| r.user.username == username))
    }

    async fn update_user(&self, id: &UserId, update: UserUpdate) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(mut record) = self.read_record(id).await? else {
            return Ok(false);
        };

        if let Some(username) = &update.username {
            let taken = self
                .read_all()
                .await?
                .iter()
                .any(|r| &r.user.username == username && &r.user.id != id);
            if taken {
                return Err(FingerprintError::UsernameTaken(username.clone()));
            }
        }

        update.apply(&mut record.user);
        self.write_record(&record).await?;
        Ok(true)
    }

    async fn delete_user(&self, id: &UserId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let path = self.user_file(id);
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        fs::remove_file(path).await?;
        Ok(true)
    }

    async fn update_last_access(&self, id: &UserId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(mut record) = self.read_record(id).await? {
            record.user.last_access = Some(Utc::now());
            self.write_record(&record).await?;
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.read_all().await?.into_iter().map(|r| r.user).collect();
        users.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }
}
