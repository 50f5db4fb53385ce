use crate::core::classifier::ScanError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Fingerprint device disconnected")]
    DeviceDisconnected,

    #[error("No fingerprint scanner detected")]
    NoScannerDetected,

    #[error("Read failure: {0}")]
    ReadFailure(String),

    #[error("Capture quality too low: {quality} (required {required})")]
    PoorQuality { quality: u8, required: u8 },

    #[error("Capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("Scan failed: {0}")]
    Scan(ScanError),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Username already registered: {0}")]
    UsernameTaken(String),

    #[error("User {0} is not an administrator")]
    InsufficientPrivilege(String),

    #[error("Enrollment aborted after {attempts} failed attempts")]
    EnrollmentAborted { attempts: u32 },

    #[error("Administrator verification required")]
    EscalationRequired,

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Scan attempt was cancelled")]
    Cancelled,

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FingerprintError>;
