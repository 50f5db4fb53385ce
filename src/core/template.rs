use crate::common::{FingerprintError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length in bytes of every template a matcher produces.
pub const TEMPLATE_LEN: usize = 256;

pub const MAX_QUALITY: u8 = 100;

/// Opaque fingerprint encoding. Fields are private so a template cannot change
/// after it has been captured.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricTemplate {
    data: Vec<u8>,
    quality: u8,
    captured_at: DateTime<Utc>,
}

impl BiometricTemplate {
    pub fn new(data: Vec<u8>, quality: u8) -> Result<Self> {
        Self::with_timestamp(data, quality, Utc::now())
    }

    pub fn with_timestamp(data: Vec<u8>, quality: u8, captured_at: DateTime<Utc>) -> Result<Self> {
        if data.len() != TEMPLATE_LEN {
            return Err(FingerprintError::InvalidTemplate(format!(
                "expected {} bytes, got {}",
                TEMPLATE_LEN,
                data.len()
            )));
        }
        if quality > MAX_QUALITY {
            return Err(FingerprintError::InvalidTemplate(format!(
                "quality must be between 0 and {}, got {}",
                MAX_QUALITY, quality
            )));
        }

        Ok(Self {
            data,
            quality,
            captured_at,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Stable short identifier derived from the template bytes.
    pub fn fingerprint_id(&self) -> String {
        let digest = Sha256::digest(&self.data);
        let hex: String = digest[..6].iter().map(|b| format!("{:02x}", b)).collect();
        format!("fp-{}", hex)
    }
}

// Template bytes stay out of logs
impl fmt::Debug for BiometricTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiometricTemplate")
            .field("len", &self.data.len())
            .field("quality", &self.quality)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}
