use crate::common::error::{FingerprintError, Result};
use crate::core::{ENROLLMENT_ACCEPT_QUALITY, MATCH_SIMILARITY_THRESHOLD, MIN_CAPTURE_QUALITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScannerConfig {
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_ms: u64,
    #[serde(default = "default_progress_tick")]
    pub progress_tick_ms: u64,
    #[serde(default = "default_progress_step")]
    pub progress_step: u8,
}

fn default_capture_timeout() -> u64 { 10_000 }
fn default_progress_tick() -> u64 { 50 }
fn default_progress_step() -> u8 { 2 }

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            capture_timeout_ms: default_capture_timeout(),
            progress_tick_ms: default_progress_tick(),
            progress_step: default_progress_step(),
        }
    }
}

impl ScannerConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_min_capture_quality")]
    pub min_capture_quality: u8,
    #[serde(default = "default_enrollment_quality")]
    pub enrollment_accept_quality: u8,
}

fn default_min_capture_quality() -> u8 { MIN_CAPTURE_QUALITY }
fn default_enrollment_quality() -> u8 { ENROLLMENT_ACCEPT_QUALITY }

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_capture_quality: default_min_capture_quality(),
            enrollment_accept_quality: default_enrollment_quality(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

fn default_similarity_threshold() -> f32 { MATCH_SIMILARITY_THRESHOLD }

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnrollmentConfig {
    #[serde(default = "default_max_enrollment_attempts")]
    pub max_attempts: u32,
}

fn default_max_enrollment_attempts() -> u32 { 5 }

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_enrollment_attempts(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
}

fn default_escalation_threshold() -> u32 { 3 }

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EscalationConfig {
    #[serde(default)]
    pub require_admin_for_enrollment: bool,
    #[serde(default = "default_max_admin_attempts")]
    pub max_admin_attempts: u32,
}

fn default_max_admin_attempts() -> u32 { 3 }

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            require_admin_for_enrollment: false,
            max_admin_attempts: default_max_admin_attempts(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Overrides the user data directory. Ignored in dev mode.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimulatorConfig {
    #[serde(default = "default_connect_probability")]
    pub connect_probability: f64,
    #[serde(default = "default_init_delay")]
    pub init_delay_ms: u64,
    #[serde(default = "default_capture_delay")]
    pub capture_delay_ms: u64,
    #[serde(default = "default_compare_delay")]
    pub compare_delay_ms: u64,
}

fn default_connect_probability() -> f64 { 0.9 }
fn default_init_delay() -> u64 { 1000 }
fn default_capture_delay() -> u64 { 3000 }
fn default_compare_delay() -> u64 { 1000 }

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            connect_probability: default_connect_probability(),
            init_delay_ms: default_init_delay(),
            capture_delay_ms: default_capture_delay(),
            compare_delay_ms: default_compare_delay(),
        }
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FingerprintError::Config(format!(
                "Config file not found: {}. Please create it from the example.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Loads `path` when it exists, otherwise falls back to the built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            tracing::warn!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Quality gates
        if self.quality.min_capture_quality > 100 {
            return Err(FingerprintError::Config(format!(
                "Minimum capture quality must be between 0 and 100, got {}",
                self.quality.min_capture_quality
            )));
        }
        if self.quality.enrollment_accept_quality > 100 {
            return Err(FingerprintError::Config(format!(
                "Enrollment quality must be between 0 and 100, got {}",
                self.quality.enrollment_accept_quality
            )));
        }
        if self.quality.enrollment_accept_quality < self.quality.min_capture_quality {
            return Err(FingerprintError::Config(format!(
                "Enrollment quality ({}) cannot be below the minimum capture quality ({})",
                self.quality.enrollment_accept_quality, self.quality.min_capture_quality
            )));
        }

        // Matching threshold
        let threshold = self.matching.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(FingerprintError::Config(format!(
                "Similarity threshold must be between 0.0 and 1.0, got {}",
                threshold
            )));
        }

        // Scanner timings
        if self.scanner.capture_timeout_ms < 100 || self.scanner.capture_timeout_ms > 120_000 {
            return Err(FingerprintError::Config(format!(
                "Capture timeout must be between 100 and 120000 ms, got {}",
                self.scanner.capture_timeout_ms
            )));
        }
        if self.scanner.progress_tick_ms == 0 {
            return Err(FingerprintError::Config("Progress tick must be at least 1 ms".into()));
        }
        if self.scanner.progress_step == 0 || self.scanner.progress_step > 100 {
            return Err(FingerprintError::Config(format!(
                "Progress step must be between 1 and 100, got {}",
                self.scanner.progress_step
            )));
        }

        // Attempt limits
        if self.enrollment.max_attempts == 0 {
            return Err(FingerprintError::Config("Enrollment max_attempts must be at least 1".into()));
        }
        if self.auth.escalation_threshold == 0 {
            return Err(FingerprintError::Config("Auth escalation_threshold must be at least 1".into()));
        }
        if self.escalation.max_admin_attempts == 0 {
            return Err(FingerprintError::Config("Escalation max_admin_attempts must be at least 1".into()));
        }

        if !(0.0..=1.0).contains(&self.simulator.connect_probability) {
            return Err(FingerprintError::Config(format!(
                "Simulator connect probability must be between 0.0 and 1.0, got {}",
                self.simulator.connect_probability
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core_constants() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.quality.min_capture_quality, 30);
        assert_eq!(config.quality.enrollment_accept_quality, 70);
        assert!((config.matching.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.scanner.capture_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [enrollment]
            max_attempts = 2

            [escalation]
            require_admin_for_enrollment = true
            "#,
        )
        .unwrap();

        assert_eq!(config.enrollment.max_attempts, 2);
        assert!(config.escalation.require_admin_for_enrollment);
        assert_eq!(config.escalation.max_admin_attempts, 3);
        assert_eq!(config.quality.min_capture_quality, 30);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = Config::from_toml("[matching]\nsimilarity_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, FingerprintError::Config(_)));

        let err = Config::from_toml("[enrollment]\nmax_attempts = \"many\"\n").unwrap_err();
        assert!(matches!(err, FingerprintError::ConfigParse(_)));

        let err = Config::from_toml(
            "[quality]\nmin_capture_quality = 80\nenrollment_accept_quality = 70\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot be below"));

        let err = Config::from_toml("[enrollment]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, FingerprintError::Config(_)));
    }

    #[test]
    fn missing_file_is_an_error_unless_defaulting() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.toml");
        assert!(Config::load_from_path(&path).is_err());
        assert!(Config::load_or_default(&path).is_ok());
    }
}
