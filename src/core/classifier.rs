//! Closed error taxonomy shared by every orchestrator.
//!
//! Collaborator failures arrive as [`FingerprintError`] values of many shapes;
//! [`classify`] folds them into one [`ErrorKind`], and everything the caller
//! needs for retry policy or display is derived from the kind alone.

use crate::common::FingerprintError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DeviceDisconnected,
    NoScannerDetected,
    ReadFailure,
    PoorQuality,
    Timeout,
    UserNotFound,
    InternalError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::DeviceDisconnected,
        ErrorKind::NoScannerDetected,
        ErrorKind::ReadFailure,
        ErrorKind::PoorQuality,
        ErrorKind::Timeout,
        ErrorKind::UserNotFound,
        ErrorKind::InternalError,
    ];

    /// Whether the caller may simply try again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ReadFailure | ErrorKind::PoorQuality | ErrorKind::Timeout
        )
    }

    /// Whether this failure counts against an attempt tracker.
    pub fn counts_as_attempt(self) -> bool {
        !matches!(self, ErrorKind::UserNotFound | ErrorKind::InternalError)
    }

    /// Device-level failures: no new session should start until the matcher
    /// re-initializes.
    pub fn blocks_new_sessions(self) -> bool {
        matches!(
            self,
            ErrorKind::DeviceDisconnected | ErrorKind::NoScannerDetected
        )
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ReadFailure => "E-RF001",
            ErrorKind::NoScannerDetected => "E-NS002",
            ErrorKind::Timeout => "E-TO003",
            ErrorKind::DeviceDisconnected => "E-DD004",
            ErrorKind::PoorQuality => "E-PQ005",
            ErrorKind::UserNotFound => "E-UN006",
            ErrorKind::InternalError => "E-IN007",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ErrorKind::DeviceDisconnected => "Scanner Disconnected",
            ErrorKind::NoScannerDetected => "No Scanner Detected",
            ErrorKind::ReadFailure => "Fingerprint Read Failure",
            ErrorKind::PoorQuality => "Poor Fingerprint Quality",
            ErrorKind::Timeout => "Scan Timeout",
            ErrorKind::UserNotFound => "Unknown User",
            ErrorKind::InternalError => "Internal Error",
        }
    }

    pub fn recommended_actions(self) -> &'static [&'static str] {
        match self {
            ErrorKind::ReadFailure => &[
                "Clean the scanner surface with the provided cloth",
                "Ensure your finger is clean and dry",
                "Place your finger flat on the center of the scanner",
                "Maintain gentle pressure throughout the scan",
            ],
            ErrorKind::PoorQuality => &[
                "Place your finger flat on the center of the scanner",
                "Ensure your finger is clean and dry",
                "Press a little more firmly and keep still",
            ],
            ErrorKind::NoScannerDetected | ErrorKind::DeviceDisconnected => &[
                "Check that the scanner is properly connected",
                "Verify the scanner power indicator is lit",
                "Try reconnecting the scanner to a different port",
                "Contact system administrator if problem persists",
            ],
            ErrorKind::Timeout => &[
                "Ensure your finger remains still during scanning",
                "Try again with proper finger placement",
                "Avoid moving your finger during the scan process",
                "If the problem persists, contact technical support",
            ],
            ErrorKind::UserNotFound => &[
                "Check the username for typos",
                "Ask an administrator to register the user",
            ],
            ErrorKind::InternalError => &[
                "Try again",
                "Restart the application",
                "Contact system administrator if problem persists",
            ],
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DeviceDisconnected => "device_disconnected",
            ErrorKind::NoScannerDetected => "no_scanner",
            ErrorKind::ReadFailure => "read_failure",
            ErrorKind::PoorQuality => "poor_quality",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UserNotFound => "user_not_found",
            ErrorKind::InternalError => "internal_error",
        };
        f.write_str(name)
    }
}

/// Terminal failure of one scan attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ScanError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(error: &FingerprintError) -> Self {
        Self::new(classify(error), error.to_string())
    }

    pub fn into_error(self) -> FingerprintError {
        FingerprintError::Scan(self)
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind.code())
    }
}

/// Maps any failure to its taxonomy member. Pure.
pub fn classify(error: &FingerprintError) -> ErrorKind {
    match error {
        FingerprintError::DeviceDisconnected => ErrorKind::DeviceDisconnected,
        FingerprintError::NoScannerDetected => ErrorKind::NoScannerDetected,
        FingerprintError::ReadFailure(_) | FingerprintError::EnrollmentAborted { .. } => {
            ErrorKind::ReadFailure
        }
        FingerprintError::PoorQuality { .. } => ErrorKind::PoorQuality,
        FingerprintError::Timeout(_) => ErrorKind::Timeout,
        FingerprintError::Scan(scan) => scan.kind,
        // identity problems, never capture failures
        FingerprintError::UserNotFound(_) | FingerprintError::InsufficientPrivilege(_) => {
            ErrorKind::UserNotFound
        }
        FingerprintError::UsernameTaken(_)
        | FingerprintError::EscalationRequired
        | FingerprintError::InvalidTransition(_)
        | FingerprintError::Cancelled
        | FingerprintError::InvalidTemplate(_)
        | FingerprintError::Storage(_)
        | FingerprintError::Config(_)
        | FingerprintError::ConfigParse(_)
        | FingerprintError::Io(_)
        | FingerprintError::Serialization(_)
        | FingerprintError::Other(_) => ErrorKind::InternalError,
    }
}
