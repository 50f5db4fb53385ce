// Core modules
pub mod common;
pub mod core;
pub mod device;
pub mod storage;

// Re-export commonly used types
pub use common::{Config, DevMode, FingerprintError, Result};
pub use crate::core::{
    classify, AdminEscalationGate, AttemptTracker, AuthenticationOrchestrator, AuthenticationResult,
    BiometricTemplate, EnrollmentOrchestrator, ErrorKind, GateState, ScanOutcome, ScanSession,
    ScanState, SessionRegistry,
};
pub use device::{Matcher, Similarity};
pub use storage::{AccessLevel, NewUser, Store, User, UserId};
