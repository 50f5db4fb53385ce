pub mod attempts;
pub mod auth;
pub mod classifier;
pub mod enrollment;
pub mod escalation;
pub mod scan;
pub mod template;

/// Captures below this quality end in `PoorQuality`.
pub const MIN_CAPTURE_QUALITY: u8 = 30;
/// Enrollment candidates must reach this quality.
pub const ENROLLMENT_ACCEPT_QUALITY: u8 = 70;
/// Similarity two templates must exceed to count as the same finger.
pub const MATCH_SIMILARITY_THRESHOLD: f32 = 0.7;

pub use attempts::AttemptTracker;
pub use auth::{AuthPolicy, AuthenticationOrchestrator, AuthenticationResult};
pub use classifier::{classify, ErrorKind, ScanError};
pub use enrollment::{EnrollmentOrchestrator, EnrollmentPhase, EnrollmentPolicy};
pub use escalation::{AdminEscalationGate, EscalationPolicy, GateState};
pub use scan::{ScanOutcome, ScanSession, ScanSettings, ScanSnapshot, ScanState, SessionRegistry};
pub use template::{BiometricTemplate, TEMPLATE_LEN};
