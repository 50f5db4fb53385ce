//! Fingerprint matcher abstraction.
//!
//! A [`Matcher`] owns the sensor: it reports whether a device is attached,
//! captures templates and scores two templates against each other. The core
//! never talks to hardware directly.

pub mod scripted;
pub mod simulated;

use crate::common::Result;
use crate::core::BiometricTemplate;
use async_trait::async_trait;

pub use scripted::{ScriptedCapture, ScriptedMatcher};
pub use simulated::SimulatedMatcher;

/// Match confidence between two templates, clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Similarity(f32);

impl Similarity {
    pub fn new(score: f32) -> Self {
        if score.is_nan() {
            return Self(0.0);
        }
        Self(score.clamp(0.0, 1.0))
    }

    pub fn score(self) -> f32 {
        self.0
    }

    /// Two templates are the same finger only when the score is strictly
    /// above the threshold.
    pub fn exceeds(self, threshold: f32) -> bool {
        self.0 > threshold
    }
}

#[async_trait]
pub trait Matcher: Send + Sync {
    /// Probe for the device. Returns whether one is connected.
    async fn initialize(&self) -> Result<bool>;

    fn is_device_connected(&self) -> bool;

    /// Capture one template. Long-latency.
    async fn capture(&self) -> Result<BiometricTemplate>;

    /// Score a captured template against a stored one.
    async fn compare(&self, stored: &[u8], captured: &[u8]) -> Result<Similarity>;

    fn name(&self) -> &str {
        "matcher"
    }
}
