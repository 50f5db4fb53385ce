//! Deterministic matcher driven by a queue of scripted results.

use crate::common::{FingerprintError, Result};
use crate::core::{BiometricTemplate, TEMPLATE_LEN};
use crate::device::{Matcher, Similarity};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedCapture {
    /// Successful capture with the given quality.
    Quality(u8),
    ReadFailure,
    /// Fails and marks the device as disconnected.
    Disconnected,
    NoScanner,
    /// Never resolves; the session timeout has to end it.
    Hang,
    Internal,
}

pub struct ScriptedMatcher {
    captures: Mutex<VecDeque<ScriptedCapture>>,
    similarities: Mutex<VecDeque<f32>>,
    connected: AtomicBool,
    delay: Duration,
    capture_calls: AtomicUsize,
    compare_calls: AtomicUsize,
}

impl ScriptedMatcher {
    pub fn new() -> Self {
        Self {
            captures: Mutex::new(VecDeque::new()),
            similarities: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
            delay: Duration::ZERO,
            capture_calls: AtomicUsize::new(0),
            compare_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_captures(self, captures: impl IntoIterator<Item = ScriptedCapture>) -> Self {
        self.captures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(captures);
        self
    }

    pub fn with_similarities(self, scores: impl IntoIterator<Item = f32>) -> Self {
        self.similarities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(scores);
        self
    }

    /// Every capture waits this long before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn disconnected(self) -> Self {
        self.connected.store(false, Ordering::SeqCst);
        self
    }

    pub fn push_capture(&self, capture: ScriptedCapture) {
        self.captures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(capture);
    }

    pub fn push_similarity(&self, score: f32) {
        self.similarities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(score);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn compare_calls(&self) -> usize {
        self.compare_calls.load(Ordering::SeqCst)
    }

    fn next_capture(&self) -> Option<ScriptedCapture> {
        self.captures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn next_similarity(&self) -> f32 {
        self.similarities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(0.0)
    }
}

impl Default for ScriptedMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Matcher for ScriptedMatcher {
    async fn initialize(&self) -> Result<bool> {
        Ok(self.is_device_connected())
    }

    fn is_device_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn capture(&self) -> Result<BiometricTemplate> {
        let call = self.capture_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.next_capture();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match step {
            Some(ScriptedCapture::Quality(quality)) => {
                // distinct bytes per capture so templates are never shared
                BiometricTemplate::new(vec![call as u8; TEMPLATE_LEN], quality)
            }
            Some(ScriptedCapture::ReadFailure) => {
                Err(FingerprintError::ReadFailure("scripted read failure".into()))
            }
            Some(ScriptedCapture::Disconnected) => {
                self.set_connected(false);
                Err(FingerprintError::DeviceDisconnected)
            }
            Some(ScriptedCapture::NoScanner) => Err(FingerprintError::NoScannerDetected),
            Some(ScriptedCapture::Hang) => std::future::pending().await,
            Some(ScriptedCapture::Internal) => {
                Err(FingerprintError::Other(anyhow::anyhow!("scripted driver fault")))
            }
            None => Err(FingerprintError::ReadFailure("no scripted capture left".into())),
        }
    }

    async fn compare(&self, _stored: &[u8], _captured: &[u8]) -> Result<Similarity> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Similarity::new(self.next_similarity()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_in_order() {
        let matcher = ScriptedMatcher::new()
            .with_captures([ScriptedCapture::Quality(80), ScriptedCapture::ReadFailure])
            .with_similarities([0.9]);

        let first = matcher.capture().await.unwrap();
        assert_eq!(first.quality(), 80);
        assert!(matches!(matcher.capture().await, Err(FingerprintError::ReadFailure(_))));
        // exhausted script reads as a failure
        assert!(matcher.capture().await.is_err());
        assert_eq!(matcher.capture_calls(), 3);

        assert_eq!(matcher.compare(&[], &[]).await.unwrap().score(), 0.9);
        assert_eq!(matcher.compare(&[], &[]).await.unwrap().score(), 0.0);
        assert_eq!(matcher.compare_calls(), 2);
    }

    #[tokio::test]
    async fn disconnect_step_drops_the_device() {
        let matcher = ScriptedMatcher::new().with_captures([ScriptedCapture::Disconnected]);
        assert!(matcher.initialize().await.unwrap());
        assert!(matcher.capture().await.is_err());
        assert!(!matcher.is_device_connected());
    }
}
