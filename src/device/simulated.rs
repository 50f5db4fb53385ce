//! Randomized stand-in for a real scanner, used in dev mode.

use crate::common::config::SimulatorConfig;
use crate::common::{FingerprintError, Result};
use crate::core::{BiometricTemplate, TEMPLATE_LEN};
use crate::device::{Matcher, Similarity};
use async_trait::async_trait;
use rand::{Rng, RngCore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct SimulatedMatcher {
    settings: SimulatorConfig,
    min_quality: u8,
    initialized: AtomicBool,
    connected: AtomicBool,
}

impl SimulatedMatcher {
    pub fn new(settings: SimulatorConfig, min_quality: u8) -> Self {
        Self {
            settings,
            min_quality,
            initialized: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    async fn pause(ms: u64) {
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl Matcher for SimulatedMatcher {
    async fn initialize(&self) -> Result<bool> {
        Self::pause(self.settings.init_delay_ms).await;

        let connected = rand::thread_rng().gen_bool(self.settings.connect_probability);
        self.connected.store(connected, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);

        if connected {
            tracing::info!("Simulated scanner connected");
        } else {
            tracing::warn!("Simulated scanner not detected");
        }
        Ok(connected)
    }

    fn is_device_connected(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst)
    }

    async fn capture(&self) -> Result<BiometricTemplate> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(FingerprintError::NoScannerDetected);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(FingerprintError::DeviceDisconnected);
        }

        Self::pause(self.settings.capture_delay_ms).await;

        let (quality, data) = {
            let mut rng = rand::thread_rng();
            let quality: u8 = rng.gen_range(0..=100);
            let mut data = vec![0u8; TEMPLATE_LEN];
            rng.fill_bytes(&mut data);
            (quality, data)
        };

        if quality < self.min_quality {
            return Err(FingerprintError::PoorQuality {
                quality,
                required: self.min_quality,
            });
        }

        tracing::debug!("Simulated capture with quality {}", quality);
        BiometricTemplate::new(data, quality)
    }

    async fn compare(&self, _stored: &[u8], _captured: &[u8]) -> Result<Similarity> {
        Self::pause(self.settings.compare_delay_ms).await;
        Ok(Similarity::new(rand::thread_rng().gen::<f32>()))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(connect_probability: f64) -> SimulatedMatcher {
        SimulatedMatcher::new(
            SimulatorConfig {
                connect_probability,
                init_delay_ms: 0,
                capture_delay_ms: 0,
                compare_delay_ms: 0,
            },
            30,
        )
    }

    #[tokio::test]
    async fn capture_requires_initialization() {
        let matcher = instant(1.0);
        assert!(!matcher.is_device_connected());
        assert!(matches!(matcher.capture().await, Err(FingerprintError::NoScannerDetected)));

        assert!(matcher.initialize().await.unwrap());
        for _ in 0..20 {
            match matcher.capture().await {
                Ok(template) => assert!(template.quality() >= 30),
                Err(FingerprintError::PoorQuality { quality, required }) => {
                    assert!(quality < required)
                }
                Err(other) => panic!("unexpected error {other}"),
            }
        }
    }

    #[tokio::test]
    async fn absent_device_reports_disconnected() {
        let matcher = instant(0.0);
        assert!(!matcher.initialize().await.unwrap());
        assert!(matches!(matcher.capture().await, Err(FingerprintError::DeviceDisconnected)));
    }

    #[tokio::test]
    async fn similarity_stays_in_range() {
        let matcher = instant(1.0);
        for _ in 0..20 {
            let score = matcher.compare(&[], &[]).await.unwrap().score();
            assert!((0.0..=1.0).contains(&score));
        }
    }
}
