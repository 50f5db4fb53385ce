//! Per-attempt scan state machine.
//!
//! ```text
//!            start()                capture ok, quality >= min
//!   Idle ───────────────► Scanning ───────────────────────────► Success
//!    ▲                      │  │                                   │
//!    │                      │  └── failure / low quality ──► Error │
//!    └──────── reset() ─────┴──────────────────────────────────┴───┘
//! ```
//!
//! Every `start()` opens a new attempt with its own generation number. The
//! capture task and the progress ticker carry that number and only touch the
//! session while it is still current, so a result from a reset or superseded
//! attempt is never applied.

use crate::common::config::Config;
use crate::common::{FingerprintError, Result};
use crate::core::classifier::{ErrorKind, ScanError};
use crate::core::template::BiometricTemplate;
use crate::core::MIN_CAPTURE_QUALITY;
use crate::device::Matcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const MAX_PROGRESS: u8 = 100;

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub min_capture_quality: u8,
    pub capture_timeout: Duration,
    pub tick_interval: Duration,
    pub progress_step: u8,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            min_capture_quality: MIN_CAPTURE_QUALITY,
            capture_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_millis(50),
            progress_step: 2,
        }
    }
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_capture_quality: config.quality.min_capture_quality,
            capture_timeout: config.scanner.capture_timeout(),
            tick_interval: config.scanner.progress_tick(),
            progress_step: config.scanner.progress_step,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Idle,
    Scanning,
    Success(BiometricTemplate),
    Error(ScanError),
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Success(_) | ScanState::Error(_))
    }
}

/// What subscribers see after every transition or progress tick.
#[derive(Debug, Clone)]
pub struct ScanSnapshot {
    pub session_id: Uuid,
    pub attempt: u64,
    pub state: ScanState,
    pub progress: u8,
}

/// Terminal result of one attempt as seen by the caller that started it.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Captured(BiometricTemplate),
    Failed(ScanError),
    /// The attempt was reset or superseded before it finished.
    Cancelled,
}

struct Core {
    attempt: u64,
    state: ScanState,
    progress: u8,
    capture_task: Option<JoinHandle<()>>,
    ticker_task: Option<JoinHandle<()>>,
}

impl Core {
    fn stop_tasks(&mut self) {
        if let Some(task) = self.capture_task.take() {
            task.abort();
        }
        if let Some(task) = self.ticker_task.take() {
            task.abort();
        }
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.state == ScanState::Scanning
    }
}

/// Device-level failure shared by every session on one matcher. While set,
/// no session captures until the matcher has been re-initialized.
#[derive(Debug, Default)]
struct DeviceLatch {
    blocked: Mutex<Option<ErrorKind>>,
}

impl DeviceLatch {
    fn blocked(&self) -> Option<ErrorKind> {
        *self.blocked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn trip(&self, kind: ErrorKind) {
        if kind.blocks_new_sessions() {
            *self.blocked.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
        }
    }

    fn clear(&self) {
        self.blocked.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Re-initializes `matcher` and lifts the block once it reports a device.
    async fn reinitialize(&self, matcher: &dyn Matcher) -> Result<bool> {
        let connected = matcher.initialize().await?;
        if connected {
            if let Some(kind) = self.blocked() {
                info!("Scanner re-initialized, clearing {}", kind);
            }
            self.clear();
        }
        Ok(connected)
    }
}

struct Shared {
    id: Uuid,
    subject: String,
    matcher: Arc<dyn Matcher>,
    latch: Arc<DeviceLatch>,
    settings: ScanSettings,
    core: Mutex<Core>,
    tx: watch::Sender<ScanSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &Core) {
        self.tx.send_replace(ScanSnapshot {
            session_id: self.id,
            attempt: core.attempt,
            state: core.state.clone(),
            progress: core.progress,
        });
    }

    fn complete(&self, attempt: u64, result: Result<BiometricTemplate>) {
        let mut core = self.lock();
        if !core.is_current(attempt) {
            debug!(session = %self.id, attempt, "Discarding stale capture result");
            return;
        }

        if let Some(ticker) = core.ticker_task.take() {
            ticker.abort();
        }
        core.capture_task = None;

        core.state = match result {
            Ok(template) if template.quality() < self.settings.min_capture_quality => {
                let err = FingerprintError::PoorQuality {
                    quality: template.quality(),
                    required: self.settings.min_capture_quality,
                };
                warn!(subject = %self.subject, "{}", err);
                ScanState::Error(ScanError::from_error(&err))
            }
            Ok(template) => {
                info!(subject = %self.subject, quality = template.quality(), "Capture succeeded");
                core.progress = MAX_PROGRESS;
                ScanState::Success(template)
            }
            Err(err) => {
                let scan_error = ScanError::from_error(&err);
                self.latch.trip(scan_error.kind);
                if scan_error.kind == ErrorKind::InternalError {
                    error!(subject = %self.subject, "Capture failed: {}", err);
                } else {
                    warn!(subject = %self.subject, "Capture failed: {}", err);
                }
                ScanState::Error(scan_error)
            }
        };
        self.publish(&core);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.core
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .stop_tasks();
    }
}

/// One subject's scan session. Clones share the same state.
#[derive(Clone)]
pub struct ScanSession {
    shared: Arc<Shared>,
}

impl ScanSession {
    pub fn new(subject: impl Into<String>, matcher: Arc<dyn Matcher>, settings: ScanSettings) -> Self {
        Self::with_latch(subject, matcher, settings, Arc::new(DeviceLatch::default()))
    }

    fn with_latch(
        subject: impl Into<String>,
        matcher: Arc<dyn Matcher>,
        settings: ScanSettings,
        latch: Arc<DeviceLatch>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (tx, _) = watch::channel(ScanSnapshot {
            session_id: id,
            attempt: 0,
            state: ScanState::Idle,
            progress: 0,
        });

        Self {
            shared: Arc::new(Shared {
                id,
                subject: subject.into(),
                matcher,
                latch,
                settings,
                core: Mutex::new(Core {
                    attempt: 0,
                    state: ScanState::Idle,
                    progress: 0,
                    capture_task: None,
                    ticker_task: None,
                }),
                tx,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn subject(&self) -> &str {
        &self.shared.subject
    }

    pub fn state(&self) -> ScanState {
        self.shared.lock().state.clone()
    }

    pub fn progress(&self) -> u8 {
        self.shared.lock().progress
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        self.shared.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.shared.tx.subscribe()
    }

    /// Begins a new capture attempt and returns its generation number.
    ///
    /// Valid from `Idle` or `Error`. Calling it while `Scanning` supersedes
    /// the running attempt: its capture is cancelled and any result it still
    /// produces is discarded. A session holding a `Success` must be `reset()`
    /// first so the captured template is not silently dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<u64> {
        let shared = &self.shared;
        let mut core = shared.lock();

        match core.state {
            ScanState::Success(_) => {
                return Err(FingerprintError::InvalidTransition(format!(
                    "session for {} holds a successful capture; reset before starting again",
                    shared.subject
                )));
            }
            ScanState::Scanning => {
                info!(subject = %shared.subject, attempt = core.attempt, "Superseding in-flight scan");
                core.stop_tasks();
            }
            ScanState::Idle | ScanState::Error(_) => {}
        }

        core.attempt += 1;
        core.progress = 0;
        let attempt = core.attempt;

        if let Some(kind) = shared.latch.blocked() {
            warn!(subject = %shared.subject, "Scanner unavailable ({}), re-initialize before capturing", kind);
            core.state = ScanState::Error(ScanError::new(kind, "scanner must be re-initialized"));
            shared.publish(&core);
            return Ok(attempt);
        }

        if !shared.matcher.is_device_connected() {
            warn!(subject = %shared.subject, "Scanner not connected, refusing to capture");
            shared.latch.trip(ErrorKind::DeviceDisconnected);
            core.state = ScanState::Error(ScanError::from_error(&FingerprintError::DeviceDisconnected));
            shared.publish(&core);
            return Ok(attempt);
        }

        core.state = ScanState::Scanning;
        shared.publish(&core);
        debug!(subject = %shared.subject, attempt, "Scan started");

        core.ticker_task = Some(tokio::spawn(run_ticker(Arc::downgrade(&self.shared), attempt)));
        core.capture_task = Some(tokio::spawn(run_capture(
            Arc::downgrade(&self.shared),
            Arc::clone(&shared.matcher),
            shared.settings.capture_timeout,
            attempt,
        )));

        Ok(attempt)
    }

    /// Returns to `Idle` from any state, cancelling whatever is in flight.
    pub fn reset(&self) {
        let mut core = self.shared.lock();
        core.stop_tasks();
        core.attempt += 1;
        core.state = ScanState::Idle;
        core.progress = 0;
        self.shared.publish(&core);
    }

    /// Waits for the terminal outcome of `attempt`.
    pub async fn wait(&self, attempt: u64) -> ScanOutcome {
        let mut rx = self.shared.tx.subscribe();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if snapshot.attempt != attempt {
                    return ScanOutcome::Cancelled;
                }
                match &snapshot.state {
                    ScanState::Success(template) => return ScanOutcome::Captured(template.clone()),
                    ScanState::Error(err) => return ScanOutcome::Failed(err.clone()),
                    ScanState::Idle => return ScanOutcome::Cancelled,
                    ScanState::Scanning => {}
                }
            }
            if rx.changed().await.is_err() {
                return ScanOutcome::Cancelled;
            }
        }
    }

    /// Re-initializes the matcher. A `true` result lifts any device-level
    /// block left by an earlier failure.
    pub async fn reinitialize(&self) -> Result<bool> {
        self.shared.latch.reinitialize(self.shared.matcher.as_ref()).await
    }

    /// `start()` followed by `wait()` on the new attempt.
    pub async fn run(&self) -> Result<ScanOutcome> {
        let attempt = self.start()?;
        Ok(self.wait(attempt).await)
    }
}

async fn run_capture(
    shared: Weak<Shared>,
    matcher: Arc<dyn Matcher>,
    timeout: Duration,
    attempt: u64,
) {
    let result = match tokio::time::timeout(timeout, matcher.capture()).await {
        Ok(result) => result,
        Err(_) => Err(FingerprintError::Timeout(timeout)),
    };

    match shared.upgrade() {
        Some(shared) => shared.complete(attempt, result),
        None => debug!(attempt, "Session dropped before capture finished"),
    }
}

async fn run_ticker(shared: Weak<Shared>, attempt: u64) {
    let Some(period) = shared.upgrade().map(|s| s.settings.tick_interval) else {
        return;
    };
    let mut interval = tokio::time::interval(period);
    // the first tick fires immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut core = shared.lock();
        if !core.is_current(attempt) {
            return;
        }
        core.progress = core
            .progress
            .saturating_add(shared.settings.progress_step)
            .min(MAX_PROGRESS);
        shared.publish(&core);
        if core.progress >= MAX_PROGRESS {
            return;
        }
    }
}

/// Hands out one shared [`ScanSession`] per subject so that at most one
/// attempt per subject is ever scanning.
pub struct SessionRegistry {
    matcher: Arc<dyn Matcher>,
    settings: ScanSettings,
    latch: Arc<DeviceLatch>,
    sessions: Mutex<HashMap<String, Weak<Shared>>>,
}

impl SessionRegistry {
    pub fn new(matcher: Arc<dyn Matcher>, settings: ScanSettings) -> Self {
        Self {
            matcher,
            settings,
            latch: Arc::new(DeviceLatch::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn matcher(&self) -> &Arc<dyn Matcher> {
        &self.matcher
    }

    /// Device-level failure currently blocking every session, if any.
    pub fn blocked(&self) -> Option<ErrorKind> {
        self.latch.blocked()
    }

    pub async fn reinitialize(&self) -> Result<bool> {
        self.latch.reinitialize(self.matcher.as_ref()).await
    }

    pub fn acquire(&self, subject: &str) -> ScanSession {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, session| session.strong_count() > 0);

        if let Some(shared) = sessions.get(subject).and_then(Weak::upgrade) {
            return ScanSession { shared };
        }

        let session = ScanSession::with_latch(
            subject,
            Arc::clone(&self.matcher),
            self.settings.clone(),
            Arc::clone(&self.latch),
        );
        sessions.insert(subject.to_string(), Arc::downgrade(&session.shared));
        session
    }
}
