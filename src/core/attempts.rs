/// Counts consecutive logical failures of one operation.
///
/// Only whole attempts are counted (one authentication for one username, one
/// enrollment pass), never retries a driver performs inside a single capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptTracker {
    count: u32,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one failure and returns the new count.
    pub fn increment(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn should_escalate(&self, threshold: u32) -> bool {
        self.count >= threshold
    }
}
