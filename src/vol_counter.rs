use tracing::trace;

use crate::error::BuildError;

/// Windowed volume gate: sums a size-like sample per observed record and,
/// every `window` samples, produces one verdict — `true` when the window's
/// volume exceeded the threshold (switch to answering/enforcement), `false`
/// otherwise (keep learning).
///
/// The verdict is latched until consumed by [`result`](VolCounter::result);
/// an unconsumed verdict is overwritten when the next window closes.
pub struct VolCounter {
    window: u64,
    threshold: u64,
    acc: u64,
    count: u64,
    verdict: Option<bool>,
}

impl VolCounter {
    pub fn new(window: u64, threshold: u64) -> Result<Self, BuildError> {
        if window < 1 {
            return Err(BuildError::ZeroWindow);
        }
        Ok(Self {
            window,
            threshold,
            acc: 0,
            count: 0,
            verdict: None,
        })
    }

    pub fn add_sample(&mut self, value: u64) {
        self.acc = self.acc.saturating_add(value);
        self.count += 1;
        if self.count == self.window {
            let over = self.acc > self.threshold;
            trace!(acc = self.acc, threshold = self.threshold, over, "window closed");
            self.verdict = Some(over);
            self.acc = 0;
            self.count = 0;
        }
    }

    /// Take the verdict of the most recently closed window, exactly once.
    pub fn result(&mut self) -> Option<bool> {
        self.verdict.take()
    }
}
