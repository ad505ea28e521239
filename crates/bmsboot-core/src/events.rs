//! Progress reporting for UI decoupling.
//!
//! The CLI renders a progress bar, headless callers pass [`NullProgress`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::protocol::DATA_PROGRESS_SHARE;

/// Receiver of flash progress, in percent.
pub trait ProgressSink: Send + Sync {
    /// Advance by `delta` percent.
    fn advance(&self, delta: u32);

    /// Called once the flash succeeded and 100% was reached.
    fn complete(&self) {}
}

impl<P: ProgressSink + ?Sized> ProgressSink for Arc<P> {
    fn advance(&self, delta: u32) {
        (**self).advance(delta)
    }

    fn complete(&self) {
        (**self).complete()
    }
}

impl<P: ProgressSink + ?Sized> ProgressSink for &P {
    fn advance(&self, delta: u32) {
        (**self).advance(delta)
    }

    fn complete(&self) {
        (**self).complete()
    }
}

/// Discards progress.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn advance(&self, _delta: u32) {}
}

/// Logs progress using tracing.
#[derive(Default)]
pub struct TracingProgress {
    percent: AtomicU32,
}

impl ProgressSink for TracingProgress {
    fn advance(&self, delta: u32) {
        let percent = self.percent.fetch_add(delta, Ordering::Relaxed) + delta;
        tracing::debug!(progress = %format!("{}%", percent), "Progress");
    }

    fn complete(&self) {
        tracing::info!("Progress 100%");
    }
}

/// Turns acknowledged words into integer percent deltas.
///
/// Data covers the first 99%, the vector table the rest. Deltas are
/// never negative, so a restarted transfer does not move the bar back.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    total_words: u64,
    reported: u32,
}

impl ProgressTracker {
    pub fn new(total_words: u64) -> Self {
        Self {
            total_words: total_words.max(1),
            reported: 0,
        }
    }

    #[cfg(test)]
    pub fn reported(&self) -> u32 {
        self.reported
    }

    /// Words `1..=words` are acknowledged.
    pub fn words_done(&mut self, words: u64, sink: &dyn ProgressSink) {
        let target = (words.min(self.total_words) * u64::from(DATA_PROGRESS_SHARE)
            / self.total_words) as u32;
        if target > self.reported {
            sink.advance(target - self.reported);
            self.reported = target;
        }
    }

    /// Vector table validated.
    pub fn finish(&mut self, sink: &dyn ProgressSink) {
        if self.reported < 100 {
            sink.advance(100 - self.reported);
            self.reported = 100;
        }
        sink.complete();
    }
}
