//! Progress reporting and cooperative cancellation for long bulk operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives percent-complete updates (0–100) and may ask the operation to stop.
///
/// Cancellation is checked between batches of rows, never in the middle of a row frame.
pub trait ProgressObserver {
    fn on_progress(&mut self, percent: u8);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Observer that ignores progress and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _percent: u8) {}
}

impl<F: FnMut(u8)> ProgressObserver for F {
    fn on_progress(&mut self, percent: u8) {
        self(percent);
    }
}

/// Wraps a callback with a shared cancellation flag another thread can raise.
pub struct Cancellable<F> {
    callback: F,
    flag: Arc<AtomicBool>,
}

impl<F: FnMut(u8)> Cancellable<F> {
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an existing flag, e.g. one the callback itself raises.
    pub fn with_flag(callback: F, flag: Arc<AtomicBool>) -> Self {
        Self { callback, flag }
    }

    /// Handle that cancels the operation when set.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

impl<F: FnMut(u8)> ProgressObserver for Cancellable<F> {
    fn on_progress(&mut self, percent: u8) {
        (self.callback)(percent);
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub(crate) fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}
