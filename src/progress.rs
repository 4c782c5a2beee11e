use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between an owner thread and a
/// long-running operation. Operations check it at block/entity boundaries
/// and bail out with `Error::Cancelled`.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Advisory progress reporting with at-most-once-per-second delivery.
///
/// Messages are best-effort: throttled emissions are dropped, not queued,
/// so callers must not rely on them for correctness.
pub struct Progress {
    callback: Option<Box<dyn FnMut(&str) + Send>>,
    last_emit: Option<Instant>,
    interval: Duration,
}

impl Default for Progress {
    fn default() -> Self {
        Self::none()
    }
}

impl Progress {
    /// A progress handle that discards everything.
    pub fn none() -> Self {
        Self { callback: None, last_emit: None, interval: Duration::from_secs(1) }
    }

    pub fn new(callback: impl FnMut(&str) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            last_emit: None,
            interval: Duration::from_secs(1),
        }
    }

    /// Deliver `msg` unless a message was already delivered within the
    /// throttle interval.
    pub fn emit(&mut self, msg: &str) {
        let Some(callback) = self.callback.as_mut() else { return };
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.interval {
                return;
            }
        }
        self.last_emit = Some(now);
        callback(msg);
    }

    /// Deliver `msg` regardless of throttling (used for final summaries).
    pub fn emit_now(&mut self, msg: &str) {
        if let Some(callback) = self.callback.as_mut() {
            self.last_emit = Some(Instant::now());
            callback(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cancel_flag_round_trip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn progress_throttles_to_one_per_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let mut progress = Progress::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..100 {
            progress.emit("tick");
        }
        // First message goes through; the rest land inside the window.
        assert_eq!(count.load(Ordering::SeqCst), 1);

        progress.emit_now("done");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn none_progress_is_silent() {
        let mut progress = Progress::none();
        progress.emit("ignored");
        progress.emit_now("ignored");
    }
}
