//! Error injection controller for testing.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tonic::Code;

/// Controller for injecting failures and delays into a
/// [`SimplePublisher`](super::SimplePublisher).
#[derive(Debug)]
pub struct ErrorInjector {
    /// Fail the next N publishes.
    fail_next_publishes: AtomicUsize,
    /// Let the first N publishes succeed before starting to fail.
    skip_publishes_before_fail: AtomicUsize,
    /// Status code of injected failures.
    failure_code: AtomicI32,
    /// Keep completions pending until released.
    hold_completions: AtomicBool,
    /// Artificial publish latency in milliseconds.
    publish_latency_ms: AtomicU64,
}

impl Default for ErrorInjector {
    fn default() -> Self {
        Self {
            fail_next_publishes: AtomicUsize::new(0),
            skip_publishes_before_fail: AtomicUsize::new(0),
            failure_code: AtomicI32::new(Code::Unavailable as i32),
            hold_completions: AtomicBool::new(false),
            publish_latency_ms: AtomicU64::new(0),
        }
    }
}

impl ErrorInjector {
    /// Create a new error injector with all errors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next N publishes.
    pub fn fail_publishes(&self, count: usize) {
        self.fail_next_publishes.store(count, Ordering::SeqCst);
    }

    /// Skip the first `skip` publishes, then fail the next `fail` publishes.
    pub fn skip_publishes_then_fail(&self, skip: usize, fail: usize) {
        self.skip_publishes_before_fail.store(skip, Ordering::SeqCst);
        self.fail_next_publishes.store(fail, Ordering::SeqCst);
    }

    /// Status code injected failures are reported with. Defaults to `Unavailable`.
    pub fn set_failure_code(&self, code: Code) {
        self.failure_code.store(code as i32, Ordering::SeqCst);
    }

    pub fn failure_code(&self) -> Code {
        Code::from_i32(self.failure_code.load(Ordering::SeqCst))
    }

    /// While set, publishes do not complete until
    /// [`SimplePublisher::release`](super::SimplePublisher::release) is called.
    pub fn hold_completions(&self, hold: bool) {
        self.hold_completions.store(hold, Ordering::SeqCst);
    }

    pub fn is_holding(&self) -> bool {
        self.hold_completions.load(Ordering::SeqCst)
    }

    /// Set artificial publish latency.
    pub fn set_publish_latency(&self, ms: u64) {
        self.publish_latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Check and decrement the publish failure counter.
    /// If skip_publishes_before_fail is set, decrements that first and returns false.
    pub(crate) fn should_fail_publish(&self) -> bool {
        let skip = self
            .skip_publishes_before_fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok();
        if skip {
            return false;
        }
        Self::decrement_counter(&self.fail_next_publishes)
    }

    /// Decrements the counter and returns true if it was > 0.
    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok()
    }

    pub(crate) async fn apply_publish_latency(&self) {
        let ms = self.publish_latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}
