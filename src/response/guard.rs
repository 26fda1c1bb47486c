use std::sync::atomic::{AtomicU8, Ordering};

const PENDING: u8 = 0;
const COMPLETING: u8 = 1;

/// Single-fire gate: exactly one `try_complete` per lifetime returns true.
#[derive(Debug, Default)]
pub struct CompletionGuard {
    state: AtomicU8,
}

impl CompletionGuard {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
        }
    }

    pub fn try_complete(&self) -> bool {
        self.state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETING
    }

    /// Only valid once the previous lifetime is fully written.
    pub fn reset(&self) {
        self.state.store(PENDING, Ordering::Release);
    }
}
