use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// The per-session countdown latch a waiter parks on inside the
/// `begin_action` wait loop. The count is set to the size of the waited
/// set; each waited session counts it down once as it releases its
/// locks, and the decrement that reaches zero wakes the owner.
pub(crate) struct Latch {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn set(&self, n: usize) {
        *self.count.lock() = n;
    }

    pub(crate) fn count_down(&self) {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
        }
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    /// Forces the count to zero and wakes the owner; used by statement
    /// abort and session reset.
    pub(crate) fn clear(&self) {
        *self.count.lock() = 0;
        self.cond.notify_all();
    }

    /// Parks until the count reaches zero. Returns `false` on timeout
    /// with the count still positive.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut count = self.count.lock();
        match timeout {
            None => {
                while *count > 0 {
                    self.cond.wait(&mut count);
                }
                true
            }
            Some(limit) => {
                while *count > 0 {
                    if self.cond.wait_for(&mut count, limit).timed_out() {
                        return *count == 0;
                    }
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn count_down_to_zero_wakes_waiter() {
        let latch = Arc::new(Latch::new());
        latch.set(2);
        let waiter = {
            let latch = Arc::clone(&latch);
            std::thread::spawn(move || latch.wait(Some(Duration::from_secs(5))))
        };
        latch.count_down();
        latch.count_down();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn wait_times_out_when_count_stays_positive() {
        let latch = Latch::new();
        latch.set(1);
        assert!(!latch.wait(Some(Duration::from_millis(10))));
    }
}
