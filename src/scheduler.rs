use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Shared shutdown flag. Cancelling wakes every thread blocked in
/// [`CancellationToken::wait_timeout`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.state;
        let mut cancelled = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.state;
        *lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks for up to `timeout`. Returns `true` if the token was cancelled
    /// before the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.state;
        let mut cancelled = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*cancelled {
                cancelled = cvar
                    .wait(cancelled)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            return true;
        };
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = cvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            cancelled = guard;
        }
        *cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Cancelled,
}

/// Timer seam between harvester cycles.
pub trait Scheduler: Send + Sync {
    fn sleep(&self, duration: Duration) -> SleepOutcome;
    fn is_cancelled(&self) -> bool;
}

/// Wall-clock scheduler whose sleeps end early on cancellation.
#[derive(Debug, Clone)]
pub struct ThreadScheduler {
    token: CancellationToken,
}

impl ThreadScheduler {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Scheduler for ThreadScheduler {
    fn sleep(&self, duration: Duration) -> SleepOutcome {
        if self.token.wait_timeout(duration) {
            SleepOutcome::Cancelled
        } else {
            SleepOutcome::Elapsed
        }
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sleep_elapses_without_cancel() {
        let scheduler = ThreadScheduler::new(CancellationToken::new());
        assert_eq!(
            scheduler.sleep(Duration::from_millis(5)),
            SleepOutcome::Elapsed
        );
    }

    #[test]
    fn cancel_interrupts_long_sleep() {
        let token = CancellationToken::new();
        let scheduler = ThreadScheduler::new(token.clone());
        let handle = thread::spawn(move || scheduler.sleep(Duration::from_secs(3600)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(handle.join().unwrap(), SleepOutcome::Cancelled);
    }

    #[test]
    fn unbounded_wait_ends_on_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::MAX));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn cancelled_token_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let started = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(3600)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
