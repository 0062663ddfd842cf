use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// What a worker or a blocked producer does when there is nothing to take.
///
/// The ring itself never blocks, so every wait in the dispatcher goes through
/// one of these. `attempt` counts consecutive empty polls, starting at 0, and
/// resets once work shows up.
pub trait IdleStrategy: Send + Sync {
    fn idle(&self, attempt: u32);

    /// Called after an item has been queued. Strategies that park threads
    /// use it to wake them; the polling ones ignore it.
    fn wake(&self) {}
}

/// Busy-poll, handing the CPU to the scheduler between polls.
///
/// The default: lowest latency, one core per idle worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldIdle;

impl IdleStrategy for YieldIdle {
    #[inline]
    fn idle(&self, _attempt: u32) {
        thread::yield_now();
    }
}

/// Pure spinning. Only sensible with workers pinned to dedicated cores.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinIdle;

impl IdleStrategy for SpinIdle {
    #[inline]
    fn idle(&self, _attempt: u32) {
        hint::spin_loop();
    }
}

/// Spin, then yield, then sleep with exponentially growing pauses.
#[derive(Debug, Clone, Copy)]
pub struct BackoffIdle {
    pub spin_rounds: u32,
    pub yield_rounds: u32,
    pub min_sleep: Duration,
    pub max_sleep: Duration,
}

impl Default for BackoffIdle {
    fn default() -> Self {
        Self {
            spin_rounds: 6,
            yield_rounds: 10,
            min_sleep: Duration::from_micros(10),
            max_sleep: Duration::from_millis(1),
        }
    }
}

impl IdleStrategy for BackoffIdle {
    fn idle(&self, attempt: u32) {
        if attempt < self.spin_rounds {
            for _ in 0..(1u32 << attempt.min(10)) {
                hint::spin_loop();
            }
        } else if attempt < self.spin_rounds + self.yield_rounds {
            thread::yield_now();
        } else {
            let exp = (attempt - self.spin_rounds - self.yield_rounds).min(16);
            let pause = self.min_sleep.saturating_mul(1 << exp).min(self.max_sleep);
            thread::sleep(pause);
        }
    }
}

/// Parks idle threads on a condition variable until [`IdleStrategy::wake`]
/// or the timeout.
///
/// Trades wake-up latency for near-zero CPU while the ring is empty. The
/// timeout bounds the cost of a wake that races with a thread going to sleep.
pub struct BlockingIdle {
    timeout: Duration,
    sleepers: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
}

impl BlockingIdle {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sleepers: AtomicUsize::new(0),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }
}

impl Default for BlockingIdle {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

impl IdleStrategy for BlockingIdle {
    fn idle(&self, attempt: u32) {
        // A couple of cheap polls before paying for a park.
        if attempt < 2 {
            thread::yield_now();
            return;
        }
        let mut guard = self.lock.lock();
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        self.cond.wait_for(&mut guard, self.timeout);
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }

    fn wake(&self) {
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.cond.notify_all();
        }
    }
}

impl fmt::Debug for BlockingIdle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingIdle")
            .field("timeout", &self.timeout)
            .field("sleepers", &self.sleepers.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_backoff_sleep_is_capped() {
        let idle = BackoffIdle {
            max_sleep: Duration::from_millis(2),
            ..BackoffIdle::default()
        };
        let start = Instant::now();
        idle.idle(1000);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_blocking_idle_wakes_early() {
        let idle = Arc::new(BlockingIdle::new(Duration::from_secs(5)));
        let sleeper = {
            let idle = idle.clone();
            thread::spawn(move || {
                let start = Instant::now();
                idle.idle(10);
                start.elapsed()
            })
        };

        while idle.sleepers.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        idle.wake();

        let slept = sleeper.join().unwrap();
        assert!(slept < Duration::from_secs(5), "wake should cut the park short");
    }
}
