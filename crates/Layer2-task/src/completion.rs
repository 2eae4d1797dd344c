//! Completion latch - one-way "finished" signal shared between a worker and its waiters
//!
//! A latch starts closed and is released exactly once. Blocking waiters park on a
//! condition variable; async waiters subscribe to a `watch` channel.

use crate::task::Task;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub struct Latch {
    released: Mutex<bool>,
    cond: Condvar,
    tx: watch::Sender<bool>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            released: Mutex::new(false),
            cond: Condvar::new(),
            tx,
        }
    }

    /// Release all current and future waiters. Returns false if already released.
    pub fn release(&self) -> bool {
        {
            let mut released = self.released.lock();
            if *released {
                return false;
            }
            *released = true;
            self.cond.notify_all();
        }
        self.tx.send_replace(true);
        true
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock()
    }

    /// Block the calling thread until released
    pub fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.cond.wait(&mut released);
        }
    }

    /// Block for at most `timeout`. Returns whether the latch was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut released = self.released.lock();
        while !*released {
            if self.cond.wait_until(&mut released, deadline).timed_out() {
                return *released;
            }
        }
        true
    }

    /// Receiver that observes `true` once released
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Await a task's completion from async code without blocking the runtime.
///
/// Does not surface the task error; call `error()` afterwards.
pub async fn wait_async(task: &dyn Task) {
    let mut rx = task.subscribe();
    // Err means the task was dropped, which can only happen after it finished.
    let _ = rx.wait_for(|done| *done).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_release_once() {
        let latch = Latch::new();
        assert!(!latch.is_released());
        assert!(latch.release());
        assert!(!latch.release());
        assert!(latch.is_released());
    }

    #[test]
    fn test_wait_after_release_returns_immediately() {
        let latch = Latch::new();
        latch.release();
        latch.wait();
        assert!(latch.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let latch = Latch::new();
        let start = Instant::now();
        assert!(!latch.wait_timeout(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_release_from_other_thread() {
        let latch = Arc::new(Latch::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        latch.release();

        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[tokio::test]
    async fn test_subscribe_observes_release() {
        let latch = Arc::new(Latch::new());
        let mut rx = latch.subscribe();
        assert!(!*rx.borrow());

        let releaser = Arc::clone(&latch);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            releaser.release();
        });

        rx.wait_for(|done| *done).await.unwrap();
        assert!(latch.is_released());
    }
}
