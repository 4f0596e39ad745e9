//! Open/close serialization gate
//!
//! One gate per device admits a single open or close critical section at a
//! time. Acquisition comes in two policies:
//! [`Gate::lock_interruptible`] gives up when the caller's token is
//! cancelled, [`Gate::lock_or_proceed`] gives up the same way but lets the
//! caller carry on without the gate. Either takes a free gate at once, even
//! with a cancelled token; cancellation only ends a wait.

use common::{CancelToken, Error, Result};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// How often a blocked waiter rechecks its cancellation token
const CANCEL_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
pub struct Gate {
    held: Mutex<bool>,
    released: Condvar,
}

/// Held gate, released on drop
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a Gate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        *self.gate.state() = false;
        self.gate.released.notify_one();
    }
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    // The flag is only ever flipped whole, so a poisoned lock is still valid
    fn state(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for the gate, failing with [`Error::Interrupted`] on cancellation
    pub fn lock_interruptible(&self, cancel: &CancelToken) -> Result<GateGuard<'_>> {
        let mut held = self.state();
        loop {
            if !*held {
                *held = true;
                return Ok(GateGuard { gate: self });
            }
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            held = match self.released.wait_timeout(held, CANCEL_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Wait for the gate, returning `None` on cancellation
    ///
    /// The caller proceeds either way.
    pub fn lock_or_proceed(&self, cancel: &CancelToken) -> Option<GateGuard<'_>> {
        match self.lock_interruptible(cancel) {
            Ok(guard) => Some(guard),
            Err(_) => {
                debug!("Gate acquisition interrupted, proceeding without it");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_exclusive() {
        let gate = Arc::new(Gate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    let cancel = CancelToken::new();
                    for _ in 0..20 {
                        let _guard = gate.lock_interruptible(&cancel).unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(200));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interruptible_fails_when_cancelled() {
        let gate = Gate::new();
        let _held = gate.lock_interruptible(&CancelToken::new()).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            gate.lock_interruptible(&cancel),
            Err(Error::Interrupted)
        ));
    }

    #[test]
    fn test_cancel_wakes_blocked_waiter() {
        let gate = Arc::new(Gate::new());
        let held = gate.lock_interruptible(&CancelToken::new()).unwrap();

        let cancel = CancelToken::new();
        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                let interrupted = gate.lock_interruptible(&cancel).is_err();
                interrupted
            })
        };

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert!(waiter.join().unwrap());
        drop(held);
    }

    #[test]
    fn test_lock_or_proceed() {
        let gate = Gate::new();
        assert!(gate.lock_or_proceed(&CancelToken::new()).is_some());

        let _held = gate.lock_interruptible(&CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(gate.lock_or_proceed(&cancel).is_none());
    }

    #[test]
    fn test_free_gate_taken_with_cancelled_token() {
        let gate = Gate::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let guard = gate.lock_or_proceed(&cancel);
        assert!(guard.is_some());
        // Held now, so a second cancelled attempt gives up
        assert!(gate.lock_or_proceed(&cancel).is_none());

        drop(guard);
        assert!(gate.lock_interruptible(&cancel).is_ok());
    }

    #[test]
    fn test_release_wakes_waiter() {
        let gate = Arc::new(Gate::new());
        let held = gate.lock_interruptible(&CancelToken::new()).unwrap();

        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || {
                let _guard = gate.lock_interruptible(&CancelToken::new()).unwrap();
                Instant::now()
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        let released_at = Instant::now();
        drop(held);

        let acquired_at = waiter.join().unwrap();
        assert!(acquired_at >= released_at);
    }
}
