//! Single-flight debouncing of refresh callbacks.
//!
//! Server events tend to arrive in bursts (a node restart produces several
//! topology and status changes). Each one asks for a metadata refresh, but
//! running the refresh once per event is wasteful. The debouncer runs at
//! most one refresh at a time and remembers at most one follow-up: the
//! most recently requested one.

use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

type Job = Box<dyn FnOnce() + Send>;

enum State {
    Idle,
    Running,
    RunningWithPending(Job),
}

/// Coalesces concurrent calls into one running and one pending execution.
pub struct SingleFlightDebouncer {
    state: Mutex<State>,
}

impl SingleFlightDebouncer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the calling thread if nothing is running.
    ///
    /// Otherwise `f` replaces any pending function and the call returns
    /// immediately; the thread that is running drains the pending slot
    /// before it returns.
    pub fn debounce<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.lock();
            if !matches!(*state, State::Idle) {
                *state = State::RunningWithPending(Box::new(f));
                return;
            }
            *state = State::Running;
        }

        let _reset = ResetOnUnwind(self);
        let mut job: Job = Box::new(f);
        loop {
            job();
            let mut state = self.lock();
            match mem::replace(&mut *state, State::Idle) {
                State::RunningWithPending(next) => {
                    *state = State::Running;
                    job = next;
                }
                State::Idle | State::Running => return,
            }
        }
    }

    /// Returns true while a function is executing.
    pub fn is_running(&self) -> bool {
        !matches!(*self.lock(), State::Idle)
    }
}

impl Default for SingleFlightDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the debouncer to idle if a job panics, so later calls still run.
struct ResetOnUnwind<'a>(&'a SingleFlightDebouncer);

impl Drop for ResetOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            *self.0.lock() = State::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn idle_call_runs_inline() {
        let debouncer = SingleFlightDebouncer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        debouncer.debounce(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_running());
    }

    #[test]
    fn three_concurrent_calls_run_twice() {
        let debouncer = Arc::new(SingleFlightDebouncer::new());
        let completions = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Arc::new(Mutex::new(gate_rx));

        let job = {
            let completions = Arc::clone(&completions);
            move || {
                let completions = Arc::clone(&completions);
                let started_tx = started_tx.clone();
                let gate_rx = Arc::clone(&gate_rx);
                move || {
                    started_tx.send(()).unwrap();
                    gate_rx.lock().unwrap().recv().unwrap();
                    completions.fetch_add(1, Ordering::SeqCst);
                }
            }
        };

        let first = {
            let debouncer = Arc::clone(&debouncer);
            let f = job();
            thread::spawn(move || debouncer.debounce(f))
        };
        started_rx.recv().unwrap();

        // Both return immediately: one becomes pending, then is replaced.
        let others: Vec<_> = (0..2)
            .map(|_| {
                let debouncer = Arc::clone(&debouncer);
                let f = job();
                thread::spawn(move || debouncer.debounce(f))
            })
            .collect();
        for handle in others {
            handle.join().unwrap();
        }

        gate_tx.send(()).unwrap();
        started_rx.recv().unwrap();
        gate_tx.send(()).unwrap();
        first.join().unwrap();

        assert_eq!(completions.load(Ordering::SeqCst), 2);
        assert!(started_rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(!debouncer.is_running());
    }

    #[test]
    fn latest_pending_call_wins() {
        let debouncer = Arc::new(SingleFlightDebouncer::new());
        let ran = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();

        let first = {
            let debouncer = Arc::clone(&debouncer);
            let ran = Arc::clone(&ran);
            thread::spawn(move || {
                debouncer.debounce(move || {
                    started_tx.send(()).unwrap();
                    gate_rx.recv().unwrap();
                    ran.lock().unwrap().push(0);
                });
            })
        };
        started_rx.recv().unwrap();

        for i in 1..=5 {
            let ran = Arc::clone(&ran);
            debouncer.debounce(move || ran.lock().unwrap().push(i));
        }
        gate_tx.send(()).unwrap();
        first.join().unwrap();

        assert_eq!(*ran.lock().unwrap(), vec![0, 5]);
    }

    #[test]
    fn panicking_job_does_not_wedge_the_debouncer() {
        let debouncer = SingleFlightDebouncer::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            debouncer.debounce(|| panic!("refresh failed"));
        }));
        assert!(result.is_err());
        assert!(!debouncer.is_running());

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        debouncer.debounce(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
