//! Cancellable one-shot timers.
//!
//! Each timer is a named background thread parked on an `mpsc` receive
//! with a deadline.  The deadline expiring runs the action; a message or
//! a dropped sender cancels it.  The caller's thread never sleeps.
//!
//! ```text
//!  TimerHandle ──tx──▶ [ timer thread: rx.recv_timeout(after) ]
//!                          Timeout      → action()
//!                          Ok / Closed  → cancelled
//! ```

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;

pub struct TimerHandle {
    cancel_tx: Option<Sender<()>>,
    fired: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Run `action` on a thread called `name` once `after` has elapsed,
    /// unless cancelled first.
    pub fn schedule(
        name: &str,
        after: Duration,
        action: impl FnOnce() + Send + 'static,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = Arc::clone(&fired);
        let label = name.to_owned();

        let thread = std::thread::Builder::new()
            .name(label.clone())
            .stack_size(16 * 1024)
            .spawn(move || match rx.recv_timeout(after) {
                Err(RecvTimeoutError::Timeout) => {
                    fired_flag.store(true, Ordering::SeqCst);
                    action();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("timer '{label}' cancelled");
                }
            })?;

        Ok(Self {
            cancel_tx: Some(tx),
            fired,
            thread: Some(thread),
        })
    }

    /// Stop the timer if it has not fired yet.  Idempotent.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            // The thread may have already exited; nothing to do then.
            let _ = tx.send(());
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.cancel_tx.is_some() && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel and wait for the timer thread to exit.
    pub fn join(mut self) {
        self.cancel();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
