//! Background space watcher
//!
//! A dedicated thread that runs a refresh callback on a timer, or immediately
//! when signalled. It only observes: the callback publishes statistics and must
//! not change anything allocation depends on.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Default)]
struct WatchState {
    pending: bool,
    shutdown: bool,
}

#[derive(Default)]
struct Signal {
    state: Mutex<WatchState>,
    cond: Condvar,
}

/// Handle to the watcher thread; dropping it stops and joins the thread
pub struct SpaceWatcher {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl SpaceWatcher {
    /// Start a thread that calls `refresh` now, every `interval`, and on `signal`
    pub fn spawn<F>(interval: Duration, mut refresh: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(Signal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name("burrow-space-watcher".to_string())
            .spawn(move || {
                refresh();
                loop {
                    {
                        let mut state = thread_signal.state.lock();
                        if !state.pending && !state.shutdown {
                            thread_signal.cond.wait_for(&mut state, interval);
                        }
                        if state.shutdown {
                            break;
                        }
                        state.pending = false;
                    }
                    refresh();
                }
                tracing::debug!("Space watcher stopped");
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Ask for a refresh without waiting for the timer
    pub fn signal(&self) {
        self.signal.state.lock().pending = true;
        self.signal.cond.notify_one();
    }
}

impl Drop for SpaceWatcher {
    fn drop(&mut self) {
        self.signal.state.lock().shutdown = true;
        self.signal.cond.notify_one();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Space watcher thread panicked");
            }
        }
    }
}
