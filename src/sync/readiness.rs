use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::Duration,
};

use crate::{Error, Result};

/// Lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Data has not been synchronized yet.
    NotReady,
    /// Splits and segments have been synchronized at least once.
    Ready,
    /// The client has been destroyed. Final.
    Destroyed,
}

struct State {
    status: Status,
    error: Option<Error>,
}

/// Readiness flag that callers can block on.
///
/// `NotReady` moves to `Ready` once; `Destroyed` can be reached from either.
pub struct Readiness {
    state: Mutex<State>,
    changed: Condvar,
}

impl Default for Readiness {
    fn default() -> Readiness {
        Readiness::new()
    }
}

impl Readiness {
    /// Create a readiness that is not ready yet.
    pub fn new() -> Readiness {
        Readiness {
            state: Mutex::new(State {
                status: Status::NotReady,
                error: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.lock().status
    }

    /// Move to `Ready`. Returns `false` if the client was not waiting to become ready.
    pub fn mark_ready(&self) -> bool {
        let mut state = self.lock();
        if state.status != Status::NotReady {
            return false;
        }
        state.status = Status::Ready;
        drop(state);
        self.changed.notify_all();
        log::info!(target: "splitsync", "client is ready");
        true
    }

    /// Move to `Destroyed` for good, waking up every waiter.
    pub fn mark_destroyed(&self) {
        self.lock().status = Status::Destroyed;
        self.changed.notify_all();
    }

    /// Record an error that prevents the client from ever becoming ready. Waiters get it back.
    pub fn fail(&self, error: Error) {
        let mut state = self.lock();
        if state.status == Status::NotReady {
            state.error = Some(error);
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Block until ready, failed or destroyed, for at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if still not ready after `timeout`.
    /// - [`Error::Destroyed`] if the client has been destroyed.
    /// - The error given to [`Readiness::fail`], if any.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| {
                state.status == Status::NotReady && state.error.is_none()
            })
            .unwrap_or_else(|err| err.into_inner());

        match (state.status, &state.error) {
            (Status::Ready, _) => Ok(()),
            (Status::Destroyed, _) => Err(Error::Destroyed),
            (Status::NotReady, Some(error)) => Err(error.clone()),
            (Status::NotReady, None) => Err(Error::Timeout(timeout)),
        }
    }
}
