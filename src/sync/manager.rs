use std::sync::{Arc, Mutex};

use super::{Readiness, Status, Synchronizer};
use crate::{Error, Result};

/// Owns the synchronization lifecycle of a client: initial synchronization, background tasks and
/// shutdown.
pub struct Manager {
    synchronizer: Arc<Synchronizer>,
    readiness: Arc<Readiness>,
    max_retries: Option<u32>,
    /// Set once stopped. Starting background tasks happens under this lock so that nothing gets
    /// started after a stop.
    stopped: Mutex<bool>,
}

impl Manager {
    /// Create a manager. `max_retries` bounds the initial synchronization, `None` retries forever.
    pub fn new(
        synchronizer: Arc<Synchronizer>,
        readiness: Arc<Readiness>,
        max_retries: Option<u32>,
    ) -> Manager {
        Manager {
            synchronizer,
            readiness,
            max_retries,
            stopped: Mutex::new(false),
        }
    }

    /// Synchronize splits and segments, mark the client ready and start background tasks.
    ///
    /// If the initial synchronization gives up, background tasks are started anyway and the
    /// client becomes ready after the first successful periodic split fetch.
    ///
    /// # Errors
    ///
    /// Returns unrecoverable synchronization errors, in which case nothing is started, and
    /// [`Error::Io`] if a background thread could not be spawned.
    pub fn start(&self) -> Result<()> {
        let synchronized = self.synchronizer.sync_all(self.max_retries)?;

        let stopped = self.stopped.lock().unwrap_or_else(|err| err.into_inner());
        if *stopped {
            log::debug!(target: "splitsync", "manager stopped during initial synchronization");
            return Ok(());
        }

        if synchronized {
            self.readiness.mark_ready();
        } else {
            log::warn!(target: "splitsync", "initial synchronization failed, starting in degraded mode");
        }
        self.synchronizer.start_periodic_fetching()?;
        self.synchronizer.start_periodic_data_recording()?;
        Ok(())
    }

    /// Current readiness of the client.
    pub fn status(&self) -> Status {
        self.readiness.status()
    }

    /// Stop every background activity and mark the client destroyed. Later calls do nothing.
    pub fn stop(&self, blocking: bool) {
        {
            let mut stopped = self.stopped.lock().unwrap_or_else(|err| err.into_inner());
            if *stopped {
                return;
            }
            *stopped = true;
        }
        self.synchronizer.shutdown(blocking);
        self.readiness.mark_destroyed();
    }

    /// Returns an error if the manager has been stopped.
    pub(crate) fn ensure_running(&self) -> Result<()> {
        if *self.stopped.lock().unwrap_or_else(|err| err.into_inner()) {
            return Err(Error::Destroyed);
        }
        Ok(())
    }
}
