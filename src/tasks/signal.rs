use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

/// A one-shot, clonable completion flag.
///
/// Used to learn when a background activity has really finished (e.g., passed to
/// [`PeriodicTask::stop`](super::PeriodicTask::stop)). All clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Signal {
    /// Create a new signal that is not set.
    pub fn new() -> Signal {
        Signal::default()
    }

    /// Set the signal, waking up all waiters.
    pub fn set(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|err| err.into_inner()) = true;
        cvar.notify_all();
    }

    /// Returns `true` if the signal has been set.
    pub fn is_set(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Block until the signal is set.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut set = lock.lock().unwrap_or_else(|err| err.into_inner());
        while !*set {
            set = cvar.wait(set).unwrap_or_else(|err| err.into_inner());
        }
    }

    /// Block until the signal is set or `timeout` elapses. Returns whether the signal was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let set = lock.lock().unwrap_or_else(|err| err.into_inner());
        let (set, _) = cvar
            .wait_timeout_while(set, timeout, |set| !*set)
            .unwrap_or_else(|err| err.into_inner());
        *set
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Signal;

    #[test]
    fn can_be_set_from_another_thread() {
        let signal = Signal::new();

        {
            let signal = signal.clone();
            std::thread::spawn(move || signal.set());
        }

        signal.wait();
        assert!(signal.is_set());
    }

    #[test]
    fn wait_timeout_returns_false_when_not_set() {
        let signal = Signal::new();

        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }
}
