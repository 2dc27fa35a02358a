//! A unit of work executed periodically on a dedicated background thread.
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use rand::{thread_rng, Rng};

use super::Signal;
use crate::Result;

/// Work executed by a [`PeriodicTask`].
///
/// Any `FnMut() -> Result<()>` closure is a `Task` that has no init or teardown step.
pub trait Task: Send + 'static {
    /// Main unit of work, executed once per period and on [`PeriodicTask::force_run`].
    fn run(&mut self) -> Result<()>;

    /// Executed once on the background thread before the first period starts. If it fails, the
    /// task never enters the running state.
    fn on_init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Executed once after the task loop exits.
    fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> Task for F
where
    F: FnMut() -> Result<()> + Send + 'static,
{
    fn run(&mut self) -> Result<()> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Starting,
    Running,
    Stopping,
}

enum Command {
    ForceRun,
    Stop,
}

struct Control {
    state: State,
    commands: Option<Sender<Command>>,
    /// Signals to notify once the current run of the task has fully stopped.
    stop_waiters: Vec<Signal>,
}

/// Runs a [`Task`] every `period` on its own thread.
///
/// The task can be stopped gracefully, forced to run out of cycle and restarted after it stopped.
/// Errors and panics raised by the task are logged and never stop the loop: one bad run must not
/// disable every run after it.
pub struct PeriodicTask {
    name: String,
    period: Duration,
    jitter: Duration,
    task: Arc<Mutex<Box<dyn Task>>>,
    control: Arc<Mutex<Control>>,
}

impl PeriodicTask {
    /// Create a new idle task. Use [`PeriodicTask::start`] to launch it.
    pub fn new(name: impl Into<String>, period: Duration, task: impl Task) -> PeriodicTask {
        PeriodicTask {
            name: name.into(),
            period,
            jitter: Duration::ZERO,
            task: Arc::new(Mutex::new(Box::new(task))),
            control: Arc::new(Mutex::new(Control {
                state: State::Idle,
                commands: None,
                stop_waiters: Vec::new(),
            })),
        }
    }

    /// Shorten each period by a random duration of up to `jitter`. This helps to avoid many
    /// processes hitting the server at the same moment.
    pub fn with_jitter(mut self, jitter: Duration) -> PeriodicTask {
        self.jitter = jitter;
        self
    }

    /// Launch the background thread.
    ///
    /// Does nothing (apart from logging a warning) if the task has already been started.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread could not be spawned.
    pub fn start(&self) -> std::io::Result<()> {
        let mut control = lock(&self.control);
        if control.state != State::Idle {
            log::warn!(target: "splitsync", task = self.name.as_str(); "task is already running");
            return Ok(());
        }

        let (sender, receiver) = mpsc::channel();
        let worker = Worker {
            name: self.name.clone(),
            period: self.period,
            jitter: self.jitter,
            task: Arc::clone(&self.task),
            control: Arc::clone(&self.control),
            commands: receiver,
        };

        std::thread::Builder::new()
            .name(format!("splitsync-{}", self.name))
            .spawn(move || worker.run())?;

        control.state = State::Starting;
        control.commands = Some(sender);
        Ok(())
    }

    /// Request the task to stop.
    ///
    /// This does not wait for the thread to exit. If `done` is provided, it is set once the
    /// teardown has finished and the task is no longer running (immediately, if the task is not
    /// running).
    pub fn stop(&self, done: Option<Signal>) {
        let mut control = lock(&self.control);
        if control.state == State::Idle {
            drop(control);
            log::debug!(target: "splitsync", task = self.name.as_str(); "stop requested on a task that is not running");
            if let Some(done) = done {
                done.set();
            }
            return;
        }

        if let Some(done) = done {
            control.stop_waiters.push(done);
        }
        if control.state != State::Stopping {
            control.state = State::Stopping;
            if let Some(commands) = &control.commands {
                // Error means the thread is already gone; it notifies waiters on its way out.
                let _ = commands.send(Command::Stop);
            }
        }
    }

    /// Run the task once, out of cycle, without moving the next scheduled run.
    ///
    /// Does nothing if the task is not running.
    pub fn force_run(&self) {
        let control = lock(&self.control);
        if control.state != State::Running {
            log::debug!(target: "splitsync", task = self.name.as_str(); "force run requested on a task that is not running");
            return;
        }
        if let Some(commands) = &control.commands {
            let _ = commands.send(Command::ForceRun);
        }
    }

    /// Returns `true` if the task has started and has not yet finished stopping.
    pub fn running(&self) -> bool {
        matches!(lock(&self.control).state, State::Running | State::Stopping)
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        // Otherwise the thread would keep running with nobody able to stop it.
        self.stop(None);
    }
}

struct Worker {
    name: String,
    period: Duration,
    jitter: Duration,
    task: Arc<Mutex<Box<dyn Task>>>,
    control: Arc<Mutex<Control>>,
    commands: Receiver<Command>,
}

impl Worker {
    fn run(self) {
        {
            let mut task = lock(&self.task);
            if self.execute("init", || task.on_init()) {
                self.enter_running();
                self.run_loop(&mut task);
                self.execute("teardown", || task.on_stop());
            } else {
                log::error!(target: "splitsync", task = self.name.as_str(); "task initialization failed, task will not run");
            }
        }

        let waiters = {
            let mut control = lock(&self.control);
            control.state = State::Idle;
            control.commands = None;
            std::mem::take(&mut control.stop_waiters)
        };
        log::debug!(target: "splitsync", task = self.name.as_str(); "task stopped");
        for waiter in waiters {
            waiter.set();
        }
    }

    fn enter_running(&self) {
        let mut control = lock(&self.control);
        // A stop may have been requested while init was running. Keep the stopping state, the
        // loop picks up the stop command right away.
        if control.state == State::Starting {
            control.state = State::Running;
        }
    }

    fn run_loop(&self, task: &mut Box<dyn Task>) {
        let mut next_run = Instant::now() + jitter(self.period, self.jitter);
        loop {
            let timeout = next_run.saturating_duration_since(Instant::now());
            match self.commands.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {
                    self.execute("run", || task.run());
                    next_run = Instant::now() + jitter(self.period, self.jitter);
                }
                Ok(Command::ForceRun) => {
                    self.execute("forced run", || task.run());
                }
                Ok(Command::Stop) => {
                    log::debug!(target: "splitsync", task = self.name.as_str(); "task received stop command");
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::debug!(target: "splitsync", task = self.name.as_str(); "task control channel disconnected");
                    return;
                }
            }
        }
    }

    /// Execute one step of the task, catching errors and panics. Returns `true` on success.
    fn execute(&self, step: &str, f: impl FnOnce() -> Result<()>) -> bool {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                log::warn!(target: "splitsync", task = self.name.as_str(), step; "task failed: {}", err);
                false
            }
            Err(_panic) => {
                log::error!(target: "splitsync", task = self.name.as_str(), step; "task panicked");
                false
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // User code never runs while the control lock is held, and the task lock is held across
    // `catch_unwind`, so a poisoned lock still guards consistent data.
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::{Duration, Instant},
    };

    use super::{PeriodicTask, Task};
    use crate::{tasks::Signal, Error, Result};

    #[derive(Default, Clone)]
    struct Counters {
        inits: Arc<AtomicUsize>,
        runs: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    struct CountingTask {
        counters: Counters,
        fail_init: bool,
        fail_run: bool,
    }

    impl CountingTask {
        fn new(counters: &Counters) -> CountingTask {
            CountingTask {
                counters: counters.clone(),
                fail_init: false,
                fail_run: false,
            }
        }
    }

    impl Task for CountingTask {
        fn run(&mut self) -> Result<()> {
            self.counters.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_run {
                return Err(Error::Api { status: 500 });
            }
            Ok(())
        }

        fn on_init(&mut self) -> Result<()> {
            self.counters.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(Error::Unauthorized);
            }
            Ok(())
        }

        fn on_stop(&mut self) -> Result<()> {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn runs_periodically_until_stopped() {
        let counters = Counters::default();
        let task = PeriodicTask::new(
            "counting",
            Duration::from_millis(10),
            CountingTask::new(&counters),
        );

        task.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || counters
            .runs
            .load(Ordering::SeqCst)
            >= 3));
        assert!(task.running());

        let done = Signal::new();
        task.stop(Some(done.clone()));
        assert!(done.wait_timeout(Duration::from_secs(5)));

        assert!(!task.running());
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_init_prevents_running() {
        let counters = Counters::default();
        let mut work = CountingTask::new(&counters);
        work.fail_init = true;
        let task = PeriodicTask::new("failing-init", Duration::from_millis(5), work);

        task.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || counters
            .inits
            .load(Ordering::SeqCst)
            == 1));
        std::thread::sleep(Duration::from_millis(50));

        assert!(!task.running());
        assert_eq!(counters.runs.load(Ordering::SeqCst), 0);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_on_idle_task_sets_signal_immediately() {
        let task = PeriodicTask::new("idle", Duration::from_secs(60), || -> Result<()> { Ok(()) });
        let done = Signal::new();

        task.stop(Some(done.clone()));

        assert!(done.is_set());
    }

    #[test]
    fn stop_completes_when_every_run_fails() {
        let counters = Counters::default();
        let mut work = CountingTask::new(&counters);
        work.fail_run = true;
        let task = PeriodicTask::new("failing-run", Duration::from_millis(5), work);

        task.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || counters
            .runs
            .load(Ordering::SeqCst)
            >= 3));

        let done = Signal::new();
        task.stop(Some(done.clone()));

        assert!(done.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn panics_do_not_stop_the_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = {
            let runs = runs.clone();
            PeriodicTask::new("panicking", Duration::from_millis(5), move || -> Result<()> {
                if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run blows up");
                }
                Ok(())
            })
        };

        task.start().unwrap();

        assert!(wait_until(Duration::from_secs(5), || runs
            .load(Ordering::SeqCst)
            >= 3));
        task.stop(None);
    }

    #[test]
    fn force_run_executes_out_of_cycle() {
        let counters = Counters::default();
        let task = PeriodicTask::new(
            "forced",
            Duration::from_secs(3600),
            CountingTask::new(&counters),
        );
        task.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || task.running()));

        task.force_run();

        assert!(wait_until(Duration::from_secs(5), || counters
            .runs
            .load(Ordering::SeqCst)
            == 1));
        task.stop(None);
    }

    #[test]
    fn force_run_keeps_the_schedule() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let task = {
            let runs = runs.clone();
            PeriodicTask::new("schedule", Duration::from_millis(400), move || -> Result<()> {
                runs.lock().unwrap().push(Instant::now());
                Ok(())
            })
        };
        let started = Instant::now();
        task.start().unwrap();

        std::thread::sleep(Duration::from_millis(150));
        task.force_run();
        assert!(wait_until(Duration::from_secs(5), || runs.lock().unwrap().len() >= 2));
        task.stop(None);

        let runs = runs.lock().unwrap();
        let forced = runs[0].duration_since(started);
        let periodic = runs[1].duration_since(started);
        assert!(forced < Duration::from_millis(400));
        // Rescheduling after the forced run would push this past 550ms.
        assert!(periodic >= Duration::from_millis(400));
        assert!(periodic < Duration::from_millis(530), "periodic run at {periodic:?}");
    }

    #[test]
    fn force_run_on_stopped_task_does_nothing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = {
            let runs = runs.clone();
            PeriodicTask::new("not-started", Duration::from_secs(3600), move || -> Result<()> {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };

        task.force_run();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn teardown_runs_once_for_repeated_stops() {
        let counters = Counters::default();
        let task = PeriodicTask::new(
            "double-stop",
            Duration::from_secs(3600),
            CountingTask::new(&counters),
        );
        task.start().unwrap();

        let first = Signal::new();
        let second = Signal::new();
        task.stop(Some(first.clone()));
        task.stop(Some(second.clone()));

        assert!(first.wait_timeout(Duration::from_secs(5)));
        assert!(second.wait_timeout(Duration::from_secs(5)));
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_start_is_ignored() {
        let counters = Counters::default();
        let task = PeriodicTask::new(
            "double-start",
            Duration::from_secs(3600),
            CountingTask::new(&counters),
        );

        task.start().unwrap();
        task.start().unwrap();
        let done = Signal::new();
        task.stop(Some(done.clone()));
        assert!(done.wait_timeout(Duration::from_secs(5)));

        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn can_be_restarted_after_stop() {
        let counters = Counters::default();
        let task = PeriodicTask::new(
            "restart",
            Duration::from_secs(3600),
            CountingTask::new(&counters),
        );

        for _ in 0..2 {
            task.start().unwrap();
            let done = Signal::new();
            task.stop(Some(done.clone()));
            assert!(done.wait_timeout(Duration::from_secs(5)));
        }

        assert_eq!(counters.inits.load(Ordering::SeqCst), 2);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(30);

        let result = super::jitter(interval, Duration::from_secs(30));

        assert!(result <= interval, "{result:?} must be <= {interval:?}");
    }

    #[test]
    fn jitter_truncates_to_zero() {
        assert_eq!(
            super::jitter(Duration::ZERO, Duration::from_secs(30)),
            Duration::ZERO
        );
    }
}
