//! Background execution primitives every synchronization activity is built on.
//!
//! [`PeriodicTask`] runs a unit of work on a fixed period on its own thread. [`WorkerPool`] fans
//! independent jobs out to a fixed set of threads. [`Signal`] lets callers learn when either of
//! them has really stopped.
mod periodic;
mod signal;
mod worker_pool;

pub use periodic::{PeriodicTask, Task};
pub use signal::Signal;
pub use worker_pool::{JobHandler, WorkerPool};
