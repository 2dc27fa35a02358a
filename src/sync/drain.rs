//! Draining of locally-produced records to the backend.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{api::RecordSender, storage::BoundedQueue, tasks::Task, Result};

/// Ships locally-produced data to the backend.
pub trait Recorder: Send + Sync + 'static {
    /// Ship one batch.
    fn synchronize(&self) -> Result<()>;

    /// Ship everything that is left, on shutdown.
    fn flush(&self) -> Result<()> {
        self.synchronize()
    }
}

/// Adapts a [`Recorder`] to a [`PeriodicTask`](crate::tasks::PeriodicTask): ships a batch on
/// every run and flushes when the task stops.
pub struct RecorderTask<S: ?Sized>(pub Arc<S>);

impl<S: Recorder + ?Sized> Task for RecorderTask<S> {
    fn run(&mut self) -> Result<()> {
        self.0.synchronize()
    }

    fn on_stop(&mut self) -> Result<()> {
        self.0.flush()
    }
}

/// Pops batches of records from a [`BoundedQueue`] and ships them with a [`RecordSender`].
///
/// A batch that fails to ship is kept aside and goes first (up to the bulk size) on the next
/// run, topped up with fresh records from the queue.
pub struct RecordSynchronizer<R> {
    name: &'static str,
    queue: Arc<BoundedQueue<R>>,
    sender: Arc<dyn RecordSender<R>>,
    bulk_size: usize,
    failed: Mutex<VecDeque<R>>,
}

impl<R: Send + 'static> RecordSynchronizer<R> {
    /// Create a synchronizer draining `queue` into `sender`, `bulk_size` records at a time.
    pub fn new(
        name: &'static str,
        queue: Arc<BoundedQueue<R>>,
        sender: Arc<dyn RecordSender<R>>,
        bulk_size: usize,
    ) -> RecordSynchronizer<R> {
        RecordSynchronizer {
            name,
            queue,
            sender,
            bulk_size: bulk_size.max(1),
            failed: Mutex::new(VecDeque::new()),
        }
    }

    /// The queue being drained.
    pub fn queue(&self) -> &Arc<BoundedQueue<R>> {
        &self.queue
    }

    /// Number of records waiting to be shipped again.
    pub fn failed_len(&self) -> usize {
        self.failed().len()
    }

    fn failed(&self) -> MutexGuard<'_, VecDeque<R>> {
        self.failed.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn next_batch(&self) -> Vec<R> {
        let mut batch: Vec<R> = {
            let mut failed = self.failed();
            let count = failed.len().min(self.bulk_size);
            failed.drain(..count).collect()
        };
        if batch.len() < self.bulk_size {
            batch.extend(self.queue.pop_many(self.bulk_size - batch.len()));
        }
        batch
    }
}

impl<R: Send + 'static> Recorder for RecordSynchronizer<R> {
    fn synchronize(&self) -> Result<()> {
        let batch = self.next_batch();
        if batch.is_empty() {
            return Ok(());
        }

        match self.sender.send(&batch) {
            Ok(()) => {
                log::debug!(target: "splitsync", records = self.name, count = batch.len(); "records shipped");
                Ok(())
            }
            Err(err) => {
                log::warn!(target: "splitsync",
                    records = self.name,
                    count = batch.len();
                    "failed to ship records, will retry on next run: {}", err);
                self.failed().extend(batch);
                Err(err)
            }
        }
    }

    fn flush(&self) -> Result<()> {
        while !self.queue.is_empty() || self.failed_len() > 0 {
            self.synchronize()?;
        }
        Ok(())
    }
}
