//! Writer pipeline: concurrent submission, single table writer
//!
//! Any number of producer threads call [`WriterPipeline::submit`]; exactly
//! one background thread per table ever mutates the file, serialized across
//! processes through the advisory lock with adaptive backoff. Submission
//! never blocks on I/O or lock contention.
//!
//! Shutdown contract: `finish()` disables the submission queue and joins
//! the worker, which drains every record already submitted - nothing
//! submitted before a clean shutdown is lost. The abort flag is the signal
//! path: lossy for records still queued, but the file operation in progress
//! always completes, so the table is never corrupted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::backoff::{BackoffPolicy, DeadtimeHistory};
use crate::config::{StoreConfig, TableRef};
use crate::error::{Error, Result};
use crate::lock::{FileLock, TableLock};
use crate::queue::WorkQueue;
use crate::record::ResultRecord;
use crate::table;

/// Accepts fit results from any number of threads and appends them to one
/// on-disk table.
#[derive(Debug)]
pub struct WriterPipeline {
    queue: Arc<WorkQueue<ResultRecord>>,
    worker: Option<JoinHandle<()>>,
    abort: Arc<AtomicBool>,
    submitted: AtomicU64,
    written: Arc<AtomicU64>,
}

impl WriterPipeline {
    /// Create the pipeline and spawn its writer thread, locking through the
    /// default advisory [`FileLock`] on the output path.
    ///
    /// # Errors
    ///
    /// Returns `CannotStore` when no output path/table name is configured.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let output = Self::required_output(config)?;
        let holder = format!("fitstore-writer:{}", output.table);
        let lock = Box::new(FileLock::new(&output.path, holder));
        Self::spawn(output, config.backoff(), lock)
    }

    /// Create the pipeline with an injected lock implementation. Used by
    /// exclusivity tests; also the seam for alternative lock realms.
    ///
    /// # Errors
    ///
    /// Returns `CannotStore` when no output path/table name is configured.
    pub fn with_table_lock(config: &StoreConfig, lock: Box<dyn TableLock>) -> Result<Self> {
        let output = Self::required_output(config)?;
        Self::spawn(output, config.backoff(), lock)
    }

    fn required_output(config: &StoreConfig) -> Result<TableRef> {
        let output = config.output().ok_or_else(|| {
            Error::CannotStore("output path and table name not configured".into())
        })?;
        if output.path.as_os_str().is_empty() || output.table.is_empty() {
            return Err(Error::CannotStore(
                "output path and table name must both be set".into(),
            ));
        }
        Ok(output.clone())
    }

    fn spawn(output: TableRef, policy: BackoffPolicy, lock: Box<dyn TableLock>) -> Result<Self> {
        let queue = Arc::new(WorkQueue::new());
        let abort = Arc::new(AtomicBool::new(false));
        let written = Arc::new(AtomicU64::new(0));

        let worker = {
            let queue = Arc::clone(&queue);
            let abort = Arc::clone(&abort);
            let written = Arc::clone(&written);
            thread::Builder::new()
                .name(format!("fitstore-writer-{}", output.table))
                .spawn(move || write_worker(&output, &queue, lock, &abort, &written, policy))?
        };

        Ok(Self {
            queue,
            worker: Some(worker),
            abort,
            submitted: AtomicU64::new(0),
            written,
        })
    }

    /// Enqueue a record for deferred saving. Returns immediately; ownership
    /// transfers to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `CannotStore` once shutdown has begun - data is never
    /// dropped silently.
    pub fn submit(&self, record: ResultRecord) -> Result<()> {
        if !self.queue.push(record) {
            return Err(Error::CannotStore(
                "no longer accepting fit results (shutdown begun)".into(),
            ));
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flag a signal handler may set: checked by the worker only at safe
    /// points (before a lock attempt, after acquisition, before commit).
    /// When set, the in-progress file operation completes and the process
    /// exits; records still queued are accepted losses.
    #[must_use]
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Number of records accepted by `submit` so far.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Number of records flushed to disk so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Close the pipeline: no further submissions are accepted, everything
    /// already submitted is drained to disk, and the writer thread has
    /// terminated on return. Idempotent; may block as long as a write is
    /// lock-blocked.
    pub fn finish(&mut self) {
        self.queue.disable();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("writer thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WriterPipeline {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Exits the process on the signal path. The lock is already released (or
/// was never taken); the table file is intact.
fn abort_exit(dropped: usize) -> ! {
    warn!(
        dropped,
        "abort requested; table closed cleanly, exiting without the remaining records"
    );
    std::process::exit(1);
}

fn write_worker(
    output: &TableRef,
    queue: &WorkQueue<ResultRecord>,
    mut lock: Box<dyn TableLock>,
    abort: &AtomicBool,
    written: &AtomicU64,
    policy: BackoffPolicy,
) {
    let mut history = DeadtimeHistory::new(policy);
    let mut rng = rand::thread_rng();
    let mut flushes: u64 = 0;

    while let Some(first) = queue.wait_and_pop() {
        // amortize one lock acquisition over the current burst
        let mut batch = vec![first];
        while let Some(record) = queue.try_pop() {
            batch.push(record);
        }

        // safe point: nothing in flight yet
        if abort.load(Ordering::SeqCst) {
            abort_exit(batch.len() + queue.len());
        }

        let attempt_started = Instant::now();
        loop {
            if abort.load(Ordering::SeqCst) {
                abort_exit(batch.len() + queue.len());
            }
            match lock.try_acquire() {
                Ok(true) => break,
                Ok(false) => {
                    let elapsed = attempt_started.elapsed().as_secs_f64();
                    let wait = history.next_wait(elapsed, &mut rng);
                    warn!(
                        table = %output.path.display(),
                        wait_s = wait,
                        "table is locked; backing off"
                    );
                    thread::sleep(Duration::from_secs_f64(wait));
                }
                Err(e) => {
                    let wait = history.next_wait(0.0, &mut rng);
                    error!("lock bookkeeping failed ({e}); retrying in {wait:.1}s");
                    thread::sleep(Duration::from_secs_f64(wait));
                }
            }
        }
        let deadtime = attempt_started.elapsed().as_secs_f64();
        history.record(deadtime);
        info!(deadtime_s = deadtime, "table lock acquired");

        // safe point: lock held, file untouched
        if abort.load(Ordering::SeqCst) {
            let _ = lock.release();
            abort_exit(batch.len() + queue.len());
        }

        match table::append_rows(output, &batch) {
            Ok(count) => {
                flushes += 1;
                written.fetch_add(count as u64, Ordering::Relaxed);
                info!(
                    count,
                    total = written.load(Ordering::Relaxed),
                    table = %output.path.display(),
                    "deferred saving of fit results successful"
                );
            }
            Err(e) => {
                // holding the lock with a failed write: nothing further can
                // be trusted to land in this file
                error!("cannot store fit results in {}: {e}", output.path.display());
                let _ = lock.release();
                std::process::exit(1);
            }
        }

        if let Err(e) = lock.release() {
            warn!("lock release failed: {e}");
        }

        // safe point: commit done, lock released
        if abort.load(Ordering::SeqCst) {
            abort_exit(queue.len());
        }
    }

    info!(
        flushes,
        total = written.load(Ordering::Relaxed),
        table = %output.path.display(),
        "writer finished; all submitted fit results flushed"
    );
}
