//! Reader pipeline: quality-gated streaming of stored fit results
//!
//! One background thread per read session streams every row of the
//! configured shards, in on-disk order per shard and configured shard
//! order, through the quality gate onto an output queue. A shard that is
//! absent, corrupt or belongs to a different table is logged and skipped -
//! a bad shard never aborts the whole read.
//!
//! Lifecycle protocol: the wrapped per-record objects are conventionally
//! not destructible from an arbitrary thread, so a handed-out record is
//! never dropped by its consumer. The consumer calls [`release`], which
//! parks the record on a release queue; [`purge`] - interleaved with reads
//! by the worker, and callable by the owning thread - drains and destroys
//! everything queued. `release` stays safe after the pipeline has shut
//! down.
//!
//! [`release`]: ReaderPipeline::release
//! [`purge`]: ReaderPipeline::purge

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::{ShardSpec, StoreConfig, TableRef};
use crate::error::{Error, Result};
use crate::gate::{QualityGate, QualityVerdict, RejectReason};
use crate::queue::WorkQueue;
use crate::record::ResultRecord;
use crate::table;

/// Progress log cadence, in accepted records.
const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    rejected_covariance: AtomicU64,
    rejected_status: AtomicU64,
    rejected_stuck: AtomicU64,
    skipped_shards: AtomicU64,
}

impl Counters {
    fn bump_rejection(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::CovarianceQuality => &self.rejected_covariance,
            RejectReason::OptimizerStatus => &self.rejected_status,
            RejectReason::ParametersStuck => &self.rejected_stuck,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReadCounters {
        ReadCounters {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_covariance: self.rejected_covariance.load(Ordering::Relaxed),
            rejected_status: self.rejected_status.load(Ordering::Relaxed),
            rejected_stuck: self.rejected_stuck.load(Ordering::Relaxed),
            skipped_shards: self.skipped_shards.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of read-session accounting: accepted count and the
/// rejection-cause breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCounters {
    /// Rows accepted by the quality gate and streamed.
    pub accepted: u64,
    /// Rows rejected for a covariance-quality rank below the minimum.
    pub rejected_covariance: u64,
    /// Rows rejected for a negative final optimizer status.
    pub rejected_status: u64,
    /// Rows rejected because too many parameters never moved.
    pub rejected_stuck: u64,
    /// Shards skipped (absent, corrupt, or table mismatch).
    pub skipped_shards: u64,
}

impl ReadCounters {
    /// Total rejected rows across all causes.
    #[must_use]
    pub const fn rejected_total(&self) -> u64 {
        self.rejected_covariance + self.rejected_status + self.rejected_stuck
    }
}

/// Streams accepted fit results out of one or more table shards.
#[derive(Debug)]
pub struct ReaderPipeline {
    output: Arc<WorkQueue<ResultRecord>>,
    release: Arc<WorkQueue<ResultRecord>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl ReaderPipeline {
    /// Resolve the configured shards (a pattern is expanded exactly once,
    /// matches sorted) and spawn the streaming thread.
    ///
    /// # Errors
    ///
    /// Returns `CannotRead` when no shards are configured, the pattern is
    /// invalid, or the pattern matches nothing.
    pub fn start(config: &StoreConfig) -> Result<Self> {
        let shards = resolve_shards(config)?;
        let gate = QualityGate::new(config.min_covariance_quality());
        let cutoff = config.read_cutoff();

        let output = Arc::new(WorkQueue::new());
        let release = Arc::new(WorkQueue::new());
        let counters = Arc::new(Counters::default());

        let worker = {
            let output = Arc::clone(&output);
            let release = Arc::clone(&release);
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name("fitstore-reader".into())
                .spawn(move || read_worker(&shards, gate, cutoff, &output, &release, &counters))?
        };

        Ok(Self {
            output,
            release,
            worker: Some(worker),
            counters,
        })
    }

    /// Pull the next accepted record; `None` once the session is drained.
    /// Ownership transfers to the caller, who must eventually [`release`]
    /// it.
    ///
    /// [`release`]: Self::release
    pub fn next(&self) -> Option<ResultRecord> {
        self.output.wait_and_pop()
    }

    /// Hand a borrowed record back for destruction on the owning thread.
    /// The releasing thread must not touch the record afterwards. Safe to
    /// call after the pipeline has shut down.
    pub fn release(&self, record: ResultRecord) {
        // the release queue is never disabled, so this always lands
        let _ = self.release.push(record);
    }

    /// Destroy everything on the release queue. Invoked from the thread
    /// permitted to destroy wrapped objects; the worker interleaves this
    /// with reads.
    pub fn purge(&self) {
        while let Some(record) = self.release.try_pop() {
            drop(record);
        }
    }

    /// Current accounting snapshot.
    #[must_use]
    pub fn counters(&self) -> ReadCounters {
        self.counters.snapshot()
    }
}

impl Drop for ReaderPipeline {
    fn drop(&mut self) {
        // stop feeding a consumer that no longer exists
        self.output.disable();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("reader thread panicked during shutdown");
            }
        }
        self.purge();
    }
}

fn resolve_shards(config: &StoreConfig) -> Result<Vec<TableRef>> {
    let shards = match config.shards() {
        None => {
            return Err(Error::CannotRead(
                "no files to read fit results from are configured".into(),
            ))
        }
        Some(ShardSpec::List(list)) => list.clone(),
        Some(ShardSpec::Pattern {
            directory,
            filename_pattern,
            table,
        }) => expand_pattern(directory, filename_pattern, table)?,
    };
    if shards.is_empty() {
        return Err(Error::CannotRead("shard list is empty".into()));
    }
    Ok(shards)
}

fn expand_pattern(directory: &Path, filename_pattern: &str, table: &str) -> Result<Vec<TableRef>> {
    let regex = Regex::new(filename_pattern)
        .map_err(|e| Error::CannotRead(format!("invalid shard pattern: {e}")))?;
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)
        .map_err(|e| Error::CannotRead(format!("cannot scan {}: {e}", directory.display())))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| regex.is_match(n)) {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths
        .into_iter()
        .map(|path| TableRef::new(path, table))
        .collect())
}

fn read_worker(
    shards: &[TableRef],
    gate: QualityGate,
    cutoff: Option<usize>,
    output: &WorkQueue<ResultRecord>,
    release: &WorkQueue<ResultRecord>,
    counters: &Counters,
) {
    let mut accepted: u64 = 0;

    'shards: for shard in shards {
        info!(
            shard = %shard.path.display(),
            table = %shard.table,
            "loading fit results"
        );
        let records = match table::read_records(shard) {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    shard = %shard.path.display(),
                    "skipping unusable shard: {e}"
                );
                counters.skipped_shards.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        for record in records {
            // lifecycle protocol: this thread owns destruction
            while let Some(released) = release.try_pop() {
                drop(released);
            }

            match gate.evaluate(&record) {
                QualityVerdict::Accepted => {
                    counters.accepted.fetch_add(1, Ordering::Relaxed);
                    let _ = output.push(record);
                    accepted += 1;
                    if accepted % PROGRESS_EVERY == 0 {
                        let snapshot = counters.snapshot();
                        info!(
                            accepted,
                            rejected = snapshot.rejected_total(),
                            "streaming fit results"
                        );
                    }
                    if cutoff.is_some_and(|limit| accepted >= limit as u64) {
                        debug!(cutoff = accepted, "read cutoff reached");
                        break 'shards;
                    }
                }
                QualityVerdict::Rejected(reason) => {
                    counters.bump_rejection(reason);
                    debug!(seed = record.seed, run_id = record.run_id, ?reason, "fit result neglected");
                }
            }
        }
    }

    output.disable();
    let snapshot = counters.snapshot();
    if snapshot.accepted == 0 {
        warn!(
            rejected = snapshot.rejected_total(),
            skipped_shards = snapshot.skipped_shards,
            "read session produced no usable fit results"
        );
    } else {
        info!(
            accepted = snapshot.accepted,
            rejected = snapshot.rejected_total(),
            rejected_covariance = snapshot.rejected_covariance,
            rejected_status = snapshot.rejected_status,
            rejected_stuck = snapshot.rejected_stuck,
            skipped_shards = snapshot.skipped_shards,
            "read session finished"
        );
    }
}
