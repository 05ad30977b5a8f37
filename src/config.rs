//! Store configuration
//!
//! Owned value object handed to the pipelines; option/config-file parsing
//! lives with the caller. Builder-constructed, defaults matching the
//! originating toy-study tooling (minimum covariance rank 3, reference run
//! id 0).

use std::path::{Path, PathBuf};

use crate::backoff::BackoffPolicy;

/// A table location: file path plus the table name expected inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Path of the table file.
    pub path: PathBuf,
    /// Table name carried in (and verified against) the file metadata.
    pub table: String,
}

impl TableRef {
    /// Create a table reference.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
        }
    }
}

/// Input shards for a read session.
#[derive(Debug, Clone)]
pub enum ShardSpec {
    /// Explicit (path, table name) list, consumed in order.
    List(Vec<TableRef>),
    /// Directory scanned once at start; file names matching the regex are
    /// consumed in sorted order, all with the same table name.
    Pattern {
        /// Directory to scan (non-recursive).
        directory: PathBuf,
        /// Regex matched against file names.
        filename_pattern: String,
        /// Table name expected in every matching file.
        table: String,
    },
}

/// Configuration consumed by the writer and reader pipelines.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    output: Option<TableRef>,
    shards: Option<ShardSpec>,
    min_covariance_quality: i32,
    read_cutoff: Option<usize>,
    reference_run_id: i64,
    backoff: BackoffPolicy,
}

impl StoreConfig {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Output table the writer appends to, if configured.
    #[must_use]
    pub fn output(&self) -> Option<&TableRef> {
        self.output.as_ref()
    }

    /// Input shards for the reader, if configured.
    #[must_use]
    pub fn shards(&self) -> Option<&ShardSpec> {
        self.shards.as_ref()
    }

    /// Minimum covariance-quality rank the quality gate accepts.
    #[must_use]
    pub const fn min_covariance_quality(&self) -> i32 {
        self.min_covariance_quality
    }

    /// Optional cap on accepted records streamed per read session.
    #[must_use]
    pub const fn read_cutoff(&self) -> Option<usize> {
        self.read_cutoff
    }

    /// Run id marking the reference run in seed pairing.
    #[must_use]
    pub const fn reference_run_id(&self) -> i64 {
        self.reference_run_id
    }

    /// Lock-contention backoff policy.
    #[must_use]
    pub const fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }
}

/// Builder for [`StoreConfig`].
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    output: Option<TableRef>,
    shards: Option<ShardSpec>,
    min_covariance_quality: Option<i32>,
    read_cutoff: Option<usize>,
    reference_run_id: Option<i64>,
    backoff: Option<BackoffPolicy>,
}

impl StoreConfigBuilder {
    /// Set the output table (required for writing).
    #[must_use]
    pub fn output(mut self, path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        self.output = Some(TableRef::new(path, table));
        self
    }

    /// Set an explicit shard list (for reading).
    #[must_use]
    pub fn shards(mut self, shards: Vec<TableRef>) -> Self {
        self.shards = Some(ShardSpec::List(shards));
        self
    }

    /// Set a directory + filename-pattern shard spec (for reading).
    #[must_use]
    pub fn shard_pattern(
        mut self,
        directory: impl AsRef<Path>,
        filename_pattern: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        self.shards = Some(ShardSpec::Pattern {
            directory: directory.as_ref().to_path_buf(),
            filename_pattern: filename_pattern.into(),
            table: table.into(),
        });
        self
    }

    /// Set the minimum accepted covariance-quality rank (default 3).
    #[must_use]
    pub const fn min_covariance_quality(mut self, rank: i32) -> Self {
        self.min_covariance_quality = Some(rank);
        self
    }

    /// Cap the number of accepted records streamed per read session.
    #[must_use]
    pub const fn read_cutoff(mut self, cutoff: usize) -> Self {
        self.read_cutoff = Some(cutoff);
        self
    }

    /// Set the reference run id for seed pairing (default 0).
    #[must_use]
    pub const fn reference_run_id(mut self, run_id: i64) -> Self {
        self.reference_run_id = Some(run_id);
        self
    }

    /// Override the lock-contention backoff policy (tests compress time
    /// through this).
    #[must_use]
    pub const fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = Some(policy);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            output: self.output,
            shards: self.shards,
            min_covariance_quality: self.min_covariance_quality.unwrap_or(3),
            read_cutoff: self.read_cutoff,
            reference_run_id: self.reference_run_id.unwrap_or(0),
            backoff: self.backoff.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let cfg = StoreConfig::builder().build();
        assert!(cfg.output().is_none());
        assert!(cfg.shards().is_none());
        assert_eq!(cfg.min_covariance_quality(), 3);
        assert_eq!(cfg.read_cutoff(), None);
        assert_eq!(cfg.reference_run_id(), 0);
    }

    #[test]
    fn test_builder_sets_everything() {
        let cfg = StoreConfig::builder()
            .output("/tmp/toys.parquet", "toy_results")
            .shard_pattern("/tmp/shards", r"^toys_\d+\.parquet$", "toy_results")
            .min_covariance_quality(2)
            .read_cutoff(10)
            .reference_run_id(5)
            .build();
        assert_eq!(
            cfg.output(),
            Some(&TableRef::new("/tmp/toys.parquet", "toy_results"))
        );
        assert!(matches!(cfg.shards(), Some(ShardSpec::Pattern { .. })));
        assert_eq!(cfg.min_covariance_quality(), 2);
        assert_eq!(cfg.read_cutoff(), Some(10));
        assert_eq!(cfg.reference_run_id(), 5);
    }
}
