//! # Fitstore: Crash-Tolerant Shared Result Store for Toy-Study Fits
//!
//! Many independent fitting workers append statistical result records to a
//! common on-disk table; a separate analysis process later streams every
//! accepted record back out for aggregation. Competing writers never
//! corrupt the table, and producers never block on slow I/O or lock
//! contention.
//!
//! ## Architecture
//!
//! ```text
//! fit workers ──submit()──> [WorkQueue] ──> writer thread ──┐
//!                                            advisory lock  │ append
//!                                            + backoff      ▼
//!                                                   ResultTable (Parquet)
//!                                                           │ stream
//! analysis <──next()────── [WorkQueue] <── reader thread <──┘
//!    │                                       quality gate
//!    └─release()─> [release queue] ─purge()─> destroyed on owning thread
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use fitstore::{ResultRecord, FitOutcome, StoreConfig, WriterPipeline};
//!
//! let config = StoreConfig::builder()
//!     .output("toys/results.parquet", "toy_results")
//!     .build();
//!
//! let mut writer = WriterPipeline::new(&config)?;
//! let outcome = FitOutcome {
//!     covariance_quality: 3,
//!     status_history: vec![("MIGRAD".into(), 0)],
//!     parameters: vec![],
//! };
//! writer.submit(ResultRecord::new(outcome, 12.5, 14.0, 42, 0))?;
//! writer.finish();
//! # Ok::<(), fitstore::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backoff;
pub mod config;
pub mod error;
pub mod gate;
pub mod lock;
pub mod pairing;
pub mod queue;
pub mod reader;
pub mod record;
pub mod table;
pub mod writer;

pub use backoff::BackoffPolicy;
pub use config::{ShardSpec, StoreConfig, TableRef};
pub use error::{Error, Result};
pub use gate::{QualityGate, QualityVerdict, RejectReason};
pub use pairing::{PairingReport, SeedPair, SeedPairing};
pub use reader::{ReadCounters, ReaderPipeline};
pub use record::{FitOutcome, FitParameter, ResultRecord};
pub use writer::WriterPipeline;
