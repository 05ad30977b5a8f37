//! Seed-pairing aggregator
//!
//! Groups streamed records by random seed to pair nominal and reference
//! runs of the same toy dataset for comparative analysis. A seed with
//! exactly two records, exactly one of them from the reference run, yields
//! a pair; anything else is a pairing anomaly - reported and excluded from
//! aggregate statistics, never fatal.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::record::ResultRecord;

/// Why a seed could not be paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyReason {
    /// Seed appeared once: its partner run is missing.
    MissingPartner,
    /// Seed appeared more than twice.
    TooManyRecords,
    /// Seed appeared exactly twice, but not with exactly one reference run.
    AmbiguousReference,
}

/// A seed excluded from pairing, with its record count and cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingAnomaly {
    /// The offending seed.
    pub seed: u64,
    /// How many records carried it.
    pub count: usize,
    /// Why pairing failed.
    pub reason: AnomalyReason,
}

/// A matched (nominal, reference) pair sharing one seed.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedPair {
    /// The non-reference run's record.
    pub nominal: ResultRecord,
    /// The reference run's record.
    pub reference: ResultRecord,
}

/// Outcome of a pairing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingReport {
    /// Valid pairs, in ascending seed order.
    pub pairs: Vec<SeedPair>,
    /// Seeds excluded from pairing, in ascending seed order.
    pub anomalies: Vec<PairingAnomaly>,
}

/// Multi-map accumulator keyed by seed.
#[derive(Debug)]
pub struct SeedPairing {
    reference_run_id: i64,
    by_seed: BTreeMap<u64, Vec<ResultRecord>>,
    inserted: usize,
}

impl SeedPairing {
    /// Create an aggregator; records with `reference_run_id` are the
    /// reference side of each pair.
    #[must_use]
    pub const fn new(reference_run_id: i64) -> Self {
        Self {
            reference_run_id,
            by_seed: BTreeMap::new(),
            inserted: 0,
        }
    }

    /// Add one streamed record.
    pub fn insert(&mut self, record: ResultRecord) {
        self.by_seed.entry(record.seed).or_default().push(record);
        self.inserted += 1;
    }

    /// Number of records inserted so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.inserted
    }

    /// Whether nothing has been inserted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.inserted == 0
    }

    /// Resolve pairs and anomalies.
    ///
    /// # Errors
    ///
    /// Returns `CannotEvaluate` when no record was ever inserted - an
    /// empty result set is a caller-visible failure, not a silent success.
    pub fn finish(self) -> Result<PairingReport> {
        if self.inserted == 0 {
            return Err(Error::CannotEvaluate(
                "no fit results are loaded for pairing".into(),
            ));
        }

        let mut pairs = Vec::new();
        let mut anomalies = Vec::new();
        for (seed, mut records) in self.by_seed {
            let count = records.len();
            let reason = if count == 2 {
                let second = records.pop();
                let first = records.pop();
                match (first, second) {
                    (Some(a), Some(b)) => {
                        let a_is_reference = a.run_id == self.reference_run_id;
                        let b_is_reference = b.run_id == self.reference_run_id;
                        match (a_is_reference, b_is_reference) {
                            (true, false) => {
                                pairs.push(SeedPair {
                                    nominal: b,
                                    reference: a,
                                });
                                None
                            }
                            (false, true) => {
                                pairs.push(SeedPair {
                                    nominal: a,
                                    reference: b,
                                });
                                None
                            }
                            _ => Some(AnomalyReason::AmbiguousReference),
                        }
                    }
                    _ => Some(AnomalyReason::AmbiguousReference),
                }
            } else if count == 1 {
                Some(AnomalyReason::MissingPartner)
            } else {
                Some(AnomalyReason::TooManyRecords)
            };

            if let Some(reason) = reason {
                warn!(seed, count, ?reason, "seed excluded from pairing");
                anomalies.push(PairingAnomaly {
                    seed,
                    count,
                    reason,
                });
            }
        }

        info!(
            pairs = pairs.len(),
            anomalies = anomalies.len(),
            "seed pairing finished"
        );
        Ok(PairingReport { pairs, anomalies })
    }
}
