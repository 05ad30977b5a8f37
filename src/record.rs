//! Result Record - one fit outcome plus timing and identity metadata
//!
//! A `ResultRecord` is produced by an external fit procedure, enters the
//! store via [`WriterPipeline::submit`](crate::writer::WriterPipeline::submit),
//! persists as a table row forever, and is rematerialized per row by the
//! reader. Ownership is exclusive: it transfers atomically on every queue
//! push, and a record handed to a consumer is borrowed until released.

use serde::{Deserialize, Serialize};

/// One floating fit parameter with its generation value, fitted value and
/// parabolic error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitParameter {
    /// Parameter name.
    pub name: String,
    /// Generation (initial) value the fit started from.
    pub initial: f64,
    /// Fitted value.
    pub value: f64,
    /// Parabolic error on the fitted value.
    pub error: f64,
}

impl FitParameter {
    /// Create a parameter snapshot.
    #[must_use]
    pub fn new(name: impl Into<String>, initial: f64, value: f64, error: f64) -> Self {
        Self {
            name: name.into(),
            initial,
            value,
            error,
        }
    }

    /// Whether the fitted value stayed within numerical tolerance of the
    /// initial value (relative, with an absolute floor for zero-valued
    /// generation parameters).
    #[must_use]
    pub fn is_stuck(&self) -> bool {
        (self.value - self.initial).abs() <= 1e-9 * self.initial.abs().max(1.0)
    }
}

/// Covariance-quality rank meaning "not applicable"; always passes the
/// quality gate's covariance check.
pub const COVARIANCE_NOT_APPLICABLE: i32 = -1;

/// Opaque fit-result handle: everything the store ever needs to know about
/// one converged (or not) fit.
///
/// The writer persists this as an uninterpreted blob; only the reader-side
/// quality gate looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    /// Covariance matrix quality rank (3 = full accurate matrix in the
    /// originating minimizer; [`COVARIANCE_NOT_APPLICABLE`] = sentinel).
    pub covariance_quality: i32,
    /// (stage label, status code) pairs in chronological order; the last
    /// entry is the most recent optimizer status.
    pub status_history: Vec<(String, i32)>,
    /// Free parameters of the fit.
    pub parameters: Vec<FitParameter>,
}

impl FitOutcome {
    /// Most recent optimizer status code, if any stage was recorded.
    #[must_use]
    pub fn last_status(&self) -> Option<i32> {
        self.status_history.last().map(|(_, code)| *code)
    }
}

/// One fit outcome plus timing/identity metadata - the unit the store
/// writes, streams and pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    /// Primary fit outcome (always present).
    pub primary: FitOutcome,
    /// Optional secondary outcome (e.g. a reference or systematics fit
    /// performed in the same toy).
    pub secondary: Option<FitOutcome>,
    /// CPU seconds spent on the primary fit.
    pub cpu_time: f64,
    /// Wall-clock seconds spent on the primary fit.
    pub wall_time: f64,
    /// CPU seconds spent on the secondary fit (0.0 if absent).
    pub cpu_time_secondary: f64,
    /// Wall-clock seconds spent on the secondary fit (0.0 if absent).
    pub wall_time_secondary: f64,
    /// Random seed the toy dataset was generated from.
    pub seed: u64,
    /// Identifier of the run configuration (distinguishes nominal from
    /// reference runs sharing a seed).
    pub run_id: i64,
}

impl ResultRecord {
    /// Create a record for a single-fit toy.
    #[must_use]
    pub fn new(primary: FitOutcome, cpu_time: f64, wall_time: f64, seed: u64, run_id: i64) -> Self {
        Self {
            primary,
            secondary: None,
            cpu_time,
            wall_time,
            cpu_time_secondary: 0.0,
            wall_time_secondary: 0.0,
            seed,
            run_id,
        }
    }

    /// Attach a secondary outcome with its timings.
    #[must_use]
    pub fn with_secondary(mut self, outcome: FitOutcome, cpu_time: f64, wall_time: f64) -> Self {
        self.secondary = Some(outcome);
        self.cpu_time_secondary = cpu_time;
        self.wall_time_secondary = wall_time;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> FitOutcome {
        FitOutcome {
            covariance_quality: 3,
            status_history: vec![("MIGRAD".into(), 0), ("HESSE".into(), 0)],
            parameters: vec![FitParameter::new("mass", 5279.0, 5281.3, 1.2)],
        }
    }

    #[test]
    fn test_last_status_is_most_recent() {
        let mut o = outcome();
        o.status_history.push(("MINOS".into(), -1));
        assert_eq!(o.last_status(), Some(-1));
    }

    #[test]
    fn test_last_status_empty_history() {
        let mut o = outcome();
        o.status_history.clear();
        assert_eq!(o.last_status(), None);
    }

    #[test]
    fn test_stuck_parameter_tolerance() {
        let moved = FitParameter::new("a", 1.0, 1.01, 0.1);
        assert!(!moved.is_stuck());
        let stuck = FitParameter::new("b", 1.0, 1.0 + 1e-12, 0.1);
        assert!(stuck.is_stuck());
        // absolute floor: initial of exactly zero
        let zero_stuck = FitParameter::new("c", 0.0, 1e-12, 0.1);
        assert!(zero_stuck.is_stuck());
    }

    #[test]
    fn test_outcome_blob_roundtrip() {
        let o = outcome();
        let blob = serde_json::to_vec(&o).unwrap();
        let back: FitOutcome = serde_json::from_slice(&blob).unwrap();
        assert_eq!(o, back);
    }

    #[test]
    fn test_with_secondary() {
        let r = ResultRecord::new(outcome(), 1.5, 2.0, 42, 0).with_secondary(outcome(), 0.5, 0.7);
        assert!(r.secondary.is_some());
        assert!((r.cpu_time_secondary - 0.5).abs() < f64::EPSILON);
    }
}
