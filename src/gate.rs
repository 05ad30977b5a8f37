//! Quality gate deciding whether a record is usable for aggregate statistics
//!
//! Derived at read time, never persisted. The first failing check names the
//! rejection reason; acceptance requires passing all three. Evaluation is
//! pure, so re-evaluating a record always yields the same verdict.

use crate::record::{ResultRecord, COVARIANCE_NOT_APPLICABLE};

/// Fraction of free parameters allowed to end stuck at their initial value.
const STUCK_FRACTION_LIMIT: f64 = 0.8;

/// Why a record was rejected. The checks run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Covariance-quality rank below the configured minimum.
    CovarianceQuality,
    /// Most recent optimizer status code negative.
    OptimizerStatus,
    /// More than 80% of free parameters never moved from their initial
    /// value beyond numerical tolerance.
    ParametersStuck,
}

/// Verdict of the quality gate for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityVerdict {
    /// Record is usable for aggregate statistics.
    Accepted,
    /// Record is excluded, with the first failing check as reason.
    Rejected(RejectReason),
}

/// Predicate over result records, configured with the minimum accepted
/// covariance-quality rank.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    min_covariance_quality: i32,
}

impl QualityGate {
    /// Create a gate accepting covariance ranks of at least `min_rank`.
    #[must_use]
    pub const fn new(min_rank: i32) -> Self {
        Self {
            min_covariance_quality: min_rank,
        }
    }

    /// Evaluate one record. Only the primary outcome is gated; the
    /// secondary outcome travels with the record either way.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(&self, record: &ResultRecord) -> QualityVerdict {
        let outcome = &record.primary;

        if outcome.covariance_quality != COVARIANCE_NOT_APPLICABLE
            && outcome.covariance_quality < self.min_covariance_quality
        {
            return QualityVerdict::Rejected(RejectReason::CovarianceQuality);
        }

        if outcome.last_status().is_some_and(|code| code < 0) {
            return QualityVerdict::Rejected(RejectReason::OptimizerStatus);
        }

        if !outcome.parameters.is_empty() {
            let stuck = outcome.parameters.iter().filter(|p| p.is_stuck()).count();
            if stuck as f64 > STUCK_FRACTION_LIMIT * outcome.parameters.len() as f64 {
                return QualityVerdict::Rejected(RejectReason::ParametersStuck);
            }
        }

        QualityVerdict::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FitOutcome, FitParameter};

    fn record_with(outcome: FitOutcome) -> ResultRecord {
        ResultRecord::new(outcome, 1.0, 1.0, 1, 0)
    }

    fn good_outcome() -> FitOutcome {
        FitOutcome {
            covariance_quality: 3,
            status_history: vec![("MIGRAD".into(), 0), ("HESSE".into(), 0)],
            parameters: vec![
                FitParameter::new("a", 1.0, 1.3, 0.1),
                FitParameter::new("b", 2.0, 1.7, 0.2),
            ],
        }
    }

    #[test]
    fn test_accepts_good_record() {
        let gate = QualityGate::new(3);
        assert_eq!(
            gate.evaluate(&record_with(good_outcome())),
            QualityVerdict::Accepted
        );
    }

    #[test]
    fn test_rejects_low_covariance_rank() {
        let gate = QualityGate::new(3);
        let mut o = good_outcome();
        o.covariance_quality = 2;
        assert_eq!(
            gate.evaluate(&record_with(o)),
            QualityVerdict::Rejected(RejectReason::CovarianceQuality)
        );
    }

    #[test]
    fn test_not_applicable_sentinel_always_passes() {
        let gate = QualityGate::new(3);
        let mut o = good_outcome();
        o.covariance_quality = COVARIANCE_NOT_APPLICABLE;
        assert_eq!(gate.evaluate(&record_with(o)), QualityVerdict::Accepted);
    }

    #[test]
    fn test_rejects_negative_final_status() {
        let gate = QualityGate::new(3);
        let mut o = good_outcome();
        o.status_history.push(("MINOS".into(), -1));
        assert_eq!(
            gate.evaluate(&record_with(o)),
            QualityVerdict::Rejected(RejectReason::OptimizerStatus)
        );
    }

    #[test]
    fn test_earlier_negative_status_is_overridden() {
        let gate = QualityGate::new(3);
        let mut o = good_outcome();
        o.status_history = vec![("MIGRAD".into(), -1), ("retry".into(), 0)];
        assert_eq!(gate.evaluate(&record_with(o)), QualityVerdict::Accepted);
    }

    #[test]
    fn test_rejects_stuck_parameters() {
        let gate = QualityGate::new(3);
        let mut o = good_outcome();
        // 5 parameters, 5 stuck: fraction 1.0 > 0.8
        o.parameters = (0..5)
            .map(|i| FitParameter::new(format!("p{i}"), 1.0, 1.0, 0.1))
            .collect();
        assert_eq!(
            gate.evaluate(&record_with(o)),
            QualityVerdict::Rejected(RejectReason::ParametersStuck)
        );
    }

    #[test]
    fn test_stuck_fraction_at_limit_passes() {
        let gate = QualityGate::new(3);
        let mut o = good_outcome();
        // 4 of 5 stuck: fraction 0.8, not above the limit
        o.parameters = vec![
            FitParameter::new("p0", 1.0, 1.0, 0.1),
            FitParameter::new("p1", 1.0, 1.0, 0.1),
            FitParameter::new("p2", 1.0, 1.0, 0.1),
            FitParameter::new("p3", 1.0, 1.0, 0.1),
            FitParameter::new("p4", 1.0, 2.0, 0.1),
        ];
        assert_eq!(gate.evaluate(&record_with(o)), QualityVerdict::Accepted);
    }

    #[test]
    fn test_first_failing_check_names_the_reason() {
        // fails both covariance and status: covariance check runs first
        let gate = QualityGate::new(3);
        let mut o = good_outcome();
        o.covariance_quality = 1;
        o.status_history.push(("MINOS".into(), -7));
        assert_eq!(
            gate.evaluate(&record_with(o)),
            QualityVerdict::Rejected(RejectReason::CovarianceQuality)
        );
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let gate = QualityGate::new(3);
        let record = record_with(good_outcome());
        let first = gate.evaluate(&record);
        let second = gate.evaluate(&record);
        assert_eq!(first, second);
    }
}
