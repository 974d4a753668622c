//! Divisor Calibration
//!
//! The divisor anchors the index to its base value. It is set once by base
//! calibration and afterwards only moves by chain-linking around
//! constituent-set changes, so that the published value is identical
//! immediately before and after the change.
//!
//! ```text
//! base:        divisor = total_ff(base_date) / base_value
//! chain-link:  divisor' = divisor * total_ff(after) / total_ff(before)
//! ```
//!
//! A [`Divisor`] can only be obtained through [`DivisorCalibrator`], which
//! guarantees a positive finite value.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default index level on the base date.
pub const DEFAULT_BASE_VALUE: f64 = 1000.0;

/// Validated divisor in force.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Divisor {
    value: f64,
    last_calibrated_total_ff_mcap: f64,
    base_date: NaiveDate,
    base_value: f64,
}

impl Divisor {
    /// Divisor value (always positive and finite).
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Total free-float market cap used in the most recent calibration.
    #[must_use]
    pub const fn last_calibrated_total_ff_mcap(&self) -> f64 {
        self.last_calibrated_total_ff_mcap
    }

    /// Base date of the index.
    #[must_use]
    pub const fn base_date(&self) -> NaiveDate {
        self.base_date
    }

    /// Index level on the base date.
    #[must_use]
    pub const fn base_value(&self) -> f64 {
        self.base_value
    }

    /// Persistable form of this divisor.
    #[must_use]
    pub const fn to_state(&self) -> DivisorState {
        DivisorState {
            value: self.value,
            last_calibrated_total_ff_mcap: self.last_calibrated_total_ff_mcap,
            base_date: self.base_date,
            base_value: self.base_value,
        }
    }
}

/// Unvalidated, persisted divisor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivisorState {
    /// Divisor value.
    pub value: f64,
    /// Total free-float market cap at the last calibration.
    pub last_calibrated_total_ff_mcap: f64,
    /// Base date.
    pub base_date: NaiveDate,
    /// Base value.
    pub base_value: f64,
}

/// Stateless calibration rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DivisorCalibrator;

impl DivisorCalibrator {
    /// Calibrate the divisor so the index equals `base_value` at `base_date`.
    ///
    /// # Errors
    ///
    /// Fails if the base total or base value is not positive and finite.
    pub fn calibrate_base(
        total_ff_at_base: f64,
        base_date: NaiveDate,
        base_value: f64,
    ) -> Result<Divisor, DivisorError> {
        if !is_positive_finite(base_value) {
            return Err(DivisorError::InvalidBaseValue(base_value));
        }
        if !is_positive_finite(total_ff_at_base) {
            return Err(DivisorError::InvalidBaseTotal(total_ff_at_base));
        }
        let value = total_ff_at_base / base_value;
        if !is_positive_finite(value) {
            return Err(DivisorError::InvalidDivisor(value));
        }
        tracing::info!(
            divisor = value,
            total_ff_mcap = total_ff_at_base,
            %base_date,
            base_value,
            "Divisor calibrated at base"
        );
        Ok(Divisor {
            value,
            last_calibrated_total_ff_mcap: total_ff_at_base,
            base_date,
            base_value,
        })
    }

    /// Chain-link the divisor around a constituent-set change.
    ///
    /// Both totals must be computed from identical prices.
    ///
    /// # Errors
    ///
    /// Fails if either total is not positive and finite, or if the result is
    /// not a valid divisor. Callers treat any failure as fatal.
    pub fn recalibrate(
        current: &Divisor,
        total_ff_before: f64,
        total_ff_after: f64,
    ) -> Result<Divisor, DivisorError> {
        if !is_positive_finite(total_ff_before) {
            return Err(DivisorError::InvalidTotalBefore(total_ff_before));
        }
        if !is_positive_finite(total_ff_after) {
            return Err(DivisorError::InvalidTotalAfter(total_ff_after));
        }
        let value = current.value * (total_ff_after / total_ff_before);
        if !is_positive_finite(value) {
            return Err(DivisorError::InvalidDivisor(value));
        }
        tracing::info!(
            old_divisor = current.value,
            new_divisor = value,
            total_ff_before,
            total_ff_after,
            "Divisor recalibrated"
        );
        Ok(Divisor {
            value,
            last_calibrated_total_ff_mcap: total_ff_after,
            ..*current
        })
    }

    /// Validate a persisted divisor.
    ///
    /// # Errors
    ///
    /// Fails under the same rules as base calibration.
    pub fn restore(state: &DivisorState) -> Result<Divisor, DivisorError> {
        if !is_positive_finite(state.base_value) {
            return Err(DivisorError::InvalidBaseValue(state.base_value));
        }
        if !is_positive_finite(state.value) {
            return Err(DivisorError::InvalidDivisor(state.value));
        }
        if !is_positive_finite(state.last_calibrated_total_ff_mcap) {
            return Err(DivisorError::InvalidBaseTotal(
                state.last_calibrated_total_ff_mcap,
            ));
        }
        Ok(Divisor {
            value: state.value,
            last_calibrated_total_ff_mcap: state.last_calibrated_total_ff_mcap,
            base_date: state.base_date,
            base_value: state.base_value,
        })
    }
}

fn is_positive_finite(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

/// Divisor calibration failures.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum DivisorError {
    /// Base value not positive and finite.
    #[error("invalid base value: {0}")]
    InvalidBaseValue(f64),

    /// Total free-float market cap at the base date unusable.
    #[error("invalid base free-float market cap total: {0}")]
    InvalidBaseTotal(f64),

    /// Pre-change total unusable.
    #[error("free-float market cap before change is unusable: {0}")]
    InvalidTotalBefore(f64),

    /// Post-change total unusable.
    #[error("free-float market cap after change is unusable: {0}")]
    InvalidTotalAfter(f64),

    /// Resulting divisor not positive and finite.
    #[error("computed divisor is invalid: {0}")]
    InvalidDivisor(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn base_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[test]
    fn base_calibration_anchors_to_base_value() {
        let divisor =
            DivisorCalibrator::calibrate_base(14.5e9, base_date(), DEFAULT_BASE_VALUE).unwrap();
        assert!((divisor.value() - 14_500_000.0).abs() < 1e-6);
        assert_eq!(divisor.base_date(), base_date());
        assert_eq!(divisor.base_value(), 1000.0);
    }

    #[test]
    fn removing_a_constituent_shrinks_divisor_proportionally() {
        let divisor =
            DivisorCalibrator::calibrate_base(14.5e9, base_date(), DEFAULT_BASE_VALUE).unwrap();
        let next = DivisorCalibrator::recalibrate(&divisor, 14.5e9, 10.9e9).unwrap();

        assert!((next.value() - 10_900_000.0).abs() < 1e-6);
        assert!((10.9e9 / next.value() - 1000.0).abs() < 1e-9);
        assert_eq!(next.last_calibrated_total_ff_mcap(), 10.9e9);
        assert_eq!(next.base_date(), divisor.base_date());
    }

    #[test_case(0.0, 1.0 ; "zero before")]
    #[test_case(f64::NAN, 1.0 ; "nan before")]
    #[test_case(1.0, 0.0 ; "zero after")]
    #[test_case(1.0, f64::INFINITY ; "infinite after")]
    #[test_case(-5.0, 1.0 ; "negative before")]
    fn recalibration_rejects_unusable_totals(before: f64, after: f64) {
        let divisor =
            DivisorCalibrator::calibrate_base(1.0e9, base_date(), DEFAULT_BASE_VALUE).unwrap();
        assert!(DivisorCalibrator::recalibrate(&divisor, before, after).is_err());
    }

    #[test]
    fn restore_validates_state() {
        let divisor =
            DivisorCalibrator::calibrate_base(2.0e9, base_date(), DEFAULT_BASE_VALUE).unwrap();
        let restored = DivisorCalibrator::restore(&divisor.to_state()).unwrap();
        assert_eq!(restored, divisor);

        let mut broken = divisor.to_state();
        broken.value = 0.0;
        assert_eq!(
            DivisorCalibrator::restore(&broken),
            Err(DivisorError::InvalidDivisor(0.0))
        );
    }

    proptest! {
        #[test]
        fn recalibration_preserves_index_value(
            base_total in 1.0e6f64..1.0e13,
            before in 1.0e6f64..1.0e13,
            after in 1.0e6f64..1.0e13,
        ) {
            let divisor = DivisorCalibrator::calibrate_base(base_total, base_date(), DEFAULT_BASE_VALUE).unwrap();
            let next = DivisorCalibrator::recalibrate(&divisor, before, after).unwrap();

            let value_before = before / divisor.value();
            let value_after = after / next.value();
            prop_assert!((value_before - value_after).abs() <= value_before.abs() * 1e-9);
        }
    }
}
