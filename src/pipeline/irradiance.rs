//! Reconciliation of the two redundant irradiance sensors.
//!
//! Applied per raw sample, before bucketing; aggregating first would
//! change the average/disagreement arithmetic.

/// Relative disagreement above which the average is distrusted (percent).
pub const DISAGREEMENT_TOLERANCE_PCT: f64 = 5.0;

/// Fuses two redundant irradiance readings into one trusted value.
///
/// Policy: with both readings present, take the average when the relative
/// disagreement is under [`DISAGREEMENT_TOLERANCE_PCT`]; otherwise trust
/// the higher reading (the lower one is assumed occluded or faulty).
/// A lone reading is used as-is. The result is floored at 0.
pub fn reconcile(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.max(0.0)),
        (Some(x), Some(y)) => {
            let avg = (x + y) / 2.0;
            if avg <= 0.0 {
                return Some(x.max(y).max(0.0));
            }
            let disagreement_pct = (x - y).abs() / avg * 100.0;
            let fused = if disagreement_pct < DISAGREEMENT_TOLERANCE_PCT {
                avg
            } else {
                x.max(y)
            };
            Some(fused.max(0.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreeing_sensors_use_average() {
        // 2% apart: trust the average
        let v = reconcile(Some(500.0), Some(510.0));
        assert_eq!(v, Some(505.0));
    }

    #[test]
    fn disagreeing_sensors_use_higher_reading() {
        // avg 150, disagreement 66.7% >= 5%: trust 200
        let v = reconcile(Some(100.0), Some(200.0));
        assert_eq!(v, Some(200.0));
    }

    #[test]
    fn boundary_disagreement_uses_higher_reading() {
        // exactly 5% is not under the tolerance
        let v = reconcile(Some(97.5), Some(102.5));
        assert_eq!(v, Some(102.5));
    }

    #[test]
    fn non_positive_average_takes_floored_max() {
        assert_eq!(reconcile(Some(0.0), Some(0.0)), Some(0.0));
        assert_eq!(reconcile(Some(-3.0), Some(-8.0)), Some(0.0));
        assert_eq!(reconcile(Some(-10.0), Some(4.0)), Some(4.0));
    }

    #[test]
    fn lone_reading_is_floored_and_kept() {
        assert_eq!(reconcile(Some(320.0), None), Some(320.0));
        assert_eq!(reconcile(None, Some(-2.0)), Some(0.0));
        assert_eq!(reconcile(None, None), None);
    }

    #[test]
    fn result_is_never_negative() {
        for (a, b) in [
            (Some(-50.0), Some(-60.0)),
            (Some(-1.0), None),
            (Some(0.0), Some(-100.0)),
        ] {
            let v = reconcile(a, b);
            assert!(v.is_none_or(|x| x >= 0.0), "reconcile({a:?}, {b:?}) = {v:?}");
        }
    }
}
