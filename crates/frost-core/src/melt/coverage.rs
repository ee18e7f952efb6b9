//! Tail trimming by valid-pixel coverage.
//!
//! Later stages backfill from the end of the series, so the last retained
//! step has to be a well-observed one.
//!
//! Example (threshold 0.8):
//!   fractions [0.4, 0.5, 0.3, 0.7, 0.9, 0.3]
//!   keep      [keep keep keep keep keep drop]

use tracing::debug;

use crate::cube::ClassificationCube;
use crate::error::{Error, Result};

/// Fraction of non-missing pixels at each time step.
pub fn validity_fraction(cube: &ClassificationCube) -> Vec<f64> {
    let size = cube.n_pixels() as f64;
    (0..cube.n_times())
        .map(|t| cube.frame(t).iter().filter(|c| c.is_some()).count() as f64 / size)
        .collect()
}

/// Index of the last time step whose coverage strictly exceeds `threshold`.
///
/// The grid is never empty, so every fraction is defined and no gap filling
/// is needed before the scan.
pub fn last_well_covered_step(fractions: &[f64], threshold: f64) -> Option<usize> {
    fractions.iter().rposition(|&f| f > threshold)
}

/// Drop every time step after the last one with coverage above `threshold`.
pub fn drop_poor_coverage_at_end(
    cube: &ClassificationCube,
    threshold: f64,
) -> Result<ClassificationCube> {
    let fractions = validity_fraction(cube);
    let Some(last) = last_well_covered_step(&fractions, threshold) else {
        let best = fractions.iter().cloned().fold(0.0, f64::max);
        return Err(Error::CoverageThresholdNeverMet { threshold, best });
    };
    debug!(
        last,
        dropped = cube.n_times() - last - 1,
        fraction = fractions[last],
        "coverage tail trimmed"
    );
    Ok(cube.truncate_through(last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::tests::ts;
    use approx::assert_relative_eq;

    /// 1×4 grid; each entry is the number of observed pixels at that step.
    fn cube_with_counts(counts: &[usize]) -> ClassificationCube {
        let mut data = Vec::new();
        let mut times = Vec::new();
        for (t, &k) in counts.iter().enumerate() {
            times.push(ts(2021, 3, 1 + t as u32));
            for p in 0..4 {
                data.push((p < k).then_some(4));
            }
        }
        ClassificationCube::new(4, 1, times, data).unwrap()
    }

    #[test]
    fn fractions_count_observed_pixels() {
        let cube = cube_with_counts(&[4, 2, 0]);
        let f = validity_fraction(&cube);
        assert_relative_eq!(f[0], 1.0);
        assert_relative_eq!(f[1], 0.5);
        assert_relative_eq!(f[2], 0.0);
    }

    #[test]
    fn trims_after_last_good_step() {
        // fractions: 0.5, 1.0, 0.25, 1.0, 0.5, 0.25
        let cube = cube_with_counts(&[2, 4, 1, 4, 2, 1]);
        let trimmed = drop_poor_coverage_at_end(&cube, 0.9).unwrap();
        assert_eq!(trimmed.n_times(), 4);
        assert_eq!(trimmed.times(), &cube.times()[..4]);
    }

    #[test]
    fn threshold_is_strict() {
        let cube = cube_with_counts(&[4, 3]);
        // 0.75 does not exceed 0.75.
        let trimmed = drop_poor_coverage_at_end(&cube, 0.75).unwrap();
        assert_eq!(trimmed.n_times(), 1);
    }

    #[test]
    fn never_met_is_a_named_error() {
        let cube = cube_with_counts(&[1, 2, 3]);
        match drop_poor_coverage_at_end(&cube, 0.9) {
            Err(Error::CoverageThresholdNeverMet { threshold, best }) => {
                assert_relative_eq!(threshold, 0.9);
                assert_relative_eq!(best, 0.75);
            }
            other => panic!("expected CoverageThresholdNeverMet, got {other:?}"),
        }
    }

    #[test]
    fn raising_threshold_never_extends_range() {
        let cube = cube_with_counts(&[4, 1, 3, 2, 4, 0, 3, 1]);
        let mut previous = usize::MAX;
        for step in 0..20 {
            let threshold = step as f64 * 0.05;
            let kept = drop_poor_coverage_at_end(&cube, threshold)
                .map(|c| c.n_times())
                .unwrap_or(0);
            assert!(
                kept <= previous,
                "threshold {threshold:.2} kept {kept} steps, more than {previous} at lower threshold"
            );
            previous = kept;
        }
    }
}
