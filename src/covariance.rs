// src/covariance.rs

use log::{debug, warn};
use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ScreenError};
use crate::observation::ObservationMatrix;

/// Estimates an n_features × n_features dispersion matrix from data with
/// missing cells, without imputing them.
pub trait MaskedCovarianceEstimator {
    fn estimate(&self, data: &ObservationMatrix) -> Result<Array2<f64>>;
}

/// Pairwise-complete sample covariance (ddof = 1).
///
/// Each feature is centered by the mean of its own observed cells. Entry
/// `(i, j)` sums `x_i * x_j` over rows where both features are observed and
/// divides by that row count minus one.
#[derive(Debug, Default, Clone, Copy)]
pub struct PairwiseCovariance;

/// Pairwise-complete correlation: the pairwise covariance scaled by the
/// square roots of its diagonal.
#[derive(Debug, Default, Clone, Copy)]
pub struct PairwiseCorrelation;

impl MaskedCovarianceEstimator for PairwiseCovariance {
    fn estimate(&self, data: &ObservationMatrix) -> Result<Array2<f64>> {
        let (n_samples, n_features) = data.dim();
        debug!(
            "Estimating pairwise-complete covariance for {} samples x {} features ({} missing cells).",
            n_samples,
            n_features,
            data.n_missing()
        );

        let means = data.column_means();
        if let Some(col) = means.iter().position(|m| m.is_nan()) {
            return Err(ScreenError::InsufficientData(format!(
                "feature {} has no observed values",
                col
            )));
        }

        // Missing cells contribute zero to every product sum.
        let mut centered = Array2::<f64>::zeros((n_samples, n_features));
        Zip::from(&mut centered)
            .and(data.values())
            .and(data.mask())
            .and_broadcast(&means)
            .for_each(|c, &v, &p, &m| {
                if p {
                    *c = v - m;
                }
            });
        let presence = data.mask().mapv(|p| if p { 1.0 } else { 0.0 });

        let products = centered.t().dot(&centered);
        let shared = presence.t().dot(&presence);

        if let Some(((i, j), &n)) = shared.indexed_iter().find(|(_, n)| **n < 2.0) {
            return Err(ScreenError::InsufficientData(format!(
                "features {} and {} are jointly observed in {} row(s); at least 2 are needed",
                i, j, n as usize
            )));
        }

        Ok(Zip::from(&products)
            .and(&shared)
            .map_collect(|&s, &n| s / (n - 1.0)))
    }
}

impl MaskedCovarianceEstimator for PairwiseCorrelation {
    fn estimate(&self, data: &ObservationMatrix) -> Result<Array2<f64>> {
        let mut matrix = PairwiseCovariance.estimate(data)?;
        let std_devs = matrix.diag().mapv(f64::sqrt);
        if let Some(col) = std_devs.iter().position(|&s| s == 0.0) {
            warn!(
                "Feature {} has zero variance; its correlation entries are NaN.",
                col
            );
        }
        for ((i, j), value) in matrix.indexed_iter_mut() {
            *value /= std_devs[i] * std_devs[j];
        }
        Ok(matrix)
    }
}

/// Selects which estimator `PartialPca` uses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovarianceKind {
    #[default]
    Covariance,
    Correlation,
}

impl CovarianceKind {
    pub fn estimator(self) -> &'static dyn MaskedCovarianceEstimator {
        match self {
            CovarianceKind::Covariance => &PairwiseCovariance,
            CovarianceKind::Correlation => &PairwiseCorrelation,
        }
    }
}

impl FromStr for CovarianceKind {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cov" | "covariance" => Ok(CovarianceKind::Covariance),
            "corrcoef" | "correlation" => Ok(CovarianceKind::Correlation),
            other => Err(ScreenError::Config(format!(
                "unknown PCA matrix type '{}', expected 'cov' or 'corrcoef'",
                other
            ))),
        }
    }
}

impl fmt::Display for CovarianceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovarianceKind::Covariance => write!(f, "cov"),
            CovarianceKind::Correlation => write!(f, "corrcoef"),
        }
    }
}

/// Plain sample covariance of a dense matrix (columns are variables, ddof = 1).
pub(crate) fn dense_covariance(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows();
    let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| ndarray::Array1::zeros(x.ncols()));
    let centered = x - &mean;
    centered.t().dot(&centered) / (n as f64 - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_matrix(n_samples: usize, n_features: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_fn((n_samples, n_features), |_| rng.gen_range(-3.0..3.0))
    }

    fn assert_matrices_close(a: &Array2<f64>, b: &Array2<f64>, tol: f64) {
        assert_eq!(a.dim(), b.dim());
        for ((idx, x), y) in a.indexed_iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "mismatch at {:?}: {} vs {}", idx, x, y);
        }
    }

    #[test]
    fn fully_observed_covariance_matches_dense_estimate() {
        let x = random_matrix(40, 5, 7);
        let masked = PairwiseCovariance
            .estimate(&ObservationMatrix::from_dense(x.clone()))
            .unwrap();
        assert_matrices_close(&masked, &dense_covariance(&x), 1e-10);
    }

    #[test]
    fn fully_observed_correlation_matches_pearson() {
        let x = random_matrix(30, 4, 11);
        let corr = PairwiseCorrelation
            .estimate(&ObservationMatrix::from_dense(x.clone()))
            .unwrap();
        let cov = dense_covariance(&x);
        for i in 0..4 {
            assert_abs_diff_eq!(corr[[i, i]], 1.0, epsilon = 1e-12);
            for j in 0..4 {
                let expected = cov[[i, j]] / (cov[[i, i]] * cov[[j, j]]).sqrt();
                assert_abs_diff_eq!(corr[[i, j]], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn missing_cell_only_touches_its_own_feature() {
        let x = random_matrix(25, 4, 3);
        let full = PairwiseCovariance
            .estimate(&ObservationMatrix::from_dense(x.clone()))
            .unwrap();
        let mut holed = ObservationMatrix::from_dense(x);
        holed.set(6, 2, None);
        let partial = PairwiseCovariance.estimate(&holed).unwrap();
        for i in 0..4 {
            for j in 0..4 {
                if i != 2 && j != 2 {
                    assert_abs_diff_eq!(partial[[i, j]], full[[i, j]], epsilon = 1e-12);
                }
            }
        }
        assert!((partial[[2, 2]] - full[[2, 2]]).abs() > 1e-12);
    }

    #[test]
    fn pairwise_entry_uses_only_jointly_observed_rows() {
        let x = ObservationMatrix::from_options(&array![
            [Some(1.0), Some(2.0)],
            [Some(2.0), None],
            [Some(3.0), Some(6.0)],
            [Some(6.0), Some(4.0)],
        ]);
        let cov = PairwiseCovariance.estimate(&x).unwrap();
        // means: col0 = 3, col1 = 4; joint rows 0, 2, 3
        let expected_01 = ((1.0 - 3.0) * (2.0 - 4.0) + 0.0 * 2.0 + 3.0 * 0.0) / 2.0;
        assert_abs_diff_eq!(cov[[0, 1]], expected_01, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[1, 0]], expected_01, epsilon = 1e-12);
        let expected_00 = (4.0 + 1.0 + 0.0 + 9.0) / 3.0;
        assert_abs_diff_eq!(cov[[0, 0]], expected_00, epsilon = 1e-12);
    }

    #[test]
    fn too_little_overlap_is_an_error() {
        let x = ObservationMatrix::from_options(&array![
            [Some(1.0), None],
            [Some(2.0), Some(1.0)],
            [Some(4.0), None],
        ]);
        assert!(matches!(
            PairwiseCovariance.estimate(&x),
            Err(ScreenError::InsufficientData(_))
        ));
    }

    #[test]
    fn kind_parses_short_and_long_names() {
        assert_eq!("cov".parse::<CovarianceKind>().unwrap(), CovarianceKind::Covariance);
        assert_eq!("corrcoef".parse::<CovarianceKind>().unwrap(), CovarianceKind::Correlation);
        assert!(matches!("svd".parse::<CovarianceKind>(), Err(ScreenError::Config(_))));
        assert_eq!(CovarianceKind::Correlation.to_string(), "corrcoef");
    }
}
