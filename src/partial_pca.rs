// Principal component analysis for partially observed data

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::cmp::Ordering;

use crate::covariance::{dense_covariance, CovarianceKind};
use crate::error::{Result, ScreenError};
use crate::interpolate::{densify, TransformOptions};
use crate::linalg_backends::{BackendEig, BackendInv, EigOutput, LinAlgBackendProvider};
use crate::observation::ObservationMatrix;

/// Relative size (against the largest |λ|) above which a negative or complex
/// eigenvalue is reported when its sign/phase is dropped.
const SIGN_LOSS_REPORT_TOLERANCE: f64 = 1e-8;

/// An eigenvalue magnitude and its (real) eigenvector.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenPair {
    /// |λ| of the raw eigenvalue.
    pub eigenvalue: f64,
    /// Shape: (n_features)
    pub eigenvector: Array1<f64>,
}

/// Everything computed by `fit`. Lives only inside [`PcaState::Fit`].
#[derive(Debug, Clone)]
pub(crate) struct FittedPca {
    /// Per-feature mean over observed cells. Shape: (n_features)
    mean: Array1<f64>,
    /// Output of the masked estimator. Shape: (n_features, n_features)
    covariance: Array2<f64>,
    /// Sorted by eigenvalue, descending.
    eig_pairs: Vec<EigenPair>,
    loadings: Vec<Array1<f64>>,
    n_components: usize,
    /// The projection matrix `w`. Shape: (n_features, n_components)
    projection: Array2<f64>,
    /// Result of the most recent `transform` with the current `w`.
    transformed: Option<Array2<f64>>,
}

/// Lifecycle of a [`PartialPca`].
///
/// - `Unfit`: only configuration is available.
/// - `Fit`: mean, covariance, eigenpairs, loadings and `w` are valid and
///   immutable until the next `fit`. `w` alone is rebuilt by
///   `change_components`. The cached transform is present only after a
///   `transform` with the current `w`.
#[derive(Debug, Clone, Default)]
pub(crate) enum PcaState {
    #[default]
    Unfit,
    Fit(Box<FittedPca>),
}

/// Finds PCA components for partially observed data.
///
/// The covariance (or correlation) matrix is estimated from pairwise-complete
/// observations, so missing cells are never imputed during `fit`. `transform`
/// on the other hand works on a densified copy of its input.
///
/// Eigenvalues are ranked by magnitude. A non positive semi-definite masked
/// covariance can produce negative eigenvalues, which then rank as if they
/// were large variances; this is logged but kept.
#[derive(Debug, Clone)]
pub struct PartialPca {
    kind: CovarianceKind,
    requested_components: Option<usize>,
    state: PcaState,
}

impl Default for PartialPca {
    fn default() -> Self {
        Self::new(CovarianceKind::Covariance, None)
    }
}

impl PartialPca {
    /// Creates an unfitted instance.
    ///
    /// * `kind` - covariance or correlation matrix.
    /// * `n_components` - components to keep; `None` keeps all features.
    ///
    /// # Examples
    ///
    /// ```
    /// use hcs_pca::{CovarianceKind, PartialPca};
    /// let pca = PartialPca::new(CovarianceKind::Covariance, Some(2));
    /// assert!(!pca.is_fitted());
    /// ```
    pub fn new(kind: CovarianceKind, n_components: Option<usize>) -> Self {
        Self {
            kind,
            requested_components: n_components,
            state: PcaState::Unfit,
        }
    }

    pub fn kind(&self) -> CovarianceKind {
        self.kind
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state, PcaState::Fit(_))
    }

    /// Fits mean, masked covariance, eigenpairs, loadings and the projection
    /// matrix `w` on `x`.
    ///
    /// Steps: mean over observed cells, centering of observed cells, masked
    /// covariance/correlation, general eigendecomposition, ranking by |λ|,
    /// then `w` from the leading `n_components` eigenvectors.
    ///
    /// Any previously cached transform is discarded.
    ///
    /// # Errors
    /// - `InsufficientData` if `x` is empty, a feature has no observed value,
    ///   or two features share fewer than two observed rows.
    /// - `Dimensionality` if the configured `n_components` is not in
    ///   `1..=n_features`.
    /// - `LinAlg` if the covariance is non-finite or the eigensolver fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::array;
    /// use hcs_pca::{ObservationMatrix, PartialPca};
    ///
    /// let x = ObservationMatrix::from_options(&array![
    ///     [Some(1.0), Some(2.0)],
    ///     [Some(2.0), None],
    ///     [Some(3.0), Some(6.5)],
    ///     [Some(5.0), Some(9.0)],
    /// ]);
    /// let mut pca = PartialPca::default();
    /// pca.fit(&x).unwrap();
    /// assert_eq!(pca.projection().unwrap().dim(), (2, 2));
    /// ```
    pub fn fit(&mut self, x: &ObservationMatrix) -> Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(ScreenError::InsufficientData(
                "input matrix has zero samples or zero features".to_string(),
            ));
        }
        let n_components = self.requested_components.unwrap_or(n_features);
        check_component_count(n_components, n_features)?;

        let mean = x.column_means();
        if let Some(col) = mean.iter().position(|m| m.is_nan()) {
            return Err(ScreenError::InsufficientData(format!(
                "feature {} has no observed values",
                col
            )));
        }
        let centered = x.centered(&mean)?;

        let covariance = self.kind.estimator().estimate(&centered)?;
        debug!(
            "Estimated {} matrix of shape {:?} from {} samples ({} missing cells).",
            self.kind,
            covariance.dim(),
            n_samples,
            x.n_missing()
        );

        let eig_pairs = sorted_eigen_pairs(&covariance)?;
        let loadings = loadings_from(&eig_pairs);
        let projection = stack_components(&eig_pairs, n_components)?;

        info!(
            "Fitted partial PCA ({}) on {}x{} data; keeping {} of {} components.",
            self.kind, n_samples, n_features, n_components, n_features
        );

        self.state = PcaState::Fit(Box::new(FittedPca {
            mean,
            covariance,
            eig_pairs,
            loadings,
            n_components,
            projection,
            transformed: None,
        }));
        Ok(())
    }

    /// Rebuilds `w` with `n_components` columns from the cached eigenpairs.
    /// Covariance and eigendecomposition are not recomputed.
    ///
    /// # Errors
    /// - `InvalidState` before the first `fit`.
    /// - `Dimensionality` if `n_components` is not in `1..=n_features`.
    pub fn change_components(&mut self, n_components: usize) -> Result<()> {
        let fitted = self.fitted_mut("change_components")?;
        let n_features = fitted.mean.len();
        check_component_count(n_components, n_features)?;

        fitted.projection = stack_components(&fitted.eig_pairs, n_components)?;
        fitted.n_components = n_components;
        fitted.transformed = None;
        debug!("Projection rebuilt with {} components.", n_components);

        self.requested_components = Some(n_components);
        Ok(())
    }

    /// Densifies `x` (interpolation, then fill) and projects it onto `w`.
    ///
    /// `x` may be a different matrix from the one used in `fit` but must have
    /// the same features. Cells that neither interpolation nor fill can reach
    /// propagate NaN into the affected rows. The result is cached for
    /// [`Self::explained_variance`].
    ///
    /// Returns an (n_samples, n_components) matrix.
    ///
    /// # Errors
    /// - `InvalidState` before `fit`.
    /// - `Dimensionality` if `x` has a different number of features.
    pub fn transform(
        &mut self,
        x: &ObservationMatrix,
        options: &TransformOptions,
    ) -> Result<Array2<f64>> {
        let fitted = self.fitted_mut("transform")?;
        let n_features = fitted.projection.nrows();
        if x.ncols() != n_features {
            return Err(ScreenError::Dimensionality {
                context: "transform input features".to_string(),
                expected: n_features,
                actual: x.ncols(),
            });
        }

        let filled = densify(x, options);
        let transformed = filled.dot(&fitted.projection);
        fitted.transformed = Some(transformed.clone());
        Ok(transformed)
    }

    /// Share of the variance of the cached transform held by each component,
    /// in component order. Sums to one.
    ///
    /// # Errors
    /// - `InvalidState` if no `transform` ran since the last `fit` or
    ///   `change_components`.
    /// - `InsufficientData` if the cached transform has fewer than two rows.
    pub fn explained_variance(&self) -> Result<Array1<f64>> {
        let fitted = self.fitted("explained_variance")?;
        let transformed = fitted.transformed.as_ref().ok_or_else(|| {
            ScreenError::InvalidState("explained_variance requires a prior transform".to_string())
        })?;
        if transformed.nrows() < 2 {
            return Err(ScreenError::InsufficientData(format!(
                "variance needs at least 2 transformed rows, got {}",
                transformed.nrows()
            )));
        }
        let variances = dense_covariance(transformed).diag().to_owned();
        let total = variances.sum();
        Ok(variances / total)
    }

    /// Maps transformed data back to feature space with `w⁻¹`.
    ///
    /// Only defined when every component is retained, so that `w` is square.
    ///
    /// # Errors
    /// - `InvalidState` before `fit`.
    /// - `Dimensionality` if `w` is not square or `x_transformed` does not
    ///   have `n_components` columns.
    /// - `LinAlg` if `w` is singular.
    pub fn inv_transform(&self, x_transformed: &Array2<f64>) -> Result<Array2<f64>> {
        let fitted = self.fitted("inv_transform")?;
        let w = &fitted.projection;
        if !w.is_square() {
            return Err(ScreenError::Dimensionality {
                context: "w matrix not invertible unless all components retained".to_string(),
                expected: w.nrows(),
                actual: w.ncols(),
            });
        }
        if x_transformed.ncols() != w.ncols() {
            return Err(ScreenError::Dimensionality {
                context: "inv_transform input components".to_string(),
                expected: w.ncols(),
                actual: x_transformed.ncols(),
            });
        }

        let w_inv = LinAlgBackendProvider::<f64>::new()
            .inv(w)
            .map_err(|e| ScreenError::LinAlg(format!("Inversion of w failed: {}", e)))?;
        Ok(x_transformed.dot(&w_inv))
    }

    /// Mean vector of the fitted data. Returns `None` before `fit`.
    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.fitted_ref().map(|f| &f.mean)
    }

    /// The masked covariance (or correlation) matrix. Returns `None` before `fit`.
    pub fn covariance_matrix(&self) -> Option<&Array2<f64>> {
        self.fitted_ref().map(|f| &f.covariance)
    }

    /// All eigenpairs, largest |λ| first. Returns `None` before `fit`.
    pub fn eigen_pairs(&self) -> Option<&[EigenPair]> {
        self.fitted_ref().map(|f| f.eig_pairs.as_slice())
    }

    pub fn eigenvalues(&self) -> Option<Array1<f64>> {
        self.fitted_ref()
            .map(|f| f.eig_pairs.iter().map(|p| p.eigenvalue).collect())
    }

    /// `sqrt(eigenvalue) * eigenvector` for every component, in rank order.
    pub fn loadings(&self) -> Option<&[Array1<f64>]> {
        self.fitted_ref().map(|f| f.loadings.as_slice())
    }

    /// The projection matrix `w`, shape (n_features, n_components).
    pub fn projection(&self) -> Option<&Array2<f64>> {
        self.fitted_ref().map(|f| &f.projection)
    }

    pub fn n_components(&self) -> Option<usize> {
        self.fitted_ref().map(|f| f.n_components)
    }

    /// The cached output of the last `transform`, if any.
    pub fn transformed(&self) -> Option<&Array2<f64>> {
        self.fitted_ref().and_then(|f| f.transformed.as_ref())
    }

    fn fitted_ref(&self) -> Option<&FittedPca> {
        match &self.state {
            PcaState::Fit(fitted) => Some(&**fitted),
            PcaState::Unfit => None,
        }
    }

    fn fitted(&self, operation: &str) -> Result<&FittedPca> {
        self.fitted_ref().ok_or_else(|| {
            ScreenError::InvalidState(format!("{} called before fit", operation))
        })
    }

    fn fitted_mut(&mut self, operation: &str) -> Result<&mut FittedPca> {
        match &mut self.state {
            PcaState::Fit(fitted) => Ok(&mut **fitted),
            PcaState::Unfit => Err(ScreenError::InvalidState(format!(
                "{} called before fit",
                operation
            ))),
        }
    }
}

fn check_component_count(n_components: usize, n_features: usize) -> Result<()> {
    if n_components == 0 || n_components > n_features {
        return Err(ScreenError::Dimensionality {
            context: "n_components must be between 1 and n_features".to_string(),
            expected: n_features,
            actual: n_components,
        });
    }
    Ok(())
}

/// General eigendecomposition of `matrix`, reduced to (|λ|, Re(v)) pairs and
/// sorted by |λ| descending. The sort is stable, so equal magnitudes keep the
/// solver's output order.
pub(crate) fn sorted_eigen_pairs(matrix: &Array2<f64>) -> Result<Vec<EigenPair>> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(ScreenError::LinAlg(
            "covariance matrix contains non-finite entries".to_string(),
        ));
    }
    let EigOutput {
        eigenvalues,
        eigenvectors,
    } = LinAlgBackendProvider::<f64>::new()
        .eig_general(matrix)
        .map_err(|e| ScreenError::LinAlg(format!("Eigen decomposition of covariance matrix failed: {}", e)))?;

    let largest = eigenvalues.iter().map(|l| l.norm()).fold(0.0, f64::max);
    let report_above = largest * SIGN_LOSS_REPORT_TOLERANCE;

    let mut eig_pairs: Vec<EigenPair> = eigenvalues
        .iter()
        .zip(eigenvectors.axis_iter(Axis(1)))
        .enumerate()
        .map(|(idx, (lambda, vector))| {
            if lambda.re < -report_above || lambda.im.abs() > report_above {
                warn!(
                    "Eigenvalue {} is {:.6e}{:+.6e}i; ranking and loadings use its magnitude {:.6e}.",
                    idx,
                    lambda.re,
                    lambda.im,
                    lambda.norm()
                );
            }
            EigenPair {
                eigenvalue: lambda.norm(),
                eigenvector: vector.mapv(|c| c.re),
            }
        })
        .collect();
    eig_pairs.sort_by(|a, b| {
        b.eigenvalue
            .partial_cmp(&a.eigenvalue)
            .unwrap_or(Ordering::Equal)
    });
    Ok(eig_pairs)
}

/// `sqrt(|λ|) · v` for every pair, in pair order.
pub(crate) fn loadings_from(eig_pairs: &[EigenPair]) -> Vec<Array1<f64>> {
    eig_pairs
        .iter()
        .map(|pair| &pair.eigenvector * pair.eigenvalue.sqrt())
        .collect()
}

/// Column-stacks the first `n_components` eigenvectors into `w`.
fn stack_components(eig_pairs: &[EigenPair], n_components: usize) -> Result<Array2<f64>> {
    let views: Vec<ArrayView1<f64>> = eig_pairs
        .iter()
        .take(n_components)
        .map(|pair| pair.eigenvector.view())
        .collect();
    Ok(ndarray::stack(Axis(1), &views)?)
}
