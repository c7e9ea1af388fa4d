// src/linalg_backends.rs

#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

use ndarray::{Array1, Array2};
use ndarray_linalg::Scalar;
use std::error::Error;
use std::marker::PhantomData;

// --- Trait Definitions ---

/// Output of a general (not necessarily symmetric) eigendecomposition.
///
/// Eigenvalues come back in solver order, unsorted, and may be complex even for
/// real input.
#[derive(Debug)]
pub struct EigOutput<C: 'static> {
    pub eigenvalues: Array1<C>,
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<C>,
}

/// Trait for general eigendecomposition (LAPACK's xGEEV).
/// Does not assume symmetry of `matrix`.
pub trait BackendEig<F: Scalar> {
    fn eig_general(&self, matrix: &Array2<F>) -> Result<EigOutput<F::Complex>, Box<dyn Error + Send + Sync>>;
}

/// Trait for square matrix inversion (LU based).
pub trait BackendInv<F: Scalar> {
    fn inv(&self, matrix: &Array2<F>) -> Result<Array2<F>, Box<dyn Error + Send + Sync>>;
}

// --- NdarrayLinAlgBackend Implementation ---
use ndarray_linalg::{Eig as NdLinalgEig, Inverse as NdLinalgInverse};

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: Error + Send + Sync + 'static>(e: E) -> Box<dyn Error + Send + Sync> {
    Box::new(e)
}

// --- Implementations for f64 ---
impl BackendEig<f64> for NdarrayLinAlgBackend {
    fn eig_general(&self, matrix: &Array2<f64>) -> Result<EigOutput<<f64 as Scalar>::Complex>, Box<dyn Error + Send + Sync>> {
        let (eigenvalues, eigenvectors) = matrix.eig().map_err(to_dyn_error)?;
        Ok(EigOutput { eigenvalues, eigenvectors })
    }
}

impl BackendInv<f64> for NdarrayLinAlgBackend {
    fn inv(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, Box<dyn Error + Send + Sync>> {
        matrix.inv().map_err(to_dyn_error)
    }
}

// --- LinAlgBackendProvider Dispatch ---

impl<F> BackendEig<F> for LinAlgBackendProvider<F>
where
    F: Scalar + 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendEig<F>,
{
    fn eig_general(&self, matrix: &Array2<F>) -> Result<EigOutput<F::Complex>, Box<dyn Error + Send + Sync>> {
        if !matrix.is_square() {
            return Err(format!(
                "Eigendecomposition needs a square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )
            .into());
        }
        NdarrayLinAlgBackend.eig_general(matrix)
    }
}

impl<F> BackendInv<F> for LinAlgBackendProvider<F>
where
    F: Scalar + 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendInv<F>,
{
    fn inv(&self, matrix: &Array2<F>) -> Result<Array2<F>, Box<dyn Error + Send + Sync>> {
        if !matrix.is_square() {
            return Err(format!(
                "Only square matrices can be inverted, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )
            .into());
        }
        NdarrayLinAlgBackend.inv(matrix)
    }
}
