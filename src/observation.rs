// src/observation.rs

use ndarray::{Array1, Array2, Axis, Zip};

use crate::error::{Result, ScreenError};

/// An n_samples × n_features matrix in which any cell may be missing.
///
/// Presence is tracked per cell in a boolean mask of the same shape, so
/// missingness in one feature is independent of every other feature.
/// Missing cells always hold `0.0` in the value buffer; nothing reads them
/// as data.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationMatrix {
    values: Array2<f64>,
    present: Array2<bool>,
}

impl ObservationMatrix {
    /// Builds a matrix from values and a presence mask (`true` = observed).
    ///
    /// # Errors
    /// Returns `Dimensionality` if the two arrays differ in shape.
    pub fn new(mut values: Array2<f64>, present: Array2<bool>) -> Result<Self> {
        if values.nrows() != present.nrows() {
            return Err(ScreenError::Dimensionality {
                context: "presence mask rows".to_string(),
                expected: values.nrows(),
                actual: present.nrows(),
            });
        }
        if values.ncols() != present.ncols() {
            return Err(ScreenError::Dimensionality {
                context: "presence mask columns".to_string(),
                expected: values.ncols(),
                actual: present.ncols(),
            });
        }
        Zip::from(&mut values).and(&present).for_each(|v, &p| {
            if !p {
                *v = 0.0;
            }
        });
        Ok(Self { values, present })
    }

    /// Wraps a matrix with every cell observed.
    pub fn from_dense(values: Array2<f64>) -> Self {
        let present = Array2::from_elem(values.dim(), true);
        Self { values, present }
    }

    /// Builds a matrix where `None` marks a missing cell.
    pub fn from_options(cells: &Array2<Option<f64>>) -> Self {
        let values = cells.mapv(|c| c.unwrap_or(0.0));
        let present = cells.mapv(|c| c.is_some());
        Self { values, present }
    }

    /// Interop constructor for tables that already use NaN as the missing marker.
    pub fn from_nan_marked(values: Array2<f64>) -> Self {
        let present = values.mapv(|v| !v.is_nan());
        let values = values.mapv(|v| if v.is_nan() { 0.0 } else { v });
        Self { values, present }
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Raw value buffer. Missing cells read as `0.0`; consult [`Self::mask`].
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Presence mask, `true` where the cell is observed.
    pub fn mask(&self) -> &Array2<bool> {
        &self.present
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if self.present[[row, col]] {
            Some(self.values[[row, col]])
        } else {
            None
        }
    }

    pub fn set(&mut self, row: usize, col: usize, value: Option<f64>) {
        match value {
            Some(v) => {
                self.values[[row, col]] = v;
                self.present[[row, col]] = true;
            }
            None => {
                self.values[[row, col]] = 0.0;
                self.present[[row, col]] = false;
            }
        }
    }

    pub fn n_missing(&self) -> usize {
        self.present.iter().filter(|&&p| !p).count()
    }

    /// Number of observed cells in each column.
    pub fn present_counts(&self) -> Array1<usize> {
        self.present
            .map_axis(Axis(0), |col| col.iter().filter(|&&p| p).count())
    }

    /// Column `col` as a sequence of optional cells, in row order.
    pub fn column(&self, col: usize) -> Vec<Option<f64>> {
        (0..self.nrows()).map(|row| self.get(row, col)).collect()
    }

    /// Per-column mean over observed cells only. A column with no observed
    /// cell has mean NaN.
    pub fn column_means(&self) -> Array1<f64> {
        let sums = self.values.sum_axis(Axis(0));
        let counts = self.present_counts();
        Zip::from(&sums)
            .and(&counts)
            .map_collect(|&s, &n| if n == 0 { f64::NAN } else { s / n as f64 })
    }

    /// Subtracts `means` from every observed cell; missing cells stay missing.
    pub fn centered(&self, means: &Array1<f64>) -> Result<Self> {
        if means.len() != self.ncols() {
            return Err(ScreenError::Dimensionality {
                context: "centering vector length".to_string(),
                expected: self.ncols(),
                actual: means.len(),
            });
        }
        let mut values = self.values.clone();
        Zip::from(&mut values)
            .and(&self.present)
            .and_broadcast(means)
            .for_each(|v, &p, &m| {
                if p {
                    *v -= m;
                }
            });
        Ok(Self {
            values,
            present: self.present.clone(),
        })
    }

    /// A new matrix holding only `rows`, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            values: self.values.select(Axis(0), rows),
            present: self.present.select(Axis(0), rows),
        }
    }

    /// Dense copy with NaN in every missing cell.
    pub fn to_nan_marked(&self) -> Array2<f64> {
        Zip::from(&self.values)
            .and(&self.present)
            .map_collect(|&v, &p| if p { v } else { f64::NAN })
    }
}
