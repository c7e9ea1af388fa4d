// Partial-observation PCA and negative-control thresholding for high-content screening

#![doc = include_str!("../README.md")]

pub mod counts;
pub mod covariance;
pub mod error;
pub mod interpolate;
pub mod linalg_backends;
pub mod observation;
pub mod partial_pca;
pub mod table;
pub mod thresholds;

pub use counts::{count_cells_per_well, normalise_cell_counts, NormalisedCounts};
pub use covariance::{CovarianceKind, MaskedCovarianceEstimator, PairwiseCorrelation, PairwiseCovariance};
pub use error::{Result, ScreenError};
pub use interpolate::{FillMethod, Interpolation, TransformOptions};
pub use observation::ObservationMatrix;
pub use partial_pca::{EigenPair, PartialPca};
pub use table::{CanonicalOrder, GroupKey, LabeledGrid, ScreenTable};
pub use thresholds::{ThresholdConfig, ThresholdDirection, ThresholdEngine, ThresholdTable};
