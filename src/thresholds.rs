// Negative-control thresholds and per-well outlier fractions

use log::{debug, info, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, ScreenError};
use crate::table::{CanonicalOrder, LabeledGrid, ScreenTable};

/// Which side of the control distribution counts as an outlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThresholdDirection {
    /// Values strictly above `mean + k_above * std`.
    Above,
    /// Values strictly below `mean - k_below * std`.
    Below,
}

impl fmt::Display for ThresholdDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdDirection::Above => write!(f, "above"),
            ThresholdDirection::Below => write!(f, "below"),
        }
    }
}

/// Assay conventions for negative-control thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Concentration label of the negative-control wells.
    pub control_concentration: String,
    /// Standard deviations added to the control mean for `Above`.
    pub above_std_multiplier: f64,
    /// Standard deviations subtracted from the control mean for `Below`.
    pub below_std_multiplier: f64,
}

impl Default for ThresholdConfig {
    /// One-sided assay convention: +2σ above, −1σ below, zero-dose controls.
    fn default() -> Self {
        Self {
            control_concentration: "0 ug/mL".to_string(),
            above_std_multiplier: 2.0,
            below_std_multiplier: 1.0,
        }
    }
}

/// Per-feature thresholds derived from the negative controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    direction: ThresholdDirection,
    thresholds: BTreeMap<String, f64>,
}

impl ThresholdTable {
    pub fn direction(&self) -> ThresholdDirection {
        self.direction
    }

    pub fn get(&self, feature: &str) -> Result<f64> {
        self.thresholds.get(feature).copied().ok_or_else(|| {
            ScreenError::Lookup(format!("no {} threshold for feature '{}'", self.direction, feature))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.thresholds.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

/// Flags cells against negative-control thresholds and reports, per well,
/// the fraction of flagged cells.
#[derive(Debug, Clone)]
pub struct ThresholdEngine {
    config: ThresholdConfig,
    order: CanonicalOrder,
}

impl ThresholdEngine {
    pub fn new(config: ThresholdConfig, order: CanonicalOrder) -> Self {
        Self { config, order }
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    pub fn order(&self) -> &CanonicalOrder {
        &self.order
    }

    /// Computes one threshold per feature from the control rows.
    ///
    /// Mean and sample standard deviation (ddof = 1) are taken over the
    /// observed control values of each feature. A feature with fewer than two
    /// observed control values gets a NaN threshold.
    ///
    /// # Errors
    /// `InsufficientData` if the table has no control rows.
    pub fn compute_thresholds(
        &self,
        table: &ScreenTable,
        direction: ThresholdDirection,
    ) -> Result<ThresholdTable> {
        let control = &self.config.control_concentration;
        let control_rows = table.rows_with_concentration(control);
        if control_rows.is_empty() {
            return Err(ScreenError::InsufficientData(format!(
                "no rows with control concentration '{}'",
                control
            )));
        }
        debug!(
            "Computing {} thresholds from {} control rows.",
            direction,
            control_rows.len()
        );

        let controls = table.values().select_rows(&control_rows);
        let mut thresholds = BTreeMap::new();
        for (col, name) in table.feature_names().iter().enumerate() {
            let observed: Array1<f64> = controls.column(col).into_iter().flatten().collect();
            let (mean, std) = mean_and_sample_std(&observed);
            if std.is_nan() {
                warn!(
                    "Feature '{}' has {} observed control value(s); its threshold is NaN.",
                    name,
                    observed.len()
                );
            }
            let threshold = match direction {
                ThresholdDirection::Above => mean + self.config.above_std_multiplier * std,
                ThresholdDirection::Below => mean - self.config.below_std_multiplier * std,
            };
            thresholds.insert(name.clone(), threshold);
        }
        Ok(ThresholdTable {
            direction,
            thresholds,
        })
    }

    /// Fraction of cells in each well whose `feature` value lies beyond the
    /// threshold, laid out in the canonical order.
    ///
    /// Missing values count toward a well's size but never as beyond the
    /// threshold. Wells without cells are NaN, including canonical labels
    /// that never occur in `table`; callers must handle those.
    ///
    /// # Errors
    /// - `Config` if `direction` differs from the direction `thresholds` were
    ///   computed for.
    /// - `Lookup` if `feature` is absent from the table or from `thresholds`,
    ///   or if a label in the table is absent from the canonical order.
    pub fn percentile_above_below(
        &self,
        table: &ScreenTable,
        feature: &str,
        thresholds: &ThresholdTable,
        direction: ThresholdDirection,
    ) -> Result<LabeledGrid<f64>> {
        if thresholds.direction() != direction {
            return Err(ScreenError::Config(format!(
                "thresholds were computed for '{}' but '{}' was requested",
                thresholds.direction(),
                direction
            )));
        }
        let column = table.feature_column(feature)?;
        let threshold = thresholds.get(feature)?;

        let mut beyond = LabeledGrid::filled(&self.order, 0usize);
        let mut sizes = LabeledGrid::filled(&self.order, 0usize);
        for (key, value) in table.groups().iter().zip(column) {
            let cell = self.order.position(key)?;
            sizes.values_mut()[cell] += 1;
            let flagged = match (value, direction) {
                (Some(v), ThresholdDirection::Above) => v > threshold,
                (Some(v), ThresholdDirection::Below) => v < threshold,
                (None, _) => false,
            };
            if flagged {
                beyond.values_mut()[cell] += 1;
            }
        }

        let mut fractions = LabeledGrid::filled(&self.order, f64::NAN);
        ndarray::Zip::from(fractions.values_mut())
            .and(beyond.values())
            .and(sizes.values())
            .for_each(|f, &hits, &n| {
                if n > 0 {
                    *f = hits as f64 / n as f64;
                }
            });
        Ok(fractions)
    }

    /// Thresholds once, then one percentile grid per feature column.
    pub fn extract_all_features(
        &self,
        table: &ScreenTable,
        direction: ThresholdDirection,
    ) -> Result<BTreeMap<String, LabeledGrid<f64>>> {
        let thresholds = self.compute_thresholds(table, direction)?;
        let grids = table
            .feature_names()
            .iter()
            .map(|feature| {
                self.percentile_above_below(table, feature, &thresholds, direction)
                    .map(|grid| (feature.clone(), grid))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        info!(
            "Extracted {} {} percentile grids over {} rows.",
            grids.len(),
            direction,
            table.n_rows()
        );
        Ok(grids)
    }
}

/// Mean and ddof = 1 standard deviation. NaN std below two values, NaN mean
/// for none.
fn mean_and_sample_std(values: &Array1<f64>) -> (f64, f64) {
    let mean = values.mean().unwrap_or(f64::NAN);
    if values.len() < 2 {
        return (mean, f64::NAN);
    }
    (mean, values.std(1.0))
}
