use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::{Result, ScreenError};
use crate::observation::ObservationMatrix;

/// The (treatment, concentration) pair a row belongs to, i.e. its well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub treatment: String,
    pub concentration: String,
}

impl GroupKey {
    pub fn new(treatment: impl Into<String>, concentration: impl Into<String>) -> Self {
        Self {
            treatment: treatment.into(),
            concentration: concentration.into(),
        }
    }
}

/// A cleaned per-cell table: one group key per row and one column per
/// measured feature. Features may have missing cells.
#[derive(Debug, Clone)]
pub struct ScreenTable {
    feature_names: Vec<String>,
    groups: Vec<GroupKey>,
    values: ObservationMatrix,
}

impl ScreenTable {
    /// # Errors
    /// - `Dimensionality` if `groups` or `feature_names` disagree with the
    ///   shape of `values`.
    /// - `Config` if a feature name is repeated.
    pub fn new(
        feature_names: Vec<String>,
        groups: Vec<GroupKey>,
        values: ObservationMatrix,
    ) -> Result<Self> {
        if groups.len() != values.nrows() {
            return Err(ScreenError::Dimensionality {
                context: "group labels per row".to_string(),
                expected: values.nrows(),
                actual: groups.len(),
            });
        }
        if feature_names.len() != values.ncols() {
            return Err(ScreenError::Dimensionality {
                context: "feature names per column".to_string(),
                expected: values.ncols(),
                actual: feature_names.len(),
            });
        }
        let mut seen = HashSet::with_capacity(feature_names.len());
        if let Some(dup) = feature_names.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(ScreenError::Config(format!("duplicate feature column '{}'", dup)));
        }
        Ok(Self {
            feature_names,
            groups,
            values,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn groups(&self) -> &[GroupKey] {
        &self.groups
    }

    pub fn values(&self) -> &ObservationMatrix {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.groups.len()
    }

    pub fn feature_index(&self, feature: &str) -> Result<usize> {
        self.feature_names
            .iter()
            .position(|name| name == feature)
            .ok_or_else(|| ScreenError::Lookup(format!("feature '{}' not in table", feature)))
    }

    pub fn feature_column(&self, feature: &str) -> Result<Vec<Option<f64>>> {
        Ok(self.values.column(self.feature_index(feature)?))
    }

    /// Row indices whose concentration label equals `concentration`.
    pub fn rows_with_concentration(&self, concentration: &str) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, g)| g.concentration == concentration)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn treatments(&self) -> BTreeSet<&str> {
        self.groups.iter().map(|g| g.treatment.as_str()).collect()
    }

    pub fn concentrations(&self) -> BTreeSet<&str> {
        self.groups.iter().map(|g| g.concentration.as_str()).collect()
    }
}

/// Fixed row (treatment) and column (concentration) order used for every
/// treatment × concentration grid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalOrder {
    pub treatments: Vec<String>,
    pub concentrations: Vec<String>,
}

impl CanonicalOrder {
    pub fn new<T, C>(treatments: T, concentrations: C) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            treatments: treatments.into_iter().map(Into::into).collect(),
            concentrations: concentrations.into_iter().map(Into::into).collect(),
        }
    }

    /// Grid cell of `key`.
    ///
    /// # Errors
    /// `Lookup` if either label is missing from the order.
    pub fn position(&self, key: &GroupKey) -> Result<(usize, usize)> {
        let row = self
            .treatments
            .iter()
            .position(|t| *t == key.treatment)
            .ok_or_else(|| {
                ScreenError::Lookup(format!(
                    "treatment '{}' missing from canonical row order",
                    key.treatment
                ))
            })?;
        let col = self
            .concentrations
            .iter()
            .position(|c| *c == key.concentration)
            .ok_or_else(|| {
                ScreenError::Lookup(format!(
                    "concentration '{}' missing from canonical column order",
                    key.concentration
                ))
            })?;
        Ok((row, col))
    }
}

/// A treatment × concentration table laid out in a [`CanonicalOrder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledGrid<T> {
    treatments: Vec<String>,
    concentrations: Vec<String>,
    values: Array2<T>,
}

impl<T: Clone> LabeledGrid<T> {
    pub fn filled(order: &CanonicalOrder, value: T) -> Self {
        Self {
            treatments: order.treatments.clone(),
            concentrations: order.concentrations.clone(),
            values: Array2::from_elem(
                (order.treatments.len(), order.concentrations.len()),
                value,
            ),
        }
    }

    pub fn treatments(&self) -> &[String] {
        &self.treatments
    }

    pub fn concentrations(&self) -> &[String] {
        &self.concentrations
    }

    /// Rows follow `treatments()`, columns follow `concentrations()`.
    pub fn values(&self) -> &Array2<T> {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut Array2<T> {
        &mut self.values
    }

    pub fn get(&self, treatment: &str, concentration: &str) -> Result<&T> {
        let row = self.treatment_index(treatment)?;
        let col = self.concentration_index(concentration)?;
        Ok(&self.values[[row, col]])
    }

    /// All concentrations for one treatment.
    pub fn row(&self, treatment: &str) -> Result<ArrayView1<'_, T>> {
        Ok(self.values.index_axis(Axis(0), self.treatment_index(treatment)?))
    }

    /// All treatments for one concentration.
    pub fn column(&self, concentration: &str) -> Result<ArrayView1<'_, T>> {
        Ok(self
            .values
            .index_axis(Axis(1), self.concentration_index(concentration)?))
    }

    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> LabeledGrid<U> {
        LabeledGrid {
            treatments: self.treatments.clone(),
            concentrations: self.concentrations.clone(),
            values: self.values.map(f),
        }
    }

    fn treatment_index(&self, treatment: &str) -> Result<usize> {
        self.treatments
            .iter()
            .position(|t| t == treatment)
            .ok_or_else(|| ScreenError::Lookup(format!("treatment '{}' not in grid", treatment)))
    }

    fn concentration_index(&self, concentration: &str) -> Result<usize> {
        self.concentrations
            .iter()
            .position(|c| c == concentration)
            .ok_or_else(|| {
                ScreenError::Lookup(format!("concentration '{}' not in grid", concentration))
            })
    }
}
