use log::debug;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScreenError};
use crate::table::{CanonicalOrder, LabeledGrid, ScreenTable};

/// Cell counts expressed relative to the negative controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalisedCounts {
    /// Mean count over non-empty control wells; 100% in `percent`.
    pub control_mean: f64,
    /// Population standard deviation of those control counts.
    pub control_std: f64,
    pub percent: LabeledGrid<f64>,
}

/// Number of cells (rows) in every treatment × concentration well.
/// Wells without rows count zero.
///
/// # Errors
/// `Lookup` if a row's label is absent from `order`.
pub fn count_cells_per_well(table: &ScreenTable, order: &CanonicalOrder) -> Result<LabeledGrid<usize>> {
    let mut counts = LabeledGrid::filled(order, 0usize);
    for key in table.groups() {
        let cell = order.position(key)?;
        counts.values_mut()[cell] += 1;
    }
    Ok(counts)
}

/// Rescales counts so the average non-empty control well equals 100.
///
/// # Errors
/// - `Lookup` if `control_concentration` is not a column of `counts`.
/// - `InsufficientData` if every control well is empty.
pub fn normalise_cell_counts(
    counts: &LabeledGrid<usize>,
    control_concentration: &str,
) -> Result<NormalisedCounts> {
    let controls: Array1<f64> = counts
        .column(control_concentration)?
        .iter()
        .filter(|&&n| n > 0)
        .map(|&n| n as f64)
        .collect();
    if controls.is_empty() {
        return Err(ScreenError::InsufficientData(format!(
            "every '{}' control well is empty",
            control_concentration
        )));
    }

    let control_mean = controls.mean().unwrap_or(f64::NAN);
    let control_std = controls.std(0.0);
    debug!(
        "Control wells: {} non-empty, mean {:.3} cells, std {:.3}.",
        controls.len(),
        control_mean,
        control_std
    );

    Ok(NormalisedCounts {
        control_mean,
        control_std,
        percent: counts.map(|&c| c as f64 / control_mean * 100.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::ObservationMatrix;
    use crate::table::GroupKey;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn labelled(keys: &[(&str, &str)]) -> ScreenTable {
        ScreenTable::new(
            vec!["Area Nuc".to_string()],
            keys.iter().map(|(t, c)| GroupKey::new(*t, *c)).collect(),
            ObservationMatrix::from_dense(Array2::zeros((keys.len(), 1))),
        )
        .unwrap()
    }

    #[test]
    fn counts_rows_per_well_in_canonical_order() {
        let table = labelled(&[("A", "0"), ("A", "0"), ("B", "1"), ("A", "1")]);
        let order = CanonicalOrder::new(["B", "A"], ["0", "1", "2"]);
        let counts = count_cells_per_well(&table, &order).unwrap();
        assert_eq!(counts.values(), &ndarray::array![[0usize, 1, 0], [2, 1, 0]]);
    }

    #[test]
    fn unknown_label_fails() {
        let table = labelled(&[("A", "0"), ("C", "0")]);
        let order = CanonicalOrder::new(["A"], ["0"]);
        assert!(matches!(
            count_cells_per_well(&table, &order),
            Err(ScreenError::Lookup(_))
        ));
    }

    #[test]
    fn normalises_against_non_empty_controls() {
        // A: 4 controls, B: 0 controls (ignored), C: 2 controls => mean 3
        let table = labelled(&[
            ("A", "0"),
            ("A", "0"),
            ("A", "0"),
            ("A", "0"),
            ("A", "5"),
            ("C", "0"),
            ("C", "0"),
            ("B", "5"),
            ("B", "5"),
            ("B", "5"),
        ]);
        let order = CanonicalOrder::new(["A", "B", "C"], ["0", "5"]);
        let counts = count_cells_per_well(&table, &order).unwrap();
        let normalised = normalise_cell_counts(&counts, "0").unwrap();
        assert_abs_diff_eq!(normalised.control_mean, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(normalised.control_std, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(*normalised.percent.get("B", "5").unwrap(), 100.0, epsilon = 1e-12);
        assert_abs_diff_eq!(*normalised.percent.get("A", "5").unwrap(), 100.0 / 3.0, epsilon = 1e-12);
        assert_eq!(*normalised.percent.get("B", "0").unwrap(), 0.0);
    }

    #[test]
    fn empty_controls_are_an_error() {
        let table = labelled(&[("A", "5")]);
        let order = CanonicalOrder::new(["A"], ["0", "5"]);
        let counts = count_cells_per_well(&table, &order).unwrap();
        assert!(matches!(
            normalise_cell_counts(&counts, "0"),
            Err(ScreenError::InsufficientData(_))
        ));
        assert!(matches!(
            normalise_cell_counts(&counts, "1"),
            Err(ScreenError::Lookup(_))
        ));
    }
}
