// In tests/screen_pipeline.rs

use approx::assert_abs_diff_eq;
use hcs_pca::{
    count_cells_per_well, normalise_cell_counts, CanonicalOrder, CovarianceKind, FillMethod,
    GroupKey, Interpolation, ObservationMatrix, PartialPca, ScreenError, ScreenTable,
    ThresholdConfig, ThresholdDirection, ThresholdEngine, TransformOptions,
};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Once;

static LOGGER_INIT: Once = Once::new();

fn init_logging() {
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

const CONTROL: &str = "0 ug/mL";

fn plate_order() -> CanonicalOrder {
    CanonicalOrder::new(
        ["Si-F8BT", "PP-F8BT", "DMSO"],
        [CONTROL, "0.137 ug/mL", "100 ug/mL"],
    )
}

/// Z-scored-looking table where `Area Nuc` of Si-F8BT grows with dose.
fn synthetic_screen(seed: u64) -> ScreenTable {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let treatments = ["Si-F8BT", "PP-F8BT"];
    let concentrations = [CONTROL, "0.137 ug/mL", "100 ug/mL"];
    let mut groups = Vec::new();
    let mut cells = Vec::new();
    for t in treatments {
        for (dose_idx, c) in concentrations.iter().enumerate() {
            for _ in 0..40 {
                groups.push(GroupKey::new(t, *c));
                let shift = if t == "Si-F8BT" { dose_idx as f64 * 1.5 } else { 0.0 };
                let area_nuc = rng.gen_range(-1.0..1.0) + shift;
                let area_cell = 0.8 * area_nuc + rng.gen_range(-0.3..0.3);
                let intensity = if rng.gen_range(0.0..1.0) < 0.1 {
                    None
                } else {
                    Some(rng.gen_range(-1.0..1.0))
                };
                cells.push([Some(area_nuc), Some(area_cell), intensity]);
            }
        }
    }
    let matrix = Array2::from_shape_fn((cells.len(), 3), |(r, c)| cells[r][c]);
    ScreenTable::new(
        vec![
            "Area Nuc".to_string(),
            "Area Cell".to_string(),
            "Mito Int Mean".to_string(),
        ],
        groups,
        ObservationMatrix::from_options(&matrix),
    )
    .unwrap()
}

#[test]
fn pca_on_screen_features_finds_shared_area_axis() {
    init_logging();
    let table = synthetic_screen(1);
    let mut pca = PartialPca::new(CovarianceKind::Correlation, None);
    pca.fit(table.values()).unwrap();

    // Area Nuc and Area Cell load on the same leading component.
    let first = &pca.eigen_pairs().unwrap()[0].eigenvector;
    assert!(first[0].abs() > 0.6 && first[1].abs() > 0.6);
    assert_eq!(first[0].signum(), first[1].signum());

    let scores = pca.transform(table.values(), &TransformOptions::default()).unwrap();
    assert_eq!(scores.dim(), (table.n_rows(), 3));
    assert!(scores.iter().all(|v| v.is_finite()));

    let shares = pca.explained_variance().unwrap();
    assert_abs_diff_eq!(shares.sum(), 1.0, epsilon = 1e-12);
    assert!(shares[0] > shares[2]);

    let reconstructed = pca.inv_transform(&scores).unwrap();
    for row in 0..table.n_rows() {
        assert_abs_diff_eq!(
            reconstructed[[row, 0]],
            table.values().get(row, 0).unwrap(),
            epsilon = 1e-9
        );
    }
}

#[test]
fn reduced_projection_then_full_again() {
    init_logging();
    let table = synthetic_screen(2);
    let mut pca = PartialPca::new(CovarianceKind::Covariance, Some(1));
    pca.fit(table.values()).unwrap();
    let scores = pca.transform(table.values(), &TransformOptions::default()).unwrap();
    assert_eq!(scores.ncols(), 1);
    assert!(matches!(
        pca.inv_transform(&scores),
        Err(ScreenError::Dimensionality { .. })
    ));

    pca.change_components(3).unwrap();
    let options = TransformOptions {
        interpolation: Some(Interpolation::Nearest),
        fill: Some(FillMethod::Backward),
    };
    let scores = pca.transform(table.values(), &options).unwrap();
    assert!(pca.inv_transform(&scores).is_ok());
}

#[test]
fn dose_dependent_feature_is_flagged_above_control() {
    init_logging();
    let table = synthetic_screen(3);
    let engine = ThresholdEngine::new(ThresholdConfig::default(), plate_order());
    let grids = engine
        .extract_all_features(&table, ThresholdDirection::Above)
        .unwrap();
    assert_eq!(grids.len(), 3);

    let area = &grids["Area Nuc"];
    let low = *area.get("Si-F8BT", CONTROL).unwrap();
    let high = *area.get("Si-F8BT", "100 ug/mL").unwrap();
    assert!(high > 0.9, "high dose fraction was {}", high);
    assert!(low < 0.2, "control fraction was {}", low);
    assert!(*area.get("PP-F8BT", "100 ug/mL").unwrap() < 0.2);

    // DMSO is in the canonical order but has no cells
    assert!(area.row("DMSO").unwrap().iter().all(|v| v.is_nan()));
}

#[test]
fn below_direction_uses_one_standard_deviation() {
    init_logging();
    let table = synthetic_screen(4);
    let engine = ThresholdEngine::new(ThresholdConfig::default(), plate_order());
    let above = engine
        .compute_thresholds(&table, ThresholdDirection::Above)
        .unwrap();
    let below = engine
        .compute_thresholds(&table, ThresholdDirection::Below)
        .unwrap();
    for (feature, upper) in above.iter() {
        let lower = below.get(feature).unwrap();
        // upper = m + 2s, lower = m - s  =>  upper - lower = 3s > 0
        assert!(upper > lower);
    }
    assert!(matches!(
        below.get("Perimeter"),
        Err(ScreenError::Lookup(_))
    ));
}

#[test]
fn wells_are_counted_and_normalised_to_controls() {
    init_logging();
    let table = synthetic_screen(5);
    let counts = count_cells_per_well(&table, &plate_order()).unwrap();
    assert_eq!(*counts.get("Si-F8BT", "100 ug/mL").unwrap(), 40);
    assert_eq!(*counts.get("DMSO", CONTROL).unwrap(), 0);

    let normalised = normalise_cell_counts(&counts, CONTROL).unwrap();
    assert_abs_diff_eq!(normalised.control_mean, 40.0, epsilon = 1e-12);
    assert_abs_diff_eq!(normalised.control_std, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(*normalised.percent.get("PP-F8BT", "0.137 ug/mL").unwrap(), 100.0, epsilon = 1e-12);
}

#[test]
fn configuration_round_trips_through_json() {
    let config = ThresholdConfig {
        control_concentration: "0 uM".to_string(),
        above_std_multiplier: 3.0,
        below_std_multiplier: 1.5,
    };
    let json = serde_json::to_string(&config).unwrap();
    let parsed: ThresholdConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);

    let order: CanonicalOrder = serde_json::from_str(
        r#"{"treatments":["H2O","DMSO"],"concentrations":["0 ug/mL","300ug/mL"]}"#,
    )
    .unwrap();
    assert_eq!(order.treatments, vec!["H2O", "DMSO"]);

    let options: TransformOptions =
        serde_json::from_str(r#"{"interpolation":null,"fill":"Forward"}"#).unwrap();
    assert_eq!(options.interpolation, None);
    assert_eq!(options.fill, Some(FillMethod::Forward));
}
