// src/interpolate.rs

use log::{debug, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Result, ScreenError};
use crate::observation::ObservationMatrix;

/// Gap filling along the sample axis. Cells before the first observed value
/// are always left for [`FillMethod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    /// Straight line between the neighbouring observed values, by row index.
    /// Cells after the last observed value take that value.
    Linear,
    /// Value of the closer observed neighbour; equidistant gaps take the earlier one.
    /// Trailing cells stay missing.
    Nearest,
}

/// What to do with cells still missing after interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillMethod {
    /// Mean of the column after interpolation.
    Mean,
    /// Carry the last observed value forward.
    Forward,
    /// Carry the next observed value backward.
    Backward,
}

/// Options for `PartialPca::transform`. `None` disables a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    pub interpolation: Option<Interpolation>,
    pub fill: Option<FillMethod>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            interpolation: Some(Interpolation::Linear),
            fill: Some(FillMethod::Mean),
        }
    }
}

impl Interpolation {
    pub fn apply(self, column: &mut [Option<f64>]) {
        let observed: Vec<(usize, f64)> = column
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, v)))
            .collect();
        for pair in observed.windows(2) {
            let (start, v_start) = pair[0];
            let (end, v_end) = pair[1];
            for (i, cell) in column.iter_mut().enumerate().take(end).skip(start + 1) {
                *cell = Some(match self {
                    Interpolation::Linear => {
                        let t = (i - start) as f64 / (end - start) as f64;
                        v_start + (v_end - v_start) * t
                    }
                    Interpolation::Nearest => {
                        if i - start <= end - i {
                            v_start
                        } else {
                            v_end
                        }
                    }
                });
            }
        }
        if let (Interpolation::Linear, Some(&(last, v_last))) = (self, observed.last()) {
            column[last + 1..].iter_mut().for_each(|cell| *cell = Some(v_last));
        }
    }
}

impl FillMethod {
    pub fn apply(self, column: &mut [Option<f64>]) {
        match self {
            FillMethod::Mean => {
                let (sum, n) = column
                    .iter()
                    .flatten()
                    .fold((0.0_f64, 0usize), |(s, n), v| (s + v, n + 1));
                if n == 0 {
                    return;
                }
                let mean = sum / n as f64;
                column.iter_mut().filter(|c| c.is_none()).for_each(|c| *c = Some(mean));
            }
            FillMethod::Forward => carry(column.iter_mut()),
            FillMethod::Backward => carry(column.iter_mut().rev()),
        }
    }
}

fn carry<'a>(cells: impl Iterator<Item = &'a mut Option<f64>>) {
    let mut last = None;
    for cell in cells {
        match *cell {
            Some(v) => last = Some(v),
            None => *cell = last,
        }
    }
}

impl FromStr for Interpolation {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Interpolation::Linear),
            "nearest" => Ok(Interpolation::Nearest),
            other => Err(ScreenError::Config(format!(
                "unknown interpolation method '{}'",
                other
            ))),
        }
    }
}

impl FromStr for FillMethod {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(FillMethod::Mean),
            "ffill" | "pad" => Ok(FillMethod::Forward),
            "bfill" | "backfill" => Ok(FillMethod::Backward),
            other => Err(ScreenError::Config(format!("unknown fill method '{}'", other))),
        }
    }
}

/// Densifies `x` column by column: interpolation first, then fill.
/// Cells neither step could reach come back as NaN.
pub fn densify(x: &ObservationMatrix, options: &TransformOptions) -> Array2<f64> {
    let mut dense = Array2::from_elem(x.dim(), f64::NAN);
    let mut unfilled = 0usize;
    for col in 0..x.ncols() {
        let mut cells = x.column(col);
        if let Some(method) = options.interpolation {
            method.apply(&mut cells);
        }
        if let Some(fill) = options.fill {
            fill.apply(&mut cells);
        }
        for (row, cell) in cells.into_iter().enumerate() {
            match cell {
                Some(v) => dense[[row, col]] = v,
                None => unfilled += 1,
            }
        }
    }
    debug!(
        "Densified {} missing cells with {:?}; {} left unfilled.",
        x.n_missing(),
        options,
        unfilled
    );
    if unfilled > 0 {
        warn!(
            "{} cells remain missing after interpolation and fill; they propagate as NaN.",
            unfilled
        );
    }
    dense
}
