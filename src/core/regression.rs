//! Per-pixel harmonic regression
//!
//! Every pixel of a processing unit is fitted independently by ordinary least
//! squares against the harmonic design terms of the observations where that
//! pixel is valid. The model is
//!
//! ```text
//! y(t) = b0 + b1 t + sum_f [ c_f cos(2 pi f t) + s_f sin(2 pi f t) ]
//! ```
//!
//! A pixel with fewer valid observations than parameters, or whose valid rows
//! give a rank-deficient design, is unresolved and masked in every output band.

use crate::core::design::{decimal_years_since_epoch, DesignedObservation, HarmonicDesign};
use crate::core::grouping::ProcessingUnit;
use crate::core::spectral_index::IndexObservation;
use crate::types::{Band, BandStack, BaselineResult, GridSpec, Mask, PathRow};
use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};
use ndarray::{s, Array1, Array2, Array3};
use std::f64::consts::PI;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Regression parameters
#[derive(Debug, Clone)]
pub struct RegressionParams {
    /// Rows per parallel tile
    pub tile_rows: usize,
    /// Relative threshold on |R_jj| below which the design is rank deficient
    pub rank_tolerance: f64,
}

impl Default for RegressionParams {
    fn default() -> Self {
        Self {
            tile_rows: 64,
            rank_tolerance: 1e-10,
        }
    }
}

/// Fit of a single pixel
#[derive(Debug, Clone, PartialEq)]
pub struct PixelFit {
    pub coefficients: Vec<f64>,
    pub rmse: f64,
    pub nobs: usize,
}

/// Least-squares solution of `x * beta = y` by column-pivoted QR.
///
/// Returns `None` when `n < p`, the inputs are not finite or the columns of `x`
/// are numerically dependent: some `|R_jj| <= rank_tolerance * max|R_kk| * max(n, p)`.
pub fn solve_least_squares(x: &Array2<f64>, y: &Array1<f64>, rank_tolerance: f64) -> Option<Array1<f64>> {
    let (n, p) = x.dim();
    if p == 0 || n < p || y.len() != n {
        return None;
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let a = DMatrix::from_fn(n, p, |i, j| x[[i, j]]);
    let b = DVector::from_iterator(n, y.iter().copied());

    // A P = Q R
    let qr = a.col_piv_qr();
    let r = qr.r();
    let diag = r.diagonal();
    let max_diag = diag.amax();
    let threshold = rank_tolerance * max_diag * n.max(p) as f64;
    if max_diag == 0.0 || diag.iter().any(|d| d.abs() <= threshold) {
        return None;
    }

    let qty = qr.q().transpose() * b;
    let mut beta = r.solve_upper_triangular(&qty)?;
    qr.p().inv_permute_rows(&mut beta);
    Some(beta.iter().copied().collect())
}

/// Fit one pixel's valid rows; `None` when unresolved
pub fn fit_pixel(x: &Array2<f64>, y: &Array1<f64>, rank_tolerance: f64) -> Option<PixelFit> {
    let beta = solve_least_squares(x, y, rank_tolerance)?;
    let fitted = x.dot(&beta);
    let n = y.len();
    let sse: f64 = y.iter().zip(fitted.iter()).map(|(obs, fit)| (obs - fit).powi(2)).sum();
    Some(PixelFit {
        coefficients: beta.to_vec(),
        rmse: (sse / n as f64).sqrt(),
        nobs: n,
    })
}

/// Harmonic model of one pixel, evaluable at any time
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicModel {
    pub frequencies: Vec<f64>,
    pub coefficients: Vec<f64>,
}

impl HarmonicModel {
    /// Expected value at a decimal-year time
    pub fn evaluate_years(&self, t: f64) -> f64 {
        let k = self.frequencies.len();
        let mut value = self.coefficients[0] + self.coefficients[1] * t;
        for (i, f) in self.frequencies.iter().enumerate() {
            let angle = 2.0 * PI * f * t;
            value += self.coefficients[2 + i] * angle.cos() + self.coefficients[2 + k + i] * angle.sin();
        }
        value
    }

    pub fn evaluate(&self, time: &DateTime<Utc>) -> f64 {
        self.evaluate_years(decimal_years_since_epoch(time))
    }

    /// Amplitude and phase `(A, phi)` of the harmonic at frequency index `i`,
    /// such that `c cos(x) + s sin(x) = A cos(x - phi)`
    pub fn amplitude_phase(&self, i: usize) -> Option<(f64, f64)> {
        let k = self.frequencies.len();
        if i >= k {
            return None;
        }
        let c = self.coefficients[2 + i];
        let s = self.coefficients[2 + k + i];
        Some((c.hypot(s), s.atan2(c)))
    }
}

/// Regression result raster of one processing unit
#[derive(Debug, Clone)]
pub struct RegressionResult {
    pub path_row: PathRow,
    pub grid: GridSpec,
    pub term_names: Vec<String>,
    pub frequencies: Vec<f64>,
    /// Coefficients (term x row x col); NaN where unresolved
    pub coefficients: BandStack,
    /// NaN where unresolved
    pub rmse: Band,
    /// Valid observation count per pixel (also kept for unresolved pixels)
    pub nobs: Array2<u32>,
    pub resolved: Mask,
}

impl RegressionResult {
    /// Band names in output order: terms, `rmse`, `nobs`
    pub fn band_names(&self) -> Vec<String> {
        let mut names = self.term_names.clone();
        names.push("rmse".to_string());
        names.push("nobs".to_string());
        names
    }

    pub fn resolved_pixels(&self) -> usize {
        self.resolved.iter().filter(|&&v| v).count()
    }

    /// All output bands stacked, with every band NaN at unresolved pixels
    pub fn to_stack(&self) -> BandStack {
        let p = self.term_names.len();
        let (rows, cols) = self.grid.shape();
        let mut stack = Array3::from_elem((p + 2, rows, cols), f32::NAN);
        stack.slice_mut(s![..p, .., ..]).assign(&self.coefficients);
        stack.slice_mut(s![p, .., ..]).assign(&self.rmse);
        let mut nobs = stack.slice_mut(s![p + 1, .., ..]);
        for ((idx, out), &n) in nobs.indexed_iter_mut().zip(self.nobs.iter()) {
            if self.resolved[idx] {
                *out = n as f32;
            }
        }
        stack
    }

    /// Fitted model at a pixel, if resolved
    pub fn model_at(&self, row: usize, col: usize) -> Option<HarmonicModel> {
        if !*self.resolved.get((row, col))? {
            return None;
        }
        Some(HarmonicModel {
            frequencies: self.frequencies.clone(),
            coefficients: self
                .coefficients
                .slice(s![.., row, col])
                .iter()
                .map(|&v| v as f64)
                .collect(),
        })
    }

    /// Every pixel unresolved
    pub fn unresolved(path_row: PathRow, grid: GridSpec, design: &HarmonicDesign) -> Self {
        let p = design.num_terms();
        let shape = grid.shape();
        Self {
            path_row,
            grid,
            term_names: design.term_names().to_vec(),
            frequencies: design.frequencies().to_vec(),
            coefficients: Array3::from_elem((p, shape.0, shape.1), f32::NAN),
            rmse: Array2::from_elem(shape, f32::NAN),
            nobs: Array2::zeros(shape),
            resolved: Array2::from_elem(shape, false),
        }
    }
}

/// Re-express an observation on `grid`.
///
/// The observation must share the grid's coordinate reference and pixel lattice;
/// its extent may differ. Grid pixels it does not cover are invalid.
fn place_on_grid(obs: &IndexObservation, grid: &GridSpec) -> Option<IndexObservation> {
    if obs.grid.same_grid(grid) {
        return Some(obs.clone());
    }
    let (row_offset, col_offset) = grid.pixel_offset_of(&obs.grid)?;

    let shape = grid.shape();
    let mut values = Array2::from_elem(shape, f32::NAN);
    let mut valid = Array2::from_elem(shape, false);

    // overlap in grid pixels
    let r0 = row_offset.max(0);
    let r1 = (row_offset + obs.grid.rows as isize).min(grid.rows as isize);
    let c0 = col_offset.max(0);
    let c1 = (col_offset + obs.grid.cols as isize).min(grid.cols as isize);
    if r0 < r1 && c0 < c1 {
        let (src_r0, src_r1) = ((r0 - row_offset) as usize, (r1 - row_offset) as usize);
        let (src_c0, src_c1) = ((c0 - col_offset) as usize, (c1 - col_offset) as usize);
        let (r0, r1, c0, c1) = (r0 as usize, r1 as usize, c0 as usize, c1 as usize);
        values
            .slice_mut(s![r0..r1, c0..c1])
            .assign(&obs.values.slice(s![src_r0..src_r1, src_c0..src_c1]));
        valid
            .slice_mut(s![r0..r1, c0..c1])
            .assign(&obs.valid.slice(s![src_r0..src_r1, src_c0..src_c1]));
    } else {
        log::debug!("{} does not overlap its processing unit", obs.metadata.product_id);
    }

    Some(IndexObservation {
        metadata: obs.metadata.clone(),
        grid: *grid,
        index: obs.index,
        values,
        valid,
    })
}

/// Output of one row tile
struct TileFit {
    row_start: usize,
    coefficients: Array3<f32>,
    rmse: Array2<f32>,
    nobs: Array2<u32>,
    resolved: Array2<bool>,
}

/// Per-pixel harmonic regressor
pub struct HarmonicRegressor {
    design: HarmonicDesign,
    params: RegressionParams,
}

impl HarmonicRegressor {
    pub fn new(design: HarmonicDesign, params: RegressionParams) -> Self {
        Self { design, params }
    }

    pub fn design(&self) -> &HarmonicDesign {
        &self.design
    }

    /// Fit a processing unit on the unit's own grid
    pub fn fit_unit(&self, unit: &ProcessingUnit) -> BaselineResult<RegressionResult> {
        let path_row = unit.path_row();
        let grid = unit.grid();

        if unit.is_empty() {
            log::warn!("Processing unit {} has no observations; all pixels unresolved", path_row);
            return Ok(RegressionResult::unresolved(path_row, grid, &self.design));
        }

        let mut designed = Vec::with_capacity(unit.len());
        for obs in &unit.observations {
            match place_on_grid(obs, &grid) {
                Some(placed) => designed.push(self.design.augment(placed)),
                None => log::warn!(
                    "Skipping {}: grid is not pixel-aligned with processing unit {}",
                    obs.metadata.product_id,
                    path_row
                ),
            }
        }

        self.fit_observations(path_row, grid, &designed)
    }

    /// Fit a time-ordered sequence of designed observations sharing `grid`
    pub fn fit_observations(
        &self,
        path_row: PathRow,
        grid: GridSpec,
        observations: &[DesignedObservation],
    ) -> BaselineResult<RegressionResult> {
        let p = self.design.num_terms();
        let (rows, cols) = grid.shape();
        log::info!(
            "📈 Fitting {} terms over {} observations for {} ({}x{})",
            p,
            observations.len(),
            path_row,
            rows,
            cols
        );

        if observations.is_empty() {
            log::warn!("No usable observations for {}; all pixels unresolved", path_row);
            return Ok(RegressionResult::unresolved(path_row, grid, &self.design));
        }

        let tile_rows = self.params.tile_rows.max(1);
        let tile_starts: Vec<usize> = (0..rows).step_by(tile_rows).collect();

        #[cfg(feature = "parallel")]
        let tiles: Vec<TileFit> = tile_starts
            .par_iter()
            .map(|&start| self.fit_tile(observations, start, (start + tile_rows).min(rows), cols))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let tiles: Vec<TileFit> = tile_starts
            .iter()
            .map(|&start| self.fit_tile(observations, start, (start + tile_rows).min(rows), cols))
            .collect();

        let mut result = RegressionResult::unresolved(path_row, grid, &self.design);
        for tile in tiles {
            let end = tile.row_start + tile.rmse.nrows();
            result
                .coefficients
                .slice_mut(s![.., tile.row_start..end, ..])
                .assign(&tile.coefficients);
            result.rmse.slice_mut(s![tile.row_start..end, ..]).assign(&tile.rmse);
            result.nobs.slice_mut(s![tile.row_start..end, ..]).assign(&tile.nobs);
            result.resolved.slice_mut(s![tile.row_start..end, ..]).assign(&tile.resolved);
        }

        let resolved = result.resolved_pixels();
        log::info!(
            "{}: {} of {} pixels resolved ({:.1}%)",
            path_row,
            resolved,
            grid.pixel_count(),
            100.0 * resolved as f64 / grid.pixel_count().max(1) as f64
        );

        Ok(result)
    }

    fn fit_tile(&self, observations: &[DesignedObservation], row_start: usize, row_end: usize, cols: usize) -> TileFit {
        let p = self.design.num_terms();
        let height = row_end - row_start;
        let mut tile = TileFit {
            row_start,
            coefficients: Array3::from_elem((p, height, cols), f32::NAN),
            rmse: Array2::from_elem((height, cols), f32::NAN),
            nobs: Array2::zeros((height, cols)),
            resolved: Array2::from_elem((height, cols), false),
        };

        let mut rows_buf: Vec<usize> = Vec::with_capacity(observations.len());
        for i in 0..height {
            let row = row_start + i;
            for col in 0..cols {
                rows_buf.clear();
                rows_buf.extend(observations.iter().enumerate().filter_map(|(k, obs)| {
                    obs.observation
                        .value_at(row, col)
                        .filter(|v| v.is_finite())
                        .map(|_| k)
                }));
                let n = rows_buf.len();
                tile.nobs[[i, col]] = n as u32;
                if n < p {
                    continue;
                }

                let mut x = Array2::zeros((n, p));
                let mut y = Array1::zeros(n);
                for (r, &k) in rows_buf.iter().enumerate() {
                    x.row_mut(r).assign(&observations[k].terms);
                    y[r] = observations[k].observation.values[[row, col]] as f64;
                }

                if let Some(fit) = fit_pixel(&x, &y, self.params.rank_tolerance) {
                    for (term, value) in fit.coefficients.iter().enumerate() {
                        tile.coefficients[[term, i, col]] = *value as f32;
                    }
                    tile.rmse[[i, col]] = fit.rmse as f32;
                    tile.resolved[[i, col]] = true;
                }
            }
        }
        tile
    }
}
