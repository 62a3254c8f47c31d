//! Quality mosaic compositing of regression results
//!
//! Results that share a WRS-2 path are merged onto their union grid. At every
//! pixel the resolved result with the most valid observations wins and all of
//! its bands are copied; ties go to the lower row number so the merge does not
//! depend on input order. The mosaic is then clipped to the region of interest
//! and rescaled to integers for storage.

use crate::core::regression::RegressionResult;
use crate::types::{year_start, BandStack, BaselineError, BaselineResult, BoundingBox, GridSpec, Mask};
use chrono::{DateTime, Utc};
use ndarray::{s, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Integer fill value for unresolved pixels
pub const NODATA: i32 = i32::MIN;

/// Regression results sharing one path
#[derive(Debug, Clone)]
pub struct SpatialGroup {
    pub path: u16,
    pub results: Vec<RegressionResult>,
}

/// Group regression results by path, in path order
pub fn group_by_path(results: Vec<RegressionResult>) -> Vec<SpatialGroup> {
    let mut groups: BTreeMap<u16, Vec<RegressionResult>> = BTreeMap::new();
    for result in results {
        groups.entry(result.path_row.path).or_default().push(result);
    }
    groups
        .into_iter()
        .map(|(path, mut results)| {
            results.sort_by_key(|r| r.path_row);
            SpatialGroup { path, results }
        })
        .collect()
}

/// Tags a stored baseline is keyed by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductTags {
    pub index_name: String,
    pub start_year: i32,
    pub end_year: i32,
    pub harmonics: String,
    pub version: String,
}

/// Metadata attached to every baseline raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetadata {
    pub tags: ProductTags,
    pub path: u16,
    /// Rows of the contributing regression results
    pub rows: Vec<u16>,
    pub rescale_multiplier: i32,
    /// 1 January of the start year
    pub time_start: DateTime<Utc>,
    /// 1 January of the end year
    pub time_end: DateTime<Utc>,
}

impl BaselineMetadata {
    /// Storage key, e.g. `ndvi_2013_2018_annual+4mo_v1_p044`
    pub fn asset_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_p{:03}",
            self.tags.index_name,
            self.tags.start_year,
            self.tags.end_year,
            self.tags.harmonics,
            self.tags.version,
            self.path
        )
    }
}

/// Float mosaic before rescaling
#[derive(Debug, Clone)]
pub struct QualityMosaic {
    pub grid: GridSpec,
    pub band_names: Vec<String>,
    /// Band x row x col; NaN where unresolved
    pub bands: BandStack,
    pub valid: Mask,
}

impl QualityMosaic {
    /// Restrict the mosaic to the pixels covering `roi`
    pub fn clip(&self, roi: &BoundingBox) -> BaselineResult<QualityMosaic> {
        let (r0, r1, c0, c1) = self.grid.window(roi).ok_or_else(|| {
            BaselineError::Processing("Region of interest does not overlap the mosaic".to_string())
        })?;
        Ok(QualityMosaic {
            grid: self.grid.shifted(r0 as isize, c0 as isize, r1 - r0, c1 - c0),
            band_names: self.band_names.clone(),
            bands: self.bands.slice(s![.., r0..r1, c0..c1]).to_owned(),
            valid: self.valid.slice(s![r0..r1, c0..c1]).to_owned(),
        })
    }
}

/// Rescaled, clipped baseline of one path
#[derive(Debug, Clone)]
pub struct BaselineRaster {
    pub metadata: BaselineMetadata,
    pub grid: GridSpec,
    pub band_names: Vec<String>,
    /// Band x row x col; `NODATA` where unresolved
    pub data: Array3<i32>,
    pub valid: Mask,
}

impl BaselineRaster {
    pub fn band(&self, name: &str) -> Option<ArrayView2<'_, i32>> {
        let k = self.band_names.iter().position(|b| b == name)?;
        Some(self.data.slice(s![k, .., ..]))
    }

    /// Stored value divided back by the multiplier
    pub fn value_at(&self, name: &str, row: usize, col: usize) -> Option<f64> {
        if !*self.valid.get((row, col))? {
            return None;
        }
        let raw = *self.band(name)?.get((row, col))?;
        Some(raw as f64 / self.metadata.rescale_multiplier as f64)
    }

    pub fn valid_pixels(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }
}

/// Compositor parameters
#[derive(Debug, Clone)]
pub struct MosaicParams {
    pub rescale_multiplier: i32,
    /// Rows per parallel tile
    pub tile_rows: usize,
}

impl Default for MosaicParams {
    fn default() -> Self {
        Self {
            rescale_multiplier: 10000,
            tile_rows: 64,
        }
    }
}

/// A member result placed on the union grid
struct Placed<'a> {
    result: &'a RegressionResult,
    stack: BandStack,
    row_offset: usize,
    col_offset: usize,
}

impl Placed<'_> {
    /// Local pixel for a union-grid pixel, if covered
    #[inline]
    fn local(&self, row: usize, col: usize) -> Option<(usize, usize)> {
        let (rows, cols) = self.result.grid.shape();
        let r = row.checked_sub(self.row_offset)?;
        let c = col.checked_sub(self.col_offset)?;
        (r < rows && c < cols).then_some((r, c))
    }
}

/// Pick the winning member at one pixel: most observations, then lowest row
fn select<'p, 'a>(placed: &'p [Placed<'a>], row: usize, col: usize) -> Option<(&'p Placed<'a>, (usize, usize))> {
    let mut best: Option<(&Placed, (usize, usize))> = None;
    for candidate in placed {
        let Some(idx) = candidate.local(row, col) else {
            continue;
        };
        if !candidate.result.resolved[idx] {
            continue;
        }
        let better = match best {
            None => true,
            Some((current, current_idx)) => {
                let (n, m) = (candidate.result.nobs[idx], current.result.nobs[current_idx]);
                n > m || (n == m && candidate.result.path_row < current.result.path_row)
            }
        };
        if better {
            best = Some((candidate, idx));
        }
    }
    best
}

/// Pixel-wise quality mosaic over compatible, pixel-aligned results
pub fn quality_mosaic(results: &[RegressionResult], tile_rows: usize) -> BaselineResult<QualityMosaic> {
    let first = results
        .first()
        .ok_or_else(|| BaselineError::Processing("Cannot composite an empty group".to_string()))?;
    let band_names = first.band_names();

    // Step 1: union grid
    let mut offsets = Vec::with_capacity(results.len());
    for result in results {
        if result.band_names() != band_names {
            return Err(BaselineError::Processing(format!(
                "Result {} has bands {:?}, expected {:?}",
                result.path_row,
                result.band_names(),
                band_names
            )));
        }
        let offset = first.grid.pixel_offset_of(&result.grid).ok_or_else(|| {
            BaselineError::GridMismatch(format!(
                "Result {} is not pixel-aligned with {}",
                result.path_row, first.path_row
            ))
        })?;
        offsets.push(offset);
    }
    let min_row = offsets.iter().map(|o| o.0).min().unwrap_or(0);
    let min_col = offsets.iter().map(|o| o.1).min().unwrap_or(0);
    let max_row = results
        .iter()
        .zip(&offsets)
        .map(|(r, o)| o.0 + r.grid.rows as isize)
        .max()
        .unwrap_or(0);
    let max_col = results
        .iter()
        .zip(&offsets)
        .map(|(r, o)| o.1 + r.grid.cols as isize)
        .max()
        .unwrap_or(0);
    let rows = (max_row - min_row) as usize;
    let cols = (max_col - min_col) as usize;
    let grid = first.grid.shifted(min_row, min_col, rows, cols);

    log::debug!(
        "Union grid for {} results: {}x{} pixels",
        results.len(),
        rows,
        cols
    );

    let placed: Vec<Placed> = results
        .iter()
        .zip(&offsets)
        .map(|(result, o)| Placed {
            result,
            stack: result.to_stack(),
            row_offset: (o.0 - min_row) as usize,
            col_offset: (o.1 - min_col) as usize,
        })
        .collect();

    // Step 2: per-pixel selection over row tiles
    let nbands = band_names.len();
    let tile_rows = tile_rows.max(1);
    let tile_starts: Vec<usize> = (0..rows).step_by(tile_rows).collect();
    let select_tile = |start: usize| {
        let end = (start + tile_rows).min(rows);
        let mut bands = Array3::from_elem((nbands, end - start, cols), f32::NAN);
        let mut valid = Array2::from_elem((end - start, cols), false);
        for row in start..end {
            for col in 0..cols {
                if let Some((winner, (r, c))) = select(&placed, row, col) {
                    bands
                        .slice_mut(s![.., row - start, col])
                        .assign(&winner.stack.slice(s![.., r, c]));
                    valid[[row - start, col]] = true;
                }
            }
        }
        (start, bands, valid)
    };

    #[cfg(feature = "parallel")]
    let tiles: Vec<(usize, Array3<f32>, Array2<bool>)> = tile_starts.par_iter().map(|&start| select_tile(start)).collect();
    #[cfg(not(feature = "parallel"))]
    let tiles: Vec<(usize, Array3<f32>, Array2<bool>)> = tile_starts.iter().map(|&start| select_tile(start)).collect();

    let mut bands = Array3::from_elem((nbands, rows, cols), f32::NAN);
    let mut valid = Array2::from_elem((rows, cols), false);
    for (start, tile_bands, tile_valid) in tiles {
        let end = start + tile_valid.nrows();
        bands.slice_mut(s![.., start..end, ..]).assign(&tile_bands);
        valid.slice_mut(s![start..end, ..]).assign(&tile_valid);
    }

    Ok(QualityMosaic {
        grid,
        band_names,
        bands,
        valid,
    })
}

/// Truncating integer rescale; unresolved pixels become `NODATA`.
///
/// Scaled values outside `(i32::MIN, i32::MAX]` saturate to the nearest
/// representable value above `NODATA` and are counted in a warning.
pub fn rescale(mosaic: &QualityMosaic, multiplier: i32) -> Array3<i32> {
    const LOWEST: f64 = (NODATA as f64) + 1.0;
    const HIGHEST: f64 = i32::MAX as f64;

    let mut data = Array3::from_elem(mosaic.bands.dim(), NODATA);
    let mut saturated = 0usize;
    for ((band, row, col), out) in data.indexed_iter_mut() {
        let value = mosaic.bands[[band, row, col]];
        if mosaic.valid[[row, col]] && value.is_finite() {
            let scaled = (value as f64 * multiplier as f64).trunc();
            if !(LOWEST..=HIGHEST).contains(&scaled) {
                saturated += 1;
            }
            *out = scaled.clamp(LOWEST, HIGHEST) as i32;
        }
    }
    if saturated > 0 {
        log::warn!(
            "{} values exceed the integer range at multiplier {} and were saturated",
            saturated,
            multiplier
        );
    }
    data
}

/// Composites each spatial group into a baseline raster
pub struct QualityMosaicCompositor {
    params: MosaicParams,
}

impl QualityMosaicCompositor {
    pub fn new(params: MosaicParams) -> BaselineResult<Self> {
        if params.rescale_multiplier <= 0 {
            return Err(BaselineError::InvalidConfiguration(format!(
                "Rescale multiplier must be positive, got {}",
                params.rescale_multiplier
            )));
        }
        Ok(Self { params })
    }

    pub fn composite(
        &self,
        group: &SpatialGroup,
        roi: &BoundingBox,
        tags: &ProductTags,
    ) -> BaselineResult<BaselineRaster> {
        log::info!(
            "🧩 Compositing path {:03} from {} regression results",
            group.path,
            group.results.len()
        );

        if let Some(stray) = group.results.iter().find(|r| r.path_row.path != group.path) {
            return Err(BaselineError::Processing(format!(
                "Result {} does not belong to path {:03}",
                stray.path_row, group.path
            )));
        }

        let mosaic = quality_mosaic(&group.results, self.params.tile_rows)?;
        let clipped = mosaic.clip(roi)?;
        let data = rescale(&clipped, self.params.rescale_multiplier);

        let metadata = BaselineMetadata {
            tags: tags.clone(),
            path: group.path,
            rows: group.results.iter().map(|r| r.path_row.row).collect(),
            rescale_multiplier: self.params.rescale_multiplier,
            time_start: year_start(tags.start_year)?,
            time_end: year_start(tags.end_year)?,
        };

        let raster = BaselineRaster {
            metadata,
            grid: clipped.grid,
            band_names: clipped.band_names,
            data,
            valid: clipped.valid,
        };

        log::info!(
            "✅ {}: {}x{} pixels, {} resolved",
            raster.metadata.asset_name(),
            raster.grid.rows,
            raster.grid.cols,
            raster.valid_pixels()
        );
        Ok(raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::types::{CoordinateSystem, GeoTransform, PathRow};
    use approx::assert_abs_diff_eq;

    fn grid(x: f64, y: f64, rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            CoordinateSystem::Projected { epsg: 32610 },
            GeoTransform::north_up(x, y, 30.0),
            rows,
            cols,
        )
    }

    /// Result whose every coefficient equals `level`, with the given nobs raster
    fn result(row: u16, grid: GridSpec, level: f32, nobs: Vec<u32>) -> RegressionResult {
        let shape = grid.shape();
        let nobs = Array2::from_shape_vec(shape, nobs).unwrap();
        let resolved = nobs.mapv(|n| n >= 4);
        let mut coefficients = Array3::from_elem((4, shape.0, shape.1), level);
        let mut rmse = Array2::from_elem(shape, level / 10.0);
        for ((r, c), ok) in resolved.indexed_iter() {
            if !*ok {
                coefficients.slice_mut(s![.., r, c]).fill(f32::NAN);
                rmse[[r, c]] = f32::NAN;
            }
        }
        RegressionResult {
            path_row: PathRow::new(44, row),
            grid,
            term_names: vec!["constant".into(), "t".into(), "cos_1".into(), "sin_1".into()],
            frequencies: vec![1.0],
            coefficients,
            rmse,
            nobs,
            resolved,
        }
    }

    fn tags() -> ProductTags {
        ProductTags {
            index_name: "ndvi".to_string(),
            start_year: 2013,
            end_year: 2018,
            harmonics: "annual".to_string(),
            version: "v1".to_string(),
        }
    }

    #[test]
    fn test_highest_nobs_wins_whole_band_set() {
        let g = grid(0.0, 60.0, 1, 2);
        let a = result(33, g, 0.2, vec![10, 30]);
        let b = result(34, g, 0.7, vec![25, 12]);

        let mosaic = quality_mosaic(&[a, b], 64).unwrap();
        assert_eq!(mosaic.band_names, vec!["constant", "t", "cos_1", "sin_1", "rmse", "nobs"]);
        // pixel 0 from the 25-observation result, pixel 1 from the 30-observation one
        assert_eq!(mosaic.bands[[0, 0, 0]], 0.7);
        assert_abs_diff_eq!(mosaic.bands[[4, 0, 0]], 0.07, epsilon = 1e-6);
        assert_eq!(mosaic.bands[[5, 0, 0]], 25.0);
        assert_eq!(mosaic.bands[[0, 0, 1]], 0.2);
        assert_eq!(mosaic.bands[[5, 0, 1]], 30.0);
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let a = result(33, grid(0.0, 90.0, 2, 2), 0.1, vec![8, 9, 12, 3]);
        let b = result(34, grid(30.0, 60.0, 2, 2), 0.5, vec![12, 12, 2, 20]);
        let c = result(35, grid(0.0, 60.0, 2, 2), 0.9, vec![12, 0, 7, 7]);

        let forward = quality_mosaic(&[a.clone(), b.clone(), c.clone()], 1).unwrap();
        let backward = quality_mosaic(&[c, b, a], 1).unwrap();
        assert_eq!(forward.grid, backward.grid);
        assert_eq!(forward.valid, backward.valid);
        let f = rescale(&forward, 10000);
        let b = rescale(&backward, 10000);
        assert_eq!(f, b);
        assert_eq!(forward.grid.shape(), (3, 3));
    }

    #[test]
    fn test_tie_goes_to_lower_row() {
        let g = grid(0.0, 30.0, 1, 1);
        let mosaic = quality_mosaic(&[result(35, g, 0.9, vec![10]), result(34, g, 0.4, vec![10])], 64).unwrap();
        assert_eq!(mosaic.bands[[0, 0, 0]], 0.4);
    }

    #[test]
    fn test_unresolved_everywhere_stays_unresolved() {
        let g = grid(0.0, 30.0, 1, 2);
        let mosaic = quality_mosaic(&[result(33, g, 0.3, vec![2, 9]), result(34, g, 0.3, vec![3, 1])], 64).unwrap();
        assert!(!mosaic.valid[[0, 0]]);
        assert!(mosaic.valid[[0, 1]]);
        let data = rescale(&mosaic, 10000);
        assert!(data.slice(s![.., 0, 0]).iter().all(|&v| v == NODATA));
    }

    #[test]
    fn test_rescale_saturates_above_nodata() {
        let g = grid(0.0, 30.0, 1, 3);
        let mut bands = Array3::from_elem((1, 1, 3), 0.0f32);
        bands[[0, 0, 0]] = -1.0e6;
        bands[[0, 0, 1]] = 1.0e6;
        bands[[0, 0, 2]] = -0.12349;
        let mosaic = QualityMosaic {
            grid: g,
            band_names: vec!["constant".to_string()],
            bands,
            valid: Array2::from_elem((1, 3), true),
        };

        let data = rescale(&mosaic, 10000);
        assert_eq!(data[[0, 0, 0]], NODATA + 1);
        assert_eq!(data[[0, 0, 1]], i32::MAX);
        // truncation toward zero
        assert_eq!(data[[0, 0, 2]], -1234);
    }

    #[test]
    fn test_misaligned_grids_rejected() {
        let a = result(33, grid(0.0, 30.0, 1, 1), 0.3, vec![9]);
        let b = result(34, grid(10.0, 30.0, 1, 1), 0.3, vec![9]);
        assert!(matches!(quality_mosaic(&[a, b], 64), Err(BaselineError::GridMismatch(_))));
    }

    #[test]
    fn test_composite_rescales_and_clips() {
        let g = grid(0.0, 60.0, 2, 2);
        let group = SpatialGroup {
            path: 44,
            results: vec![result(34, g, -0.12345, vec![9, 9, 9, 1])],
        };
        let compositor = QualityMosaicCompositor::new(MosaicParams::default()).unwrap();
        // covers the left column only
        let roi = BoundingBox::new(5.0, 5.0, 25.0, 55.0);
        let raster = compositor.composite(&group, &roi, &tags()).unwrap();

        assert_eq!(raster.grid.shape(), (2, 1));
        // truncation toward zero
        assert_eq!(raster.band("constant").unwrap()[[0, 0]], -1234);
        assert_eq!(raster.band("nobs").unwrap()[[0, 0]], 90000);
        assert_eq!(raster.metadata.rows, vec![34]);
        assert_eq!(raster.metadata.asset_name(), "ndvi_2013_2018_annual_v1_p044");
        assert_eq!(raster.metadata.time_end, Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap());

        let outside = BoundingBox::new(500.0, 500.0, 600.0, 600.0);
        assert!(compositor.composite(&group, &outside, &tags()).is_err());
    }

    #[test]
    fn test_group_by_path() {
        let g = grid(0.0, 30.0, 1, 1);
        let mut other = result(33, g, 0.1, vec![9]);
        other.path_row = PathRow::new(43, 33);
        let groups = group_by_path(vec![result(34, g, 0.1, vec![9]), other, result(33, g, 0.1, vec![9])]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].path, 43);
        let rows: Vec<u16> = groups[1].results.iter().map(|r| r.path_row.row).collect();
        assert_eq!(rows, vec![33, 34]);
    }
}
