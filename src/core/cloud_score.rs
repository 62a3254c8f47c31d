use crate::types::{Band, BaselineError, BaselineResult, CanonicalBand, Observation};
use ndarray::{Array2, Zip};

/// Default minimum cloud score (1 = clear) for a pixel to be kept
pub const DEFAULT_CLOUD_SCORE_THRESHOLD: f32 = 0.8;

/// Cloud screening parameters
#[derive(Debug, Clone)]
pub struct CloudScreenParams {
    /// Pixels with cloud score >= threshold are kept
    pub threshold: f32,
}

impl Default for CloudScreenParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CLOUD_SCORE_THRESHOLD,
        }
    }
}

/// Linear rescale `(value - low) / (high - low)`; reversed pairs invert the ramp
#[derive(Debug, Clone, Copy)]
struct Ramp {
    low: f32,
    high: f32,
}

impl Ramp {
    const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    #[inline]
    fn apply(&self, value: f32) -> f32 {
        (value - self.low) / (self.high - self.low)
    }
}

// Clouds are bright in blue, bright in the visible and infrared sums, cool, and not snow.
// The temperature and snow ramps are reversed and none of the ramps are clamped.
const BLUE_BRIGHTNESS: Ramp = Ramp::new(0.1, 0.3);
const VISIBLE_SUM: Ramp = Ramp::new(0.2, 0.8);
const INFRARED_SUM: Ramp = Ramp::new(0.3, 0.8);
const TEMPERATURE: Ramp = Ramp::new(300.0, 290.0);
const SNOW_INDEX: Ramp = Ramp::new(0.8, 0.6);

/// NaN-propagating minimum
#[inline]
fn min_nan(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else {
        a.min(b)
    }
}

/// Per-pixel cloud likelihood from physical reflectance (1 = most cloud-like)
pub fn cloud_likelihood(
    blue: f32,
    green: f32,
    red: f32,
    nir: f32,
    swir1: f32,
    swir2: f32,
    temperature: Option<f32>,
) -> f32 {
    let mut score = 1.0f32;
    score = min_nan(score, BLUE_BRIGHTNESS.apply(blue));
    score = min_nan(score, VISIBLE_SUM.apply(red + green + blue));
    score = min_nan(score, INFRARED_SUM.apply(nir + swir1 + swir2));
    if let Some(t) = temperature {
        score = min_nan(score, TEMPERATURE.apply(t));
    }
    let ndsi = (green - swir1) / (green + swir1);
    min_nan(score, SNOW_INDEX.apply(ndsi))
}

/// Cloud screener: adds the inverted cloud score band and masks on it
pub struct CloudScreener {
    params: CloudScreenParams,
}

impl CloudScreener {
    pub fn new(params: CloudScreenParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(CloudScreenParams::default())
    }

    pub fn threshold(&self) -> f32 {
        self.params.threshold
    }

    /// Cloud likelihood raster for an observation
    pub fn likelihood(&self, obs: &Observation) -> BaselineResult<Band> {
        let blue = obs.physical_band(CanonicalBand::Blue)?;
        let green = obs.physical_band(CanonicalBand::Green)?;
        let red = obs.physical_band(CanonicalBand::Red)?;
        let nir = obs.physical_band(CanonicalBand::Nir)?;
        let swir1 = obs.physical_band(CanonicalBand::Swir1)?;
        let swir2 = obs.physical_band(CanonicalBand::Swir2)?;
        let temperature = if obs.has_band(CanonicalBand::Temperature) {
            Some(obs.physical_band(CanonicalBand::Temperature)?)
        } else {
            log::debug!("{}: no temperature band, skipping thermal test", obs.metadata.product_id);
            None
        };

        let likelihood = Array2::from_shape_fn(blue.dim(), |idx| {
            cloud_likelihood(
                blue[idx],
                green[idx],
                red[idx],
                nir[idx],
                swir1[idx],
                swir2[idx],
                temperature.as_ref().map(|t| t[idx]),
            )
        });
        Ok(likelihood)
    }

    /// Attach the inverted score band (1 = clear)
    pub fn add_cloud_score(&self, mut obs: Observation) -> BaselineResult<Observation> {
        let likelihood = self.likelihood(&obs)?;
        obs.cloud_score = Some(likelihood.mapv(|s| 1.0 - s));
        Ok(obs)
    }

    /// Mask pixels whose cloud score is below the threshold.
    ///
    /// A NaN score never passes the threshold.
    pub fn mask_cloud_score(&self, mut obs: Observation) -> BaselineResult<Observation> {
        let threshold = self.params.threshold;
        let score = obs.cloud_score.as_ref().ok_or_else(|| {
            BaselineError::Processing(format!(
                "Observation {} has no cloud score band",
                obs.metadata.product_id
            ))
        })?;

        let before = obs.valid_pixels();
        Zip::from(&mut obs.valid).and(score).for_each(|valid, &s| {
            *valid = *valid && s >= threshold;
        });

        log::debug!(
            "{}: cloud screening kept {} of {} valid pixels",
            obs.metadata.product_id,
            obs.valid_pixels(),
            before
        );
        Ok(obs)
    }

    /// Score and mask in one step
    pub fn screen(&self, obs: Observation) -> BaselineResult<Observation> {
        let scored = self.add_cloud_score(obs)?;
        self.mask_cloud_score(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Collection, CoordinateSystem, GeoTransform, GridSpec, PathRow, PhysicalScale,
        SceneMetadata, Spacecraft,
    };
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn observation(pixels: &[[f32; 7]]) -> Observation {
        let n = pixels.len();
        let mut bands = BTreeMap::new();
        let order = [
            CanonicalBand::Blue,
            CanonicalBand::Green,
            CanonicalBand::Red,
            CanonicalBand::Nir,
            CanonicalBand::Swir1,
            CanonicalBand::Swir2,
            CanonicalBand::Temperature,
        ];
        for (k, band) in order.iter().enumerate() {
            let values: Vec<f32> = pixels.iter().map(|p| p[k]).collect();
            bands.insert(*band, Array2::from_shape_vec((1, n), values).unwrap());
        }
        Observation {
            metadata: SceneMetadata {
                product_id: "TEST".to_string(),
                spacecraft: Spacecraft::Landsat8,
                collection: Collection::Collection2,
                acquired: Utc.with_ymd_and_hms(2015, 7, 1, 0, 0, 0).unwrap(),
                path_row: PathRow::new(44, 34),
                cloud_cover: 5.0,
            },
            grid: GridSpec::new(
                CoordinateSystem::Projected { epsg: 32610 },
                GeoTransform::north_up(0.0, 30.0, 30.0),
                1,
                n,
            ),
            bands,
            valid: Array2::from_elem((1, n), true),
            scale: PhysicalScale::IDENTITY,
            cloud_score: None,
        }
    }

    // vegetation, bright cold cloud, bright snow, warm bright desert
    const PIXELS: [[f32; 7]; 4] = [
        [0.03, 0.06, 0.04, 0.35, 0.18, 0.09, 300.0],
        [0.45, 0.45, 0.45, 0.45, 0.40, 0.30, 270.0],
        [0.80, 0.85, 0.80, 0.70, 0.08, 0.05, 265.0],
        [0.22, 0.28, 0.35, 0.40, 0.45, 0.40, 315.0],
    ];

    #[test]
    fn test_clear_vegetation_scores_clear() {
        let v = PIXELS[0];
        let likelihood = cloud_likelihood(v[0], v[1], v[2], v[3], v[4], v[5], Some(v[6]));
        // blue ramp: (0.03 - 0.1) / 0.2 = -0.35, unclamped
        assert!((likelihood - (-0.35)).abs() < 1e-6);
    }

    #[test]
    fn test_cloud_masking() {
        let screener = CloudScreener::standard();
        let obs = screener.screen(observation(&PIXELS)).unwrap();
        let kept: Vec<bool> = obs.valid.iter().cloned().collect();
        assert_eq!(kept, vec![true, false, true, true]);

        let score = obs.cloud_score.as_ref().unwrap();
        assert!((score[[0, 0]] - 1.35).abs() < 1e-5);
        // cloud: every indicator saturated, score capped at 1 before inversion
        assert!(score[[0, 1]].abs() < 1e-6);
    }

    #[test]
    fn test_zero_reflectance_is_not_kept() {
        let obs = observation(&[[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 290.0]]);
        let screened = CloudScreener::standard().screen(obs).unwrap();
        assert!(!screened.valid[[0, 0]]);
    }

    #[test]
    fn test_threshold_monotone() {
        let base = observation(&PIXELS);
        let mut previous: Option<Vec<bool>> = None;
        for threshold in [0.0f32, 0.5, 0.8, 0.9, 1.2, 1.4] {
            let screener = CloudScreener::new(CloudScreenParams { threshold });
            let kept: Vec<bool> = screener.screen(base.clone()).unwrap().valid.iter().cloned().collect();
            if let Some(prev) = &previous {
                for (now, before) in kept.iter().zip(prev.iter()) {
                    assert!(!*now || *before, "raising the threshold grew the kept set");
                }
            }
            previous = Some(kept);
        }
    }

    #[test]
    fn test_mask_requires_score() {
        let err = CloudScreener::standard().mask_cloud_score(observation(&PIXELS)).unwrap_err();
        assert!(matches!(err, BaselineError::Processing(_)));
    }
}
