//! Spectral index transforms
//!
//! Each index reduces the canonical reflectance bands to one scalar per pixel.
//! Inputs are physical surface reflectance; legacy observations are rescaled
//! here before the formula is applied.

use crate::types::{
    Band, BaselineError, BaselineResult, CanonicalBand, GridSpec, Mask, Observation, SceneMetadata,
};
use ndarray::{Array2, Zip};
use num_traits::{Float, NumCast};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported dependent indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectralIndex {
    /// Normalized Burn Ratio
    NBR,
    /// Normalized Difference Moisture Index
    NDMI,
    /// Normalized Difference Vegetation Index
    NDVI,
    /// Normalized Difference Snow Index
    NDSI,
    /// Enhanced Vegetation Index
    EVI,
    /// Tasseled-cap brightness
    TCB,
    /// Tasseled-cap greenness
    TCG,
    /// Tasseled-cap wetness
    TCW,
    /// Simple Ratio
    SR,
}

/// Surface reflectance of one pixel
#[derive(Debug, Clone, Copy)]
pub struct Reflectance<T> {
    pub blue: T,
    pub green: T,
    pub red: T,
    pub nir: T,
    pub swir1: T,
    pub swir2: T,
}

#[inline]
fn normalized_difference<T: Float>(a: T, b: T) -> T {
    (a - b) / (a + b)
}

#[inline]
fn c<T: Float>(value: f64) -> T {
    <T as NumCast>::from(value).unwrap_or_else(T::nan)
}

fn tasseled_cap<T: Float>(r: &Reflectance<T>, w: [f64; 6]) -> T {
    c::<T>(w[0]) * r.blue
        + c::<T>(w[1]) * r.green
        + c::<T>(w[2]) * r.red
        + c::<T>(w[3]) * r.nir
        + c::<T>(w[4]) * r.swir1
        + c::<T>(w[5]) * r.swir2
}

const TC_BRIGHTNESS: [f64; 6] = [0.2043, 0.4158, 0.5524, 0.5741, 0.3124, 0.2303];
const TC_GREENNESS: [f64; 6] = [-0.1603, -0.2819, -0.4934, 0.7940, -0.0002, -0.1446];
const TC_WETNESS: [f64; 6] = [0.0315, 0.2021, 0.3102, 0.1594, -0.6806, -0.6109];

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 9] = [
        SpectralIndex::NBR,
        SpectralIndex::NDMI,
        SpectralIndex::NDVI,
        SpectralIndex::NDSI,
        SpectralIndex::EVI,
        SpectralIndex::TCB,
        SpectralIndex::TCG,
        SpectralIndex::TCW,
        SpectralIndex::SR,
    ];

    /// Output band name (lowercase index name)
    pub fn band_name(&self) -> &'static str {
        match self {
            SpectralIndex::NBR => "nbr",
            SpectralIndex::NDMI => "ndmi",
            SpectralIndex::NDVI => "ndvi",
            SpectralIndex::NDSI => "ndsi",
            SpectralIndex::EVI => "evi",
            SpectralIndex::TCB => "tcb",
            SpectralIndex::TCG => "tcg",
            SpectralIndex::TCW => "tcw",
            SpectralIndex::SR => "sr",
        }
    }

    /// Evaluate the index for one pixel
    pub fn compute<T: Float>(&self, r: &Reflectance<T>) -> T {
        match self {
            SpectralIndex::NBR => normalized_difference(r.nir, r.swir2),
            SpectralIndex::NDMI => normalized_difference(r.nir, r.swir1),
            SpectralIndex::NDVI => normalized_difference(r.nir, r.red),
            SpectralIndex::NDSI => normalized_difference(r.green, r.swir1),
            SpectralIndex::EVI => {
                c::<T>(2.5) * (r.nir - r.red)
                    / (r.nir + c::<T>(6.0) * r.red - c::<T>(7.5) * r.blue + T::one())
            }
            SpectralIndex::TCB => tasseled_cap(r, TC_BRIGHTNESS),
            SpectralIndex::TCG => tasseled_cap(r, TC_GREENNESS),
            SpectralIndex::TCW => tasseled_cap(r, TC_WETNESS),
            SpectralIndex::SR => r.nir / r.red,
        }
    }
}

impl FromStr for SpectralIndex {
    type Err = BaselineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        SpectralIndex::ALL
            .iter()
            .find(|index| index.band_name().eq_ignore_ascii_case(name))
            .copied()
            .ok_or_else(|| {
                BaselineError::InvalidConfiguration(format!(
                    "The index you provided is not supported: {}",
                    s
                ))
            })
    }
}

impl std::fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.band_name().to_uppercase())
    }
}

/// Single-band observation carrying the dependent index
#[derive(Debug, Clone)]
pub struct IndexObservation {
    pub metadata: SceneMetadata,
    pub grid: GridSpec,
    pub index: SpectralIndex,
    pub values: Band,
    pub valid: Mask,
}

impl IndexObservation {
    pub fn band_name(&self) -> &'static str {
        self.index.band_name()
    }

    /// Value at a pixel if it is usable
    #[inline]
    pub fn value_at(&self, row: usize, col: usize) -> Option<f32> {
        if self.valid[[row, col]] {
            Some(self.values[[row, col]])
        } else {
            None
        }
    }

    pub fn valid_pixels(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }
}

/// Reduces a screened canonical observation to its dependent index
#[derive(Debug, Clone, Copy)]
pub struct SpectralTransform {
    index: SpectralIndex,
}

impl SpectralTransform {
    pub fn new(index: SpectralIndex) -> Self {
        Self { index }
    }

    /// Validate the index name up front
    pub fn from_name(name: &str) -> BaselineResult<Self> {
        Ok(Self::new(name.parse()?))
    }

    pub fn index(&self) -> SpectralIndex {
        self.index
    }

    /// Apply the transform; pixels with a non-finite result are masked
    pub fn apply(&self, obs: &Observation) -> BaselineResult<IndexObservation> {
        let blue = obs.physical_band(CanonicalBand::Blue)?;
        let green = obs.physical_band(CanonicalBand::Green)?;
        let red = obs.physical_band(CanonicalBand::Red)?;
        let nir = obs.physical_band(CanonicalBand::Nir)?;
        let swir1 = obs.physical_band(CanonicalBand::Swir1)?;
        let swir2 = obs.physical_band(CanonicalBand::Swir2)?;

        let index = self.index;
        let mut values = compute_index(index, &blue, &green, &red, &nir, &swir1, &swir2)?;

        let mut valid = obs.valid.clone();
        Zip::from(&mut values).and(&mut valid).for_each(|v, ok| {
            if !*ok || !v.is_finite() {
                *ok = false;
                *v = f32::NAN;
            }
        });

        Ok(IndexObservation {
            metadata: obs.metadata.clone(),
            grid: obs.grid,
            index,
            values,
            valid,
        })
    }
}

/// Evaluate an index over whole band rasters (physical reflectance)
pub fn compute_index(
    index: SpectralIndex,
    blue: &Band,
    green: &Band,
    red: &Band,
    nir: &Band,
    swir1: &Band,
    swir2: &Band,
) -> BaselineResult<Band> {
    let shape = blue.dim();
    for band in [green, red, nir, swir1, swir2] {
        if band.dim() != shape {
            return Err(BaselineError::Processing(format!(
                "Band shapes differ: {:?} vs {:?}",
                shape,
                band.dim()
            )));
        }
    }
    Ok(Array2::from_shape_fn(shape, |idx| {
        index.compute(&Reflectance {
            blue: blue[idx],
            green: green[idx],
            red: red[idx],
            nir: nir[idx],
            swir1: swir1[idx],
            swir2: swir2[idx],
        })
    }))
}
