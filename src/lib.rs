//! phenobase: per-pixel harmonic seasonal baselines from Landsat time series
//!
//! Multi-sensor Landsat observations (TM, ETM+, OLI; legacy and collection-2
//! products) are harmonized onto one band set, cloud screened, reduced to a
//! spectral index and fitted pixel by pixel with a harmonic regression. Results
//! of neighbouring rows on a path are merged into one quality mosaic baseline.

pub mod types;
pub mod config;
pub mod core;
pub mod io;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    Band, BandStack, BaselineError, BaselineResult, BoundingBox, CanonicalBand, Collection,
    CoordinateSystem, GeoTransform, GridSpec, Mask, Observation, PathRow, RawObservation,
    SceneMetadata, SensorGeneration, Spacecraft,
};

pub use config::{BaselineConfig, HarmonicPreset, SceneFilter, SensorPolicy};

pub use crate::core::{
    BandHarmonizer, BaselinePipeline, BaselineRaster, CloudScreener, HarmonicDesign,
    HarmonicModel, HarmonicRegressor, QualityMosaicCompositor, RegressionResult, SpatialUnit,
    SpatialUnitTable, SpectralIndex, SpectralTransform,
};

pub use io::SceneId;
