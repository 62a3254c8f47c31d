//! Core baseline processing modules

pub mod harmonize;
pub mod cloud_score;
pub mod spectral_index;
pub mod design;
pub mod regression;
pub mod grouping;
pub mod mosaic;
pub mod pipeline;

// Re-export main types
pub use harmonize::{BandHarmonizer, GenerationProfile, QualityRule};
pub use cloud_score::{CloudScreener, CloudScreenParams, cloud_likelihood};
pub use spectral_index::{SpectralIndex, SpectralTransform, IndexObservation, Reflectance, compute_index};
pub use design::{HarmonicDesign, DesignedObservation, decimal_years_since_epoch};
pub use regression::{HarmonicRegressor, RegressionParams, RegressionResult, HarmonicModel, PixelFit};
pub use grouping::{SpatialUnit, SpatialUnitTable, ProcessingUnit, group_observations};
pub use mosaic::{QualityMosaicCompositor, MosaicParams, SpatialGroup, BaselineRaster, BaselineMetadata, ProductTags, NODATA};
pub use pipeline::BaselinePipeline;
