//! End-to-end baseline production
//!
//! Raw observations are scene-filtered, harmonized, cloud screened and reduced
//! to the dependent index in parallel. Grouping is the first barrier; each
//! processing unit is then fitted independently and every path is composited
//! once all of its units are done.

use crate::config::{BaselineConfig, SceneFilter};
use crate::core::cloud_score::{CloudScreenParams, CloudScreener};
use crate::core::design::HarmonicDesign;
use crate::core::grouping::{group_observations, ProcessingUnit, SpatialUnitTable};
use crate::core::harmonize::BandHarmonizer;
use crate::core::mosaic::{group_by_path, BaselineRaster, MosaicParams, ProductTags, QualityMosaicCompositor};
use crate::core::regression::{HarmonicRegressor, RegressionParams, RegressionResult};
use crate::core::spectral_index::{IndexObservation, SpectralTransform};
use crate::types::{BaselineError, BaselineResult, BoundingBox, RawObservation};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Configured baseline pipeline
pub struct BaselinePipeline {
    config: BaselineConfig,
    table: SpatialUnitTable,
    filter: SceneFilter,
    harmonizer: BandHarmonizer,
    screener: CloudScreener,
    transform: SpectralTransform,
    regressor: HarmonicRegressor,
    compositor: QualityMosaicCompositor,
}

impl BaselinePipeline {
    /// Validate the configuration and build every stage
    pub fn new(config: BaselineConfig, table: SpatialUnitTable) -> BaselineResult<Self> {
        config.validate()?;
        if table.is_empty() {
            return Err(BaselineError::InvalidConfiguration(
                "Spatial unit table is empty".to_string(),
            ));
        }

        let design = HarmonicDesign::new(&config.harmonics.frequencies())?;
        log::info!(
            "🛰️  Baseline pipeline: {} {} {}-{}, terms {:?}",
            config.index,
            config.harmonics.name(),
            config.start_year,
            config.end_year,
            design.term_names()
        );

        let regressor = HarmonicRegressor::new(
            design,
            RegressionParams {
                tile_rows: config.tile_rows,
                ..Default::default()
            },
        );
        let compositor = QualityMosaicCompositor::new(MosaicParams {
            rescale_multiplier: config.rescale_multiplier,
            tile_rows: config.tile_rows,
        })?;

        Ok(Self {
            filter: config.scene_filter()?,
            harmonizer: BandHarmonizer::new(),
            screener: CloudScreener::new(CloudScreenParams {
                threshold: config.cloud_score_threshold,
            }),
            transform: SpectralTransform::new(config.index),
            regressor,
            compositor,
            config,
            table,
        })
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    pub fn regressor(&self) -> &HarmonicRegressor {
        &self.regressor
    }

    /// Tags carried by every baseline this pipeline produces
    pub fn tags(&self) -> ProductTags {
        ProductTags {
            index_name: self.config.index.band_name().to_string(),
            start_year: self.config.start_year,
            end_year: self.config.end_year,
            harmonics: self.config.harmonics.name(),
            version: self.config.version.clone(),
        }
    }

    /// Harmonize, screen and transform one raw observation
    pub fn prepare(&self, raw: &RawObservation) -> BaselineResult<IndexObservation> {
        let observation = self.harmonizer.harmonize(raw)?;
        let screened = self.screener.screen(observation)?;
        self.transform.apply(&screened)
    }

    /// Prepare every raw observation that passes the scene filter.
    ///
    /// Malformed observations are logged and dropped.
    pub fn prepare_all(&self, raw: &[RawObservation]) -> BaselineResult<Vec<IndexObservation>> {
        let selected: Vec<&RawObservation> = raw.iter().filter(|r| self.filter.accepts(&r.metadata)).collect();
        log::info!("Scene filter kept {} of {} observations", selected.len(), raw.len());

        #[cfg(feature = "parallel")]
        let outcomes: Vec<BaselineResult<IndexObservation>> = selected.par_iter().map(|r| self.prepare(r)).collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<BaselineResult<IndexObservation>> = selected.iter().map(|r| self.prepare(r)).collect();

        let mut prepared = Vec::with_capacity(outcomes.len());
        for (raw, outcome) in selected.iter().zip(outcomes) {
            match outcome {
                Ok(obs) => prepared.push(obs),
                Err(e @ BaselineError::InvalidConfiguration(_)) => return Err(e),
                Err(e) => log::warn!("Dropping {}: {}", raw.metadata.product_id, e),
            }
        }
        Ok(prepared)
    }

    /// Fit every processing unit
    pub fn fit_units(&self, units: &[ProcessingUnit]) -> BaselineResult<Vec<RegressionResult>> {
        #[cfg(feature = "parallel")]
        let results: Vec<BaselineResult<RegressionResult>> = units.par_iter().map(|u| self.regressor.fit_unit(u)).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<BaselineResult<RegressionResult>> = units.iter().map(|u| self.regressor.fit_unit(u)).collect();

        results.into_iter().collect()
    }

    /// Produce one baseline raster per path intersecting `roi`
    pub fn run(&self, raw: &[RawObservation], roi: &BoundingBox) -> BaselineResult<Vec<BaselineRaster>> {
        let prepared = self.prepare_all(raw)?;

        let units = group_observations(prepared, &self.table, roi);
        if units.is_empty() {
            log::warn!("No spatial unit intersects the region of interest");
            return Ok(Vec::new());
        }

        let results = self.fit_units(&units)?;
        let groups = group_by_path(results);
        let tags = self.tags();

        #[cfg(feature = "parallel")]
        let outcomes: Vec<(u16, BaselineResult<BaselineRaster>)> = groups
            .par_iter()
            .map(|g| (g.path, self.compositor.composite(g, roi, &tags)))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<(u16, BaselineResult<BaselineRaster>)> = groups
            .iter()
            .map(|g| (g.path, self.compositor.composite(g, roi, &tags)))
            .collect();

        let mut rasters = Vec::with_capacity(outcomes.len());
        for (path, outcome) in outcomes {
            match outcome {
                Ok(raster) => rasters.push(raster),
                Err(e @ BaselineError::InvalidConfiguration(_)) => return Err(e),
                Err(e) => log::warn!("Skipping path {:03}: {}", path, e),
            }
        }

        log::info!("✅ Produced {} baseline rasters", rasters.len());
        Ok(rasters)
    }
}
