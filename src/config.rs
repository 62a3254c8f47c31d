use crate::core::spectral_index::SpectralIndex;
use crate::types::{year_start, BaselineError, BaselineResult, SceneMetadata, Spacecraft};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Named harmonic frequency sets (cycles per year)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HarmonicPreset {
    /// Annual cycle only
    Annual,
    /// Annual + 4-month cycles, F = {1, 3}
    AnnualFourMonth,
    /// Annual + 6-month cycles, F = {1, 2}
    AnnualSixMonth,
    /// Explicit frequency set
    Custom(Vec<f64>),
}

impl HarmonicPreset {
    pub fn frequencies(&self) -> Vec<f64> {
        match self {
            HarmonicPreset::Annual => vec![1.0],
            HarmonicPreset::AnnualFourMonth => vec![1.0, 3.0],
            HarmonicPreset::AnnualSixMonth => vec![1.0, 2.0],
            HarmonicPreset::Custom(f) => f.clone(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            HarmonicPreset::Annual => "annual".to_string(),
            HarmonicPreset::AnnualFourMonth => "annual+4mo".to_string(),
            HarmonicPreset::AnnualSixMonth => "annual+6mo".to_string(),
            HarmonicPreset::Custom(f) => {
                let parts: Vec<String> = f.iter().map(|v| format!("{}", v)).collect();
                format!("custom[{}]", parts.join(","))
            }
        }
    }
}

impl FromStr for HarmonicPreset {
    type Err = BaselineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "annual" => Ok(HarmonicPreset::Annual),
            "annual+4mo" => Ok(HarmonicPreset::AnnualFourMonth),
            "annual+6mo" => Ok(HarmonicPreset::AnnualSixMonth),
            other => Err(BaselineError::InvalidConfiguration(format!(
                "Unknown harmonic preset: {}",
                other
            ))),
        }
    }
}

/// Which sensors contribute observations over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorPolicy {
    /// Every sensor at every date
    AllSensors,
    /// Landsat 4/5 before Nov 2011, Landsat 7 only between Nov 2011 and Apr 2013,
    /// Landsat 8/9 from Apr 2013
    GapFill,
}

/// Cutover after which TM is no longer used under the gap-fill policy
pub fn tm_cutover() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2011, 11, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Cutover from which OLI replaces ETM+ under the gap-fill policy
pub fn oli_cutover() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2013, 4, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl SensorPolicy {
    pub fn admits(&self, spacecraft: Spacecraft, acquired: &DateTime<Utc>) -> bool {
        match self {
            SensorPolicy::AllSensors => true,
            SensorPolicy::GapFill => match spacecraft {
                Spacecraft::Landsat4 | Spacecraft::Landsat5 => *acquired < tm_cutover(),
                Spacecraft::Landsat7 => *acquired >= tm_cutover() && *acquired < oli_cutover(),
                Spacecraft::Landsat8 | Spacecraft::Landsat9 => *acquired >= oli_cutover(),
            },
        }
    }
}

/// Run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Dependent spectral index
    pub index: SpectralIndex,
    /// Harmonic frequency set
    pub harmonics: HarmonicPreset,
    /// First calendar year (inclusive)
    pub start_year: i32,
    /// Last calendar year (inclusive)
    pub end_year: i32,
    pub sensor_policy: SensorPolicy,
    /// Maximum scene-level cloud cover percentage
    pub max_cloud_cover: f32,
    /// Minimum cloud score (1 = clear) for a pixel to be kept
    pub cloud_score_threshold: f32,
    /// Multiplier applied before integer truncation of the baseline
    pub rescale_multiplier: i32,
    /// Rows per parallel tile
    pub tile_rows: usize,
    /// Product version tag
    pub version: String,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            index: SpectralIndex::NDVI,
            harmonics: HarmonicPreset::AnnualFourMonth,
            start_year: 2013,
            end_year: 2018,
            sensor_policy: SensorPolicy::AllSensors,
            max_cloud_cover: 70.0,
            cloud_score_threshold: 0.8,
            rescale_multiplier: 10000,
            tile_rows: 64,
            version: "v1".to_string(),
        }
    }
}

impl BaselineConfig {
    /// Check the configuration; any failure here aborts the run
    pub fn validate(&self) -> BaselineResult<()> {
        let frequencies = self.harmonics.frequencies();
        if frequencies.is_empty() {
            return Err(BaselineError::InvalidConfiguration(
                "Harmonic frequency set is empty".to_string(),
            ));
        }
        if let Some(bad) = frequencies.iter().find(|f| !f.is_finite() || **f <= 0.0) {
            return Err(BaselineError::InvalidConfiguration(format!(
                "Harmonic frequency must be positive and finite, got {}",
                bad
            )));
        }
        let mut sorted = frequencies.clone();
        sorted.sort_by(f64::total_cmp);
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(BaselineError::InvalidConfiguration(format!(
                "Duplicate harmonic frequency in {:?}",
                frequencies
            )));
        }
        if self.end_year < self.start_year {
            return Err(BaselineError::InvalidConfiguration(format!(
                "Year range {}-{} is empty",
                self.start_year, self.end_year
            )));
        }
        if !(0.0..=100.0).contains(&self.max_cloud_cover) {
            return Err(BaselineError::InvalidConfiguration(format!(
                "Cloud cover limit {} is not a percentage",
                self.max_cloud_cover
            )));
        }
        if !self.cloud_score_threshold.is_finite() {
            return Err(BaselineError::InvalidConfiguration(
                "Cloud score threshold must be finite".to_string(),
            ));
        }
        if self.rescale_multiplier <= 0 {
            return Err(BaselineError::InvalidConfiguration(format!(
                "Rescale multiplier must be positive, got {}",
                self.rescale_multiplier
            )));
        }
        if self.tile_rows == 0 {
            return Err(BaselineError::InvalidConfiguration(
                "Tile height must be at least one row".to_string(),
            ));
        }
        Ok(())
    }

    /// Start of the first year
    pub fn time_start(&self) -> BaselineResult<DateTime<Utc>> {
        year_start(self.start_year)
    }

    /// Start of the year after the last year (exclusive bound)
    pub fn time_end_exclusive(&self) -> BaselineResult<DateTime<Utc>> {
        year_start(self.end_year + 1)
    }

    pub fn scene_filter(&self) -> BaselineResult<SceneFilter> {
        Ok(SceneFilter {
            start: self.time_start()?,
            end: self.time_end_exclusive()?,
            max_cloud_cover: self.max_cloud_cover,
            sensor_policy: self.sensor_policy,
        })
    }
}

/// Scene-level selection applied before any per-pixel work
#[derive(Debug, Clone)]
pub struct SceneFilter {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_cloud_cover: f32,
    pub sensor_policy: SensorPolicy,
}

impl SceneFilter {
    pub fn accepts(&self, metadata: &SceneMetadata) -> bool {
        metadata.acquired >= self.start
            && metadata.acquired < self.end
            && metadata.cloud_cover <= self.max_cloud_cover
            && self.sensor_policy.admits(metadata.spacecraft, &metadata.acquired)
    }
}
