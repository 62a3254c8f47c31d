use crate::types::{
    Band, BaselineError, BaselineResult, CanonicalBand, LinearScale, Mask, Observation,
    PhysicalScale, RawObservation, SensorGeneration,
};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Quality-flag decoding rule of one sensor generation
#[derive(Debug, Clone, Copy)]
pub enum QualityRule {
    /// Pixel is clear only if the quality value equals one of these codes
    ClearCodes(&'static [u16]),
    /// Pixel is rejected if any of these bits is set
    RejectBits(u16),
}

impl QualityRule {
    pub fn accepts(&self, qa: u16) -> bool {
        match self {
            QualityRule::ClearCodes(codes) => decode_clear_codes(qa, codes),
            QualityRule::RejectBits(bits) => decode_reject_bits(qa, *bits),
        }
    }
}

/// Legacy pixel_qa: clear land or clear water codes
fn decode_clear_codes(qa: u16, codes: &[u16]) -> bool {
    codes.contains(&qa)
}

/// Collection-2 QA_PIXEL bit field
fn decode_reject_bits(qa: u16, bits: u16) -> bool {
    qa & bits == 0
}

/// QA_PIXEL bit positions
pub const QA_DILATED_CLOUD: u16 = 1 << 1;
pub const QA_CIRRUS: u16 = 1 << 2;
pub const QA_CLOUD: u16 = 1 << 3;
pub const QA_CLOUD_SHADOW: u16 = 1 << 4;
pub const QA_SNOW: u16 = 1 << 5;

const C2_TM_ETM_REJECT: u16 = QA_DILATED_CLOUD | QA_CLOUD | QA_CLOUD_SHADOW | QA_SNOW;
const C2_OLI_REJECT: u16 = C2_TM_ETM_REJECT | QA_CIRRUS;

/// Legacy surface reflectance DN scale (applied at the index stage)
const LEGACY_REFLECTANCE: LinearScale = LinearScale::new(1.0e-4, 0.0);
/// Legacy brightness temperature, 0.1 K per DN
const LEGACY_TEMPERATURE: LinearScale = LinearScale::new(0.1, 0.0);
/// Collection-2 level-2 surface reflectance
const C2_REFLECTANCE: LinearScale = LinearScale::new(2.75e-5, -0.2);
/// Collection-2 level-2 surface temperature (Kelvin)
const C2_TEMPERATURE: LinearScale = LinearScale::new(0.003_418_02, 149.0);

/// Raw band layout, decode rule and rescale of one sensor generation
#[derive(Debug, Clone, Copy)]
pub struct GenerationProfile {
    pub generation: SensorGeneration,
    /// Raw names for blue, green, red, nir, swir1, swir2
    pub reflective: [&'static str; 6],
    pub thermal: &'static str,
    pub quality: &'static str,
    pub rule: QualityRule,
    /// Open DN interval reflective bands must fall in
    pub dn_range: Option<(f32, f32)>,
    pub scale: PhysicalScale,
    /// Rescale during harmonization instead of deferring to the index stage
    pub rescale_on_harmonize: bool,
}

const LEGACY_TM_ETM: GenerationProfile = GenerationProfile {
    generation: SensorGeneration::LegacyTmEtm,
    reflective: ["B1", "B2", "B3", "B4", "B5", "B7"],
    thermal: "B6",
    quality: "pixel_qa",
    rule: QualityRule::ClearCodes(&[66, 68]),
    dn_range: Some((0.0, 10000.0)),
    scale: PhysicalScale { reflectance: LEGACY_REFLECTANCE, temperature: LEGACY_TEMPERATURE },
    rescale_on_harmonize: false,
};

const LEGACY_OLI: GenerationProfile = GenerationProfile {
    generation: SensorGeneration::LegacyOli,
    reflective: ["B2", "B3", "B4", "B5", "B6", "B7"],
    thermal: "B10",
    quality: "pixel_qa",
    rule: QualityRule::ClearCodes(&[322, 324]),
    dn_range: Some((0.0, 10000.0)),
    scale: PhysicalScale { reflectance: LEGACY_REFLECTANCE, temperature: LEGACY_TEMPERATURE },
    rescale_on_harmonize: false,
};

const C2_TM_ETM: GenerationProfile = GenerationProfile {
    generation: SensorGeneration::Collection2TmEtm,
    reflective: ["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B7"],
    thermal: "ST_B6",
    quality: "QA_PIXEL",
    rule: QualityRule::RejectBits(C2_TM_ETM_REJECT),
    dn_range: None,
    scale: PhysicalScale { reflectance: C2_REFLECTANCE, temperature: C2_TEMPERATURE },
    rescale_on_harmonize: true,
};

const C2_OLI: GenerationProfile = GenerationProfile {
    generation: SensorGeneration::Collection2Oli,
    reflective: ["SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7"],
    thermal: "ST_B10",
    quality: "QA_PIXEL",
    rule: QualityRule::RejectBits(C2_OLI_REJECT),
    dn_range: None,
    scale: PhysicalScale { reflectance: C2_REFLECTANCE, temperature: C2_TEMPERATURE },
    rescale_on_harmonize: true,
};

impl SensorGeneration {
    /// Band layout and decode rule for this generation
    pub fn profile(&self) -> &'static GenerationProfile {
        match self {
            SensorGeneration::LegacyTmEtm => &LEGACY_TM_ETM,
            SensorGeneration::LegacyOli => &LEGACY_OLI,
            SensorGeneration::Collection2TmEtm => &C2_TM_ETM,
            SensorGeneration::Collection2Oli => &C2_OLI,
        }
    }
}

/// Maps raw sensor layouts onto the canonical band set
#[derive(Debug, Clone, Default)]
pub struct BandHarmonizer;

impl BandHarmonizer {
    pub fn new() -> Self {
        Self
    }

    /// Harmonize one raw observation.
    ///
    /// Pixels failing the quality decode, presence or DN range checks are masked;
    /// only a structurally malformed observation (missing band, wrong shape) errors.
    pub fn harmonize(&self, raw: &RawObservation) -> BaselineResult<Observation> {
        let profile = raw.metadata.generation().profile();
        let shape = raw.grid.shape();
        log::debug!(
            "Harmonizing {} as {} ({}x{})",
            raw.metadata.product_id, profile.generation, shape.0, shape.1
        );

        let reflective = profile
            .reflective
            .iter()
            .map(|name| raw_band(raw, name, shape))
            .collect::<BaselineResult<Vec<&Band>>>()?;
        let quality = raw_band(raw, profile.quality, shape)?;
        // Thermal is optional on the canonical side
        let thermal = match raw.bands.get(profile.thermal) {
            Some(_) => Some(raw_band(raw, profile.thermal, shape)?),
            None => {
                log::debug!("No thermal band {} in {}", profile.thermal, raw.metadata.product_id);
                None
            }
        };

        let valid: Mask = Array2::from_shape_fn(shape, |idx| {
            let qa = quality[idx];
            if !qa.is_finite() || qa < 0.0 || qa > u16::MAX as f32 {
                return false;
            }
            if !profile.rule.accepts(qa as u16) {
                return false;
            }
            if let Some(t) = thermal {
                if !t[idx].is_finite() {
                    return false;
                }
            }
            reflective.iter().all(|band| {
                let v = band[idx];
                match profile.dn_range {
                    Some((lo, hi)) => v.is_finite() && v > lo && v < hi,
                    None => v.is_finite(),
                }
            })
        });

        let mut bands = BTreeMap::new();
        for (canonical, band) in CanonicalBand::REFLECTIVE.iter().zip(reflective.iter()) {
            bands.insert(*canonical, rescale(band, profile.scale.reflectance, profile.rescale_on_harmonize));
        }
        if let Some(t) = thermal {
            bands.insert(
                CanonicalBand::Temperature,
                rescale(t, profile.scale.temperature, profile.rescale_on_harmonize),
            );
        }

        let scale = if profile.rescale_on_harmonize {
            PhysicalScale::IDENTITY
        } else {
            profile.scale
        };

        let observation = Observation {
            metadata: raw.metadata.clone(),
            grid: raw.grid,
            bands,
            valid,
            scale,
            cloud_score: None,
        };

        log::debug!(
            "{}: {} of {} pixels pass quality screening",
            raw.metadata.product_id,
            observation.valid_pixels(),
            raw.grid.pixel_count()
        );

        Ok(observation)
    }
}

fn raw_band<'a>(raw: &'a RawObservation, name: &str, shape: (usize, usize)) -> BaselineResult<&'a Band> {
    let band = raw.bands.get(name).ok_or_else(|| {
        BaselineError::InvalidFormat(format!(
            "Band {} missing from {} product {}",
            name,
            raw.metadata.generation(),
            raw.metadata.product_id
        ))
    })?;
    if band.dim() != shape {
        return Err(BaselineError::Processing(format!(
            "Band {} of {} is {:?}, grid is {:?}",
            name,
            raw.metadata.product_id,
            band.dim(),
            shape
        )));
    }
    Ok(band)
}

fn rescale(band: &Band, scale: LinearScale, apply: bool) -> Band {
    if apply {
        band.mapv(|v| scale.apply(v))
    } else {
        band.clone()
    }
}
