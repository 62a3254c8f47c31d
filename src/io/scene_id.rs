//! Landsat product identifier parsing
//!
//! Three identifier shapes are recognised:
//! - collection product IDs, `LC08_L1TP_044034_20130411_20200912_02_T1`
//! - legacy surface reflectance asset IDs, `LT05_044034_20110612`
//! - pre-collection scene IDs, `LC80440342013101LGN01`

use crate::types::{BaselineError, BaselineResult, Collection, PathRow, SceneMetadata, Spacecraft};
use chrono::{NaiveDate, TimeZone, Utc};
use regex::Regex;
use std::str::FromStr;

const COLLECTION_PATTERN: &str =
    r"^L([COTEM])(\d{2})_([A-Z0-9]{4})_(\d{3})(\d{3})_(\d{8})_(\d{8})_(\d{2})_([A-Z0-9]{2})$";
const LEGACY_PATTERN: &str = r"^L([COTEM])(\d{2})_(\d{3})(\d{3})_(\d{8})$";
const SCENE_PATTERN: &str = r"^L([COTEM])(\d)(\d{3})(\d{3})(\d{4})(\d{3})([A-Z]{3})(\d{2})$";

/// Parsed identity of a Landsat product
#[derive(Debug, Clone, PartialEq)]
pub struct SceneId {
    pub product_id: String,
    pub spacecraft: Spacecraft,
    pub collection: Collection,
    pub path_row: PathRow,
    pub acquired: NaiveDate,
}

impl SceneId {
    pub fn parse(product_id: &str) -> BaselineResult<Self> {
        let id = product_id.trim();

        if let Some(caps) = compile(COLLECTION_PATTERN)?.captures(id) {
            // collection 1 surface reflectance still uses the pixel_qa layout
            let collection = match &caps[8] {
                "02" => Collection::Collection2,
                _ => Collection::Legacy,
            };
            return Ok(Self {
                product_id: id.to_string(),
                spacecraft: spacecraft(&caps[2], id)?,
                collection,
                path_row: path_row(&caps[4], &caps[5], id)?,
                acquired: date(&caps[6], id)?,
            });
        }

        if let Some(caps) = compile(LEGACY_PATTERN)?.captures(id) {
            return Ok(Self {
                product_id: id.to_string(),
                spacecraft: spacecraft(&caps[2], id)?,
                collection: Collection::Legacy,
                path_row: path_row(&caps[3], &caps[4], id)?,
                acquired: date(&caps[5], id)?,
            });
        }

        if let Some(caps) = compile(SCENE_PATTERN)?.captures(id) {
            let year: i32 = caps[5].parse().map_err(|_| invalid(id))?;
            let doy: u32 = caps[6].parse().map_err(|_| invalid(id))?;
            let acquired = NaiveDate::from_yo_opt(year, doy).ok_or_else(|| invalid(id))?;
            return Ok(Self {
                product_id: id.to_string(),
                spacecraft: spacecraft(&caps[2], id)?,
                collection: Collection::Legacy,
                path_row: path_row(&caps[3], &caps[4], id)?,
                acquired,
            });
        }

        Err(invalid(id))
    }

    /// Scene metadata stamped at midnight UTC of the acquisition date
    pub fn to_metadata(&self, cloud_cover: f32) -> BaselineResult<SceneMetadata> {
        let midnight = self
            .acquired
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| invalid(&self.product_id))?;
        Ok(SceneMetadata {
            product_id: self.product_id.clone(),
            spacecraft: self.spacecraft,
            collection: self.collection,
            acquired: Utc.from_utc_datetime(&midnight),
            path_row: self.path_row,
            cloud_cover,
        })
    }
}

impl FromStr for SceneId {
    type Err = BaselineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SceneId::parse(s)
    }
}

fn compile(pattern: &str) -> BaselineResult<Regex> {
    Regex::new(pattern).map_err(|e| BaselineError::Processing(format!("Invalid pattern {}: {}", pattern, e)))
}

fn invalid(id: &str) -> BaselineError {
    BaselineError::InvalidFormat(format!("Unrecognised Landsat product identifier: {}", id))
}

fn spacecraft(number: &str, id: &str) -> BaselineResult<Spacecraft> {
    let n: u8 = number.parse().map_err(|_| invalid(id))?;
    Spacecraft::from_number(n).ok_or_else(|| {
        BaselineError::InvalidFormat(format!("Unsupported Landsat mission {} in {}", n, id))
    })
}

fn path_row(path: &str, row: &str, id: &str) -> BaselineResult<PathRow> {
    Ok(PathRow::new(
        path.parse().map_err(|_| invalid(id))?,
        row.parse().map_err(|_| invalid(id))?,
    ))
}

fn date(yyyymmdd: &str, id: &str) -> BaselineResult<NaiveDate> {
    NaiveDate::parse_from_str(yyyymmdd, "%Y%m%d").map_err(|_| invalid(id))
}
