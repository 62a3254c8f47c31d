use chrono::{DateTime, TimeZone, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Single-band raster values (row x col)
pub type Band = Array2<f32>;

/// Per-pixel validity mask (true = usable)
pub type Mask = Array2<bool>;

/// Multi-band raster (band x row x col)
pub type BandStack = Array3<f32>;

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (latitude, longitude)
    Geographic,
    /// Projected coordinates (e.g., UTM)
    Projected { epsg: u32 },
}

/// WRS-2 path/row identity of a Landsat scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathRow {
    pub path: u16,
    pub row: u16,
}

impl PathRow {
    pub fn new(path: u16, row: u16) -> Self {
        Self { path, row }
    }
}

impl std::fmt::Display for PathRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}{:03}", self.path, self.row)
    }
}

/// Landsat spacecraft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Spacecraft {
    Landsat4,
    Landsat5,
    Landsat7,
    Landsat8,
    Landsat9,
}

impl Spacecraft {
    /// Map the two-digit mission number used in product identifiers
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            4 => Some(Spacecraft::Landsat4),
            5 => Some(Spacecraft::Landsat5),
            7 => Some(Spacecraft::Landsat7),
            8 => Some(Spacecraft::Landsat8),
            9 => Some(Spacecraft::Landsat9),
            _ => None,
        }
    }

    /// True for the OLI/TIRS instrument generation (Landsat 8 and later)
    pub fn is_oli(&self) -> bool {
        matches!(self, Spacecraft::Landsat8 | Spacecraft::Landsat9)
    }
}

impl std::fmt::Display for Spacecraft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Spacecraft::Landsat4 => write!(f, "LANDSAT_4"),
            Spacecraft::Landsat5 => write!(f, "LANDSAT_5"),
            Spacecraft::Landsat7 => write!(f, "LANDSAT_7"),
            Spacecraft::Landsat8 => write!(f, "LANDSAT_8"),
            Spacecraft::Landsat9 => write!(f, "LANDSAT_9"),
        }
    }
}

/// Processing collection the raw product was delivered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// Pre-collection-2 surface reflectance (pixel_qa codes, DN x 1e-4)
    Legacy,
    /// Collection-2 level-2 surface reflectance (QA_PIXEL bit field)
    Collection2,
}

/// Sensor generation, the closed set of raw band layouts the harmonizer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorGeneration {
    LegacyTmEtm,
    LegacyOli,
    Collection2TmEtm,
    Collection2Oli,
}

impl SensorGeneration {
    pub fn new(spacecraft: Spacecraft, collection: Collection) -> Self {
        match (collection, spacecraft.is_oli()) {
            (Collection::Legacy, false) => SensorGeneration::LegacyTmEtm,
            (Collection::Legacy, true) => SensorGeneration::LegacyOli,
            (Collection::Collection2, false) => SensorGeneration::Collection2TmEtm,
            (Collection::Collection2, true) => SensorGeneration::Collection2Oli,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, SensorGeneration::LegacyTmEtm | SensorGeneration::LegacyOli)
    }
}

impl std::fmt::Display for SensorGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorGeneration::LegacyTmEtm => write!(f, "legacy-TM/ETM+"),
            SensorGeneration::LegacyOli => write!(f, "legacy-OLI"),
            SensorGeneration::Collection2TmEtm => write!(f, "collection-2-TM/ETM+"),
            SensorGeneration::Collection2Oli => write!(f, "collection-2-OLI"),
        }
    }
}

/// Canonical band names shared by every sensor generation after harmonization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalBand {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
    Temperature,
}

impl CanonicalBand {
    /// Reflective bands in canonical order
    pub const REFLECTIVE: [CanonicalBand; 6] = [
        CanonicalBand::Blue,
        CanonicalBand::Green,
        CanonicalBand::Red,
        CanonicalBand::Nir,
        CanonicalBand::Swir1,
        CanonicalBand::Swir2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CanonicalBand::Blue => "blue",
            CanonicalBand::Green => "green",
            CanonicalBand::Red => "red",
            CanonicalBand::Nir => "nir",
            CanonicalBand::Swir1 => "swir1",
            CanonicalBand::Swir2 => "swir2",
            CanonicalBand::Temperature => "temperature",
        }
    }
}

impl std::fmt::Display for CanonicalBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Axis-aligned extent in the grid's coordinate system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, max_x, min_y, max_y }
    }

    /// Open-interior intersection test; boxes that only share an edge do not intersect
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            max_x: self.max_x.min(other.max_x),
            min_y: self.min_y.max(other.min_y),
            max_y: self.max_y.min(other.max_y),
        })
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }
}

/// Pixel grid of a raster in its native coordinate reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub crs: CoordinateSystem,
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

const GRID_EPSILON: f64 = 1e-6;

impl GridSpec {
    pub fn new(crs: CoordinateSystem, transform: GeoTransform, rows: usize, cols: usize) -> Self {
        Self { crs, transform, rows, cols }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Map extent covered by the grid
    pub fn extent(&self) -> BoundingBox {
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Same coordinate reference, pixel size and rotation
    pub fn is_compatible_with(&self, other: &GridSpec) -> bool {
        let a = &self.transform;
        let b = &other.transform;
        self.crs == other.crs
            && (a.pixel_width - b.pixel_width).abs() < GRID_EPSILON
            && (a.pixel_height - b.pixel_height).abs() < GRID_EPSILON
            && a.rotation_x.abs() < GRID_EPSILON
            && a.rotation_y.abs() < GRID_EPSILON
            && b.rotation_x.abs() < GRID_EPSILON
            && b.rotation_y.abs() < GRID_EPSILON
    }

    /// Identical grid: compatible, same origin and same shape
    pub fn same_grid(&self, other: &GridSpec) -> bool {
        self.is_compatible_with(other)
            && self.shape() == other.shape()
            && (self.transform.top_left_x - other.transform.top_left_x).abs() < GRID_EPSILON
            && (self.transform.top_left_y - other.transform.top_left_y).abs() < GRID_EPSILON
    }

    /// Whole-pixel offset (rows, cols) of `other`'s origin relative to this grid's origin.
    ///
    /// Returns `None` when the grids are incompatible or their origins are not
    /// separated by a whole number of pixels.
    pub fn pixel_offset_of(&self, other: &GridSpec) -> Option<(isize, isize)> {
        if !self.is_compatible_with(other) {
            return None;
        }
        let t = &self.transform;
        let col = (other.transform.top_left_x - t.top_left_x) / t.pixel_width;
        let row = (other.transform.top_left_y - t.top_left_y) / t.pixel_height;
        let (col_r, row_r) = (col.round(), row.round());
        if (col - col_r).abs() > GRID_EPSILON || (row - row_r).abs() > GRID_EPSILON {
            return None;
        }
        Some((row_r as isize, col_r as isize))
    }

    /// Grid covering `rows` x `cols` pixels starting at a (possibly negative) pixel offset
    pub fn shifted(&self, row_offset: isize, col_offset: isize, rows: usize, cols: usize) -> GridSpec {
        let t = &self.transform;
        GridSpec {
            crs: self.crs,
            transform: GeoTransform {
                top_left_x: t.top_left_x + col_offset as f64 * t.pixel_width,
                top_left_y: t.top_left_y + row_offset as f64 * t.pixel_height,
                ..*t
            },
            rows,
            cols,
        }
    }

    /// Pixel window `(row_start, row_end, col_start, col_end)` covering the part of
    /// `bbox` that falls on this grid, or `None` if they do not overlap.
    pub fn window(&self, bbox: &BoundingBox) -> Option<(usize, usize, usize, usize)> {
        let clip = self.extent().intersection(bbox)?;
        let t = &self.transform;
        let to_col = |x: f64| (x - t.top_left_x) / t.pixel_width;
        let to_row = |y: f64| (y - t.top_left_y) / t.pixel_height;

        let (c0, c1) = (to_col(clip.min_x), to_col(clip.max_x));
        let (r0, r1) = (to_row(clip.min_y), to_row(clip.max_y));

        let col_start = c0.min(c1).floor().max(0.0) as usize;
        let col_end = (c0.max(c1).ceil() as usize).min(self.cols);
        let row_start = r0.min(r1).floor().max(0.0) as usize;
        let row_end = (r0.max(r1).ceil() as usize).min(self.rows);

        if row_start >= row_end || col_start >= col_end {
            return None;
        }
        Some((row_start, row_end, col_start, col_end))
    }
}

/// Acquisition metadata propagated unchanged through every per-observation stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub product_id: String,
    pub spacecraft: Spacecraft,
    pub collection: Collection,
    pub acquired: DateTime<Utc>,
    pub path_row: PathRow,
    /// Scene-level cloud cover percentage reported by the catalog
    pub cloud_cover: f32,
}

impl SceneMetadata {
    pub fn generation(&self) -> SensorGeneration {
        SensorGeneration::new(self.spacecraft, self.collection)
    }
}

/// Raw observation as delivered by the raster engine.
///
/// Bands are keyed by the sensor's own band names (including the quality band);
/// non-finite values mark nodata.
#[derive(Debug, Clone)]
pub struct RawObservation {
    pub metadata: SceneMetadata,
    pub grid: GridSpec,
    pub bands: HashMap<String, Band>,
}

/// Linear conversion from stored values to physical units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearScale {
    pub gain: f32,
    pub offset: f32,
}

impl LinearScale {
    pub const IDENTITY: LinearScale = LinearScale { gain: 1.0, offset: 0.0 };

    pub const fn new(gain: f32, offset: f32) -> Self {
        Self { gain, offset }
    }

    #[inline]
    pub fn apply(&self, value: f32) -> f32 {
        value * self.gain + self.offset
    }
}

/// Scales still to be applied to a canonical observation's stored band values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalScale {
    pub reflectance: LinearScale,
    pub temperature: LinearScale,
}

impl PhysicalScale {
    pub const IDENTITY: PhysicalScale = PhysicalScale {
        reflectance: LinearScale::IDENTITY,
        temperature: LinearScale::IDENTITY,
    };

    pub fn for_band(&self, band: CanonicalBand) -> LinearScale {
        match band {
            CanonicalBand::Temperature => self.temperature,
            _ => self.reflectance,
        }
    }
}

/// Observation harmonized onto the canonical band set
#[derive(Debug, Clone)]
pub struct Observation {
    pub metadata: SceneMetadata,
    pub grid: GridSpec,
    pub bands: BTreeMap<CanonicalBand, Band>,
    pub valid: Mask,
    /// Scale from stored values to physical reflectance / Kelvin
    pub scale: PhysicalScale,
    /// Inverted cloud likelihood (1 = clear), once screened
    pub cloud_score: Option<Band>,
}

impl Observation {
    pub fn band(&self, band: CanonicalBand) -> BaselineResult<&Band> {
        self.bands.get(&band).ok_or_else(|| {
            BaselineError::Processing(format!(
                "Band {} missing from observation {}",
                band, self.metadata.product_id
            ))
        })
    }

    /// Band converted to physical units
    pub fn physical_band(&self, band: CanonicalBand) -> BaselineResult<Band> {
        let scale = self.scale.for_band(band);
        Ok(self.band(band)?.mapv(|v| scale.apply(v)))
    }

    pub fn has_band(&self, band: CanonicalBand) -> bool {
        self.bands.contains_key(&band)
    }

    pub fn valid_pixels(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }
}

/// Error types for baseline processing
#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),
}

/// Result type for baseline operations
pub type BaselineResult<T> = Result<T, BaselineError>;

/// 00:00 UTC on 1 January of `year`
pub fn year_start(year: i32) -> BaselineResult<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| BaselineError::InvalidConfiguration(format!("Year {} is out of range", year)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utm_grid(x: f64, y: f64, rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            CoordinateSystem::Projected { epsg: 32610 },
            GeoTransform::north_up(x, y, 30.0),
            rows,
            cols,
        )
    }

    #[test]
    fn test_grid_extent_and_window() {
        let grid = utm_grid(1000.0, 2000.0, 10, 20);
        let extent = grid.extent();
        assert_eq!(extent, BoundingBox::new(1000.0, 1700.0, 1600.0, 2000.0));

        let roi = BoundingBox::new(1045.0, 1800.0, 1200.0, 5000.0);
        let (r0, r1, c0, c1) = grid.window(&roi).unwrap();
        assert_eq!((r0, r1), (0, 7));
        assert_eq!((c0, c1), (1, 7));

        let outside = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(grid.window(&outside).is_none());
    }

    #[test]
    fn test_pixel_offset() {
        let a = utm_grid(1000.0, 2000.0, 10, 10);
        let b = utm_grid(1060.0, 1910.0, 10, 10);
        assert_eq!(a.pixel_offset_of(&b), Some((3, 2)));

        let misaligned = utm_grid(1015.0, 2000.0, 10, 10);
        assert_eq!(a.pixel_offset_of(&misaligned), None);
    }

    #[test]
    fn test_sensor_generation_dispatch() {
        assert_eq!(
            SensorGeneration::new(Spacecraft::Landsat7, Collection::Legacy),
            SensorGeneration::LegacyTmEtm
        );
        assert_eq!(
            SensorGeneration::new(Spacecraft::Landsat9, Collection::Collection2),
            SensorGeneration::Collection2Oli
        );
        assert_eq!(PathRow::new(44, 34).to_string(), "044034");
    }

    #[test]
    fn test_year_start() {
        let start = year_start(2013).unwrap();
        assert_eq!(start.to_rfc3339(), "2013-01-01T00:00:00+00:00");
        assert!(matches!(year_start(i32::MAX), Err(BaselineError::InvalidConfiguration(_))));
    }
}
