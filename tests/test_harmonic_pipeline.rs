use approx::assert_abs_diff_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::Array2;
use phenobase::core::decimal_years_since_epoch;
use phenobase::core::mosaic::NODATA;
use phenobase::{
    BaselineConfig, BaselinePipeline, BoundingBox, Collection, CoordinateSystem, GeoTransform,
    GridSpec, HarmonicPreset, PathRow, RawObservation, SceneMetadata, Spacecraft, SpatialUnit,
    SpatialUnitTable, SpectralIndex,
};
use std::collections::HashMap;
use std::f64::consts::PI;

const RED: f64 = 0.10;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn grid(top_left_y: f64) -> GridSpec {
    GridSpec::new(
        CoordinateSystem::Projected { epsg: 32610 },
        GeoTransform::north_up(0.0, top_left_y, 30.0),
        4,
        4,
    )
}

/// Seasonal NDVI with annual and 4-month cycles and no trend
fn seasonal_ndvi(mean: f64, t: f64) -> f64 {
    mean + 0.2 * (2.0 * PI * t).cos() + 0.05 * (2.0 * PI * 3.0 * t).sin()
}

/// Collection-2 OLI digital number for a surface reflectance
fn c2_dn(reflectance: f64) -> f32 {
    ((reflectance + 0.2) / 2.75e-5) as f32
}

fn c2_oli(path_row: PathRow, grid: GridSpec, acquired: DateTime<Utc>, ndvi: f64, cloudy: bool) -> RawObservation {
    let nir = RED * (1.0 + ndvi) / (1.0 - ndvi);
    let (blue, green, red, nir, swir1, swir2, kelvin) = if cloudy {
        (0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 270.0)
    } else {
        (0.03, 0.06, RED, nir, 0.18, 0.09, 300.0)
    };

    let shape = grid.shape();
    let mut bands = HashMap::new();
    for (name, value) in [
        ("SR_B2", blue),
        ("SR_B3", green),
        ("SR_B4", red),
        ("SR_B5", nir),
        ("SR_B6", swir1),
        ("SR_B7", swir2),
    ] {
        bands.insert(name.to_string(), Array2::from_elem(shape, c2_dn(value)));
    }
    bands.insert(
        "ST_B10".to_string(),
        Array2::from_elem(shape, ((kelvin - 149.0) / 0.003_418_02) as f32),
    );
    bands.insert("QA_PIXEL".to_string(), Array2::from_elem(shape, 21824.0f32));

    RawObservation {
        metadata: SceneMetadata {
            product_id: format!("LC08_{}_{}", path_row, acquired.format("%Y%m%d")),
            spacecraft: Spacecraft::Landsat8,
            collection: Collection::Collection2,
            acquired,
            path_row,
            cloud_cover: if cloudy { 60.0 } else { 5.0 },
        },
        grid,
        bands,
    }
}

fn acquisition(k: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 1, 3, 18, 30, 0).unwrap() + Duration::days(16 * k)
}

fn config() -> BaselineConfig {
    let mut config = BaselineConfig::default();
    config.index = SpectralIndex::NDVI;
    config.harmonics = HarmonicPreset::AnnualFourMonth;
    config.start_year = 2014;
    config.end_year = 2016;
    config.tile_rows = 2;
    config
}

#[test]
fn test_two_row_path_baseline() {
    init_logging();

    let north = PathRow::new(44, 33);
    let south = PathRow::new(44, 34);
    let table = SpatialUnitTable::new(vec![
        SpatialUnit::new("044033", north, grid(240.0)),
        SpatialUnit::new("044034", south, grid(180.0)),
    ])
    .unwrap();

    let mut raw = Vec::new();
    for k in 0..68 {
        let time = acquisition(k);
        let t = decimal_years_since_epoch(&time);
        // every tenth northern scene is cloudy
        raw.push(c2_oli(north, grid(240.0), time, seasonal_ndvi(0.5, t), k % 10 == 5));
        if k % 2 == 0 {
            raw.push(c2_oli(south, grid(180.0), time, seasonal_ndvi(0.3, t), false));
        }
    }
    // outside the year range and outside the unit table
    raw.push(c2_oli(north, grid(240.0), Utc.with_ymd_and_hms(2013, 7, 1, 18, 0, 0).unwrap(), 0.9, false));
    raw.push(c2_oli(PathRow::new(45, 33), grid(240.0), acquisition(3), 0.9, false));

    let pipeline = BaselinePipeline::new(config(), table).unwrap();
    let roi = BoundingBox::new(0.0, 60.0, 120.0, 240.0);
    let rasters = pipeline.run(&raw, &roi).unwrap();

    assert_eq!(rasters.len(), 1);
    let baseline = &rasters[0];
    println!("Baseline {}: {:?}", baseline.metadata.asset_name(), baseline.grid.shape());

    assert_eq!(baseline.metadata.path, 44);
    assert_eq!(baseline.metadata.rows, vec![33, 34]);
    assert_eq!(baseline.metadata.tags.index_name, "ndvi");
    assert_eq!(baseline.metadata.tags.harmonics, "annual+4mo");
    assert_eq!(baseline.metadata.rescale_multiplier, 10000);
    assert_eq!(
        baseline.band_names,
        vec!["constant", "t", "cos_1", "cos_3", "sin_1", "sin_3", "rmse", "nobs"]
    );
    assert_eq!(baseline.grid.shape(), (6, 4));
    assert_eq!(baseline.valid_pixels(), 24);

    // rows 0-3 come from the northern unit (61 clear scenes beat 34)
    for row in 0..4 {
        assert_abs_diff_eq!(baseline.value_at("nobs", row, 0).unwrap(), 61.0);
        assert_abs_diff_eq!(baseline.value_at("constant", row, 1).unwrap(), 0.5, epsilon = 2e-3);
    }
    // rows 4-5 are only covered by the southern unit
    for row in 4..6 {
        assert_abs_diff_eq!(baseline.value_at("nobs", row, 2).unwrap(), 34.0);
        assert_abs_diff_eq!(baseline.value_at("constant", row, 3).unwrap(), 0.3, epsilon = 2e-3);
    }

    for row in 0..6 {
        assert_abs_diff_eq!(baseline.value_at("t", row, 0).unwrap(), 0.0, epsilon = 2e-3);
        assert_abs_diff_eq!(baseline.value_at("cos_1", row, 0).unwrap(), 0.2, epsilon = 2e-3);
        assert_abs_diff_eq!(baseline.value_at("cos_3", row, 0).unwrap(), 0.0, epsilon = 2e-3);
        assert_abs_diff_eq!(baseline.value_at("sin_1", row, 0).unwrap(), 0.0, epsilon = 2e-3);
        assert_abs_diff_eq!(baseline.value_at("sin_3", row, 0).unwrap(), 0.05, epsilon = 2e-3);
        assert!(baseline.value_at("rmse", row, 0).unwrap() < 1e-3);
    }
}

#[test]
fn test_roi_clips_baseline() {
    init_logging();

    let unit = PathRow::new(44, 34);
    let table = SpatialUnitTable::new(vec![SpatialUnit::new("044034", unit, grid(180.0))]).unwrap();
    let raw: Vec<RawObservation> = (0..40)
        .map(|k| {
            let time = acquisition(k);
            c2_oli(unit, grid(180.0), time, seasonal_ndvi(0.4, decimal_years_since_epoch(&time)), false)
        })
        .collect();

    let pipeline = BaselinePipeline::new(config(), table).unwrap();
    // top-left 2x2 pixels
    let roi = BoundingBox::new(1.0, 121.0, 59.0, 179.0);
    let rasters = pipeline.run(&raw, &roi).unwrap();

    assert_eq!(rasters.len(), 1);
    assert_eq!(rasters[0].grid.shape(), (2, 2));
    assert_eq!(rasters[0].grid.transform.top_left_y, 180.0);
    assert_eq!(rasters[0].valid_pixels(), 4);
}

#[test]
fn test_unit_without_observations_is_unresolved() {
    init_logging();

    let unit = PathRow::new(44, 34);
    let table = SpatialUnitTable::new(vec![SpatialUnit::new("044034", unit, grid(180.0))]).unwrap();
    // only scenes from a different path
    let raw: Vec<RawObservation> = (0..10)
        .map(|k| c2_oli(PathRow::new(45, 34), grid(180.0), acquisition(k), 0.5, false))
        .collect();

    let pipeline = BaselinePipeline::new(config(), table).unwrap();
    let rasters = pipeline.run(&raw, &BoundingBox::new(0.0, 60.0, 120.0, 180.0)).unwrap();

    assert_eq!(rasters.len(), 1);
    assert_eq!(rasters[0].valid_pixels(), 0);
    assert!(rasters[0].data.iter().all(|&v| v == NODATA));
}

#[test]
fn test_too_few_scenes_leave_pixels_unresolved() {
    init_logging();

    let unit = PathRow::new(44, 34);
    let table = SpatialUnitTable::new(vec![SpatialUnit::new("044034", unit, grid(180.0))]).unwrap();
    // five clear scenes for six parameters
    let raw: Vec<RawObservation> = (0..5)
        .map(|k| c2_oli(unit, grid(180.0), acquisition(k * 5), 0.5, false))
        .collect();

    let pipeline = BaselinePipeline::new(config(), table).unwrap();
    let units = phenobase::core::group_observations(
        pipeline.prepare_all(&raw).unwrap(),
        &SpatialUnitTable::new(vec![SpatialUnit::new("044034", unit, grid(180.0))]).unwrap(),
        &BoundingBox::new(0.0, 60.0, 120.0, 180.0),
    );
    let results = pipeline.fit_units(&units).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].resolved_pixels(), 0);
    assert!(results[0].nobs.iter().all(|&n| n == 5));
    assert!(results[0].to_stack().iter().all(|v| v.is_nan()));
}
