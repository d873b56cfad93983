//! End-to-end pipeline runs through on-disk artifacts: raster file in,
//! urban centre out, population conditioning, OD batching against a mock
//! engine, and score aggregation, including the batched/all-origins
//! equivalence and persistence round trips.

mod common;

use geo::{Area, Contains, Coord, Rect};
use ndarray::array;
use polars::prelude::*;

use upa_algo::metrics::{transport_performance, PerformanceOptions};
use upa_algo::od::{
    run_od_matrix, OdBatchConfig, OdPoint, RoutingConfig, RoutingEngine, RoutingError,
    TransportMode, TravelTime,
};
use upa_algo::population::{condition_population, PopulationParams};
use upa_algo::urban_centre::{extract_urban_centre, UrbanCentreParams};
use upa_core::{Crs, GridTransform, RasterGrid, URBAN_CENTRE_LABELS};
use upa_io::{
    read_centroids, read_geotiff, read_population, read_urban_centre, write_centroids,
    write_geotiff, write_population, write_urban_centre, TravelTimeStore,
};

struct IdDifferenceEngine;

impl RoutingEngine for IdDifferenceEngine {
    fn travel_times(
        &self,
        origins: &[OdPoint],
        destinations: &[OdPoint],
        _config: &RoutingConfig,
    ) -> Result<Vec<TravelTime>, RoutingError> {
        let mut rows = Vec::new();
        for o in origins {
            for d in destinations {
                rows.push(TravelTime {
                    from_id: o.id,
                    to_id: d.id,
                    travel_time: Some((o.id - d.id).unsigned_abs() as i32),
                });
            }
        }
        Ok(rows)
    }
}

fn routing_config() -> RoutingConfig {
    RoutingConfig {
        departure: chrono::NaiveDate::from_ymd_opt(2023, 8, 8)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap(),
        departure_time_window: chrono::Duration::hours(1),
        max_trip_duration: chrono::Duration::minutes(45),
        modes: vec![TransportMode::Transit, TransportMode::Walk],
    }
}

/// The 7×10 dummy population raster with 1 km cells over Newport.
fn dummy_raster() -> RasterGrid {
    let data = array![
        [5000.0, 5000.0, 5000.0, 1500.0, 1500.0, 0.0, 0.0, 0.0, 5000.0, 5000.0],
        [5000.0, 5000.0, 5000.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [5000.0, 5000.0, 5000.0, 1500.0, 1500.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [1500.0, 1500.0, 1500.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 500.0, 500.0, 100.0, 0.0, 0.0, 0.0],
        [1000.0, 0.0, 0.0, 0.0, 100.0, 40.0, 5000.0, 0.0, 0.0, 0.0],
    ];
    RasterGrid::new(
        data,
        GridTransform::new(-243_000.0, 6_056_000.0, 1000.0, -1000.0),
        Crs::mollweide(),
        Some(-200.0),
    )
}

fn dummy_bbox() -> Rect<f64> {
    Rect::new(
        Coord { x: -243_000.0, y: 6_049_000.0 },
        Coord { x: -233_000.0, y: 6_056_000.0 },
    )
}

#[test]
fn urban_centre_extraction_from_a_raster_file() {
    let dir = tempfile::tempdir().unwrap();
    let raster_path = dir.path().join("input.tif");
    write_geotiff(&raster_path, &dummy_raster()).unwrap();

    let raster = read_geotiff(&raster_path).unwrap();
    let artifact = extract_urban_centre(
        &raster,
        &dummy_bbox(),
        &Crs::mollweide(),
        (51.74, -3.25),
        &Crs::wgs84(),
        &UrbanCentreParams::default(),
    )
    .unwrap();

    // the top-left block plus gap-filled cells: 18 km^2, nested outputs
    assert_eq!(artifact.vectorized_uc.unsigned_area(), 18.0 * 1_000_000.0);
    assert!(artifact.buffer.contains(&artifact.vectorized_uc));
    assert!(artifact.bbox.contains(&artifact.buffer));

    // labels come out in the fixed persistence order
    let labels: Vec<&str> = artifact.labelled().iter().map(|(l, _)| *l).collect();
    assert_eq!(labels, URBAN_CENTRE_LABELS.to_vec());

    // round trip through the artifact file preserves the geometries
    let uc_path = dir.path().join("urban_centre.parquet");
    write_urban_centre(&artifact, &uc_path).unwrap();
    let back = read_urban_centre(&uc_path).unwrap();
    assert_eq!(back.vectorized_uc, artifact.vectorized_uc);
    assert_eq!(back.buffer, artifact.buffer);
    assert_eq!(back.bbox, artifact.bbox);
    assert_eq!(back.crs, Crs::mollweide());
}

#[test]
fn population_tables_round_trip_through_parquet() {
    let (population, centroids) = mock_tables();

    let dir = tempfile::tempdir().unwrap();
    let pop_path = dir.path().join("population.parquet");
    let cent_path = dir.path().join("centroids.parquet");
    write_population(&population, &pop_path).unwrap();
    write_centroids(&centroids, &cent_path).unwrap();

    let pop_back = read_population(&pop_path).unwrap();
    let cent_back = read_centroids(&cent_path).unwrap();
    assert!(pop_back.df.frame_equal(&population.df));
    assert_eq!(pop_back.geometry, population.geometry);
    assert_eq!(pop_back.crs, population.crs);
    assert!(cent_back.df.frame_equal(&centroids.df));
    assert_eq!(cent_back.points, centroids.points);
}

fn mock_tables() -> (upa_core::PopulationTable, upa_core::CentroidTable) {
    (common::mock_population(), common::mock_centroids())
}

#[test]
fn batched_and_all_origins_scores_agree() {
    let (population, centroids) = mock_tables();
    let dir = tempfile::tempdir().unwrap();

    // per-origin batches with a wide distance cut (no pair filtered)
    let batched_dir = dir.path().join("batched");
    let mut batched_config = OdBatchConfig::new(&batched_dir);
    batched_config.distance_threshold_km = 1.0;
    let summary = run_od_matrix(
        &centroids,
        &IdDifferenceEngine,
        &routing_config(),
        &batched_config,
    )
    .unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.batches, 16);

    // one shot with every origin
    let all_dir = dir.path().join("all");
    let mut all_config = OdBatchConfig::new(&all_dir);
    all_config.num_origins = centroids.len();
    run_od_matrix(
        &centroids,
        &IdDifferenceEngine,
        &routing_config(),
        &all_config,
    )
    .unwrap();

    let options = PerformanceOptions {
        travel_time_threshold: 3,
        distance_threshold_km: 0.11,
        ..PerformanceOptions::default()
    };
    let batched_store = TravelTimeStore::open(&batched_dir).unwrap();
    let all_store = TravelTimeStore::open(&all_dir).unwrap();
    let from_batched =
        transport_performance(&batched_store, &centroids, &population, &options).unwrap();
    let from_all = transport_performance(&all_store, &centroids, &population, &options).unwrap();

    assert!(from_batched.df.frame_equal(&from_all.df));

    // and both match the analytic expectation for destination 5
    let acc = from_all
        .df
        .column("accessible_population")
        .unwrap()
        .f64()
        .unwrap()
        .get(0)
        .unwrap();
    assert_eq!(acc, 32.0);
}

#[test]
fn conditioned_population_feeds_the_aggregator() {
    // raster whose cells carry the mock populations
    let values: Vec<f64> = common::POPULATIONS.iter().map(|&p| p as f64).collect();
    let data = ndarray::Array2::from_shape_vec((4, 4), values).unwrap();
    let raster = RasterGrid::new(
        data,
        common::grid_transform(),
        Crs::mollweide(),
        Some(-200.0),
    );

    let aoi = geo::polygon![
        (x: -225_800.0, y: 6_036_800.0),
        (x: -225_400.0, y: 6_036_800.0),
        (x: -225_400.0, y: 6_036_400.0),
        (x: -225_800.0, y: 6_036_400.0),
    ];
    let (population, centroids) = condition_population(
        &raster,
        &aoi,
        Some(&common::urban_centre_polygon()),
        &PopulationParams::default(),
    )
    .unwrap();
    assert_eq!(population.len(), 16);
    let tagged: Vec<i64> = population
        .df
        .clone()
        .lazy()
        .filter(col("within_urban_centre"))
        .select([col("id")])
        .collect()
        .unwrap()
        .column("id")
        .unwrap()
        .i64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(tagged, common::UC_IDS.to_vec());

    let dir = tempfile::tempdir().unwrap();
    let store = TravelTimeStore::open(&common::travel_times_file(dir.path())).unwrap();
    let options = PerformanceOptions {
        travel_time_threshold: 3,
        distance_threshold_km: 0.11,
        ..PerformanceOptions::default()
    };
    let perf = transport_performance(&store, &centroids, &population, &options).unwrap();

    let acc: Vec<f64> = perf
        .df
        .column("accessible_population")
        .unwrap()
        .f64()
        .unwrap()
        .into_no_null_iter()
        .collect();
    assert_eq!(acc, vec![32.0, 26.0, 20.0, 20.0]);
}
