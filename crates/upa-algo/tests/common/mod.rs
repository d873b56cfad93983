//! Shared mock fixtures: a 4×4 grid of 100 m cells over the Newport
//! office, an urban centre covering the centre four cells, and a travel
//! time matrix where the travel time equals the id difference.
//!
//! Populations are chosen so that, at travel_time_threshold = 3 and
//! distance_threshold = 0.11 km, each urban-centre destination's accessible
//! population is the current cell plus its left/right neighbours, and the
//! proximity population additionally includes the cells above and below.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use geo::polygon;
use polars::prelude::*;

use upa_core::{transform_point, CentroidTable, Crs, GridTransform, PopulationTable};

pub const POPULATIONS: [i64; 16] = [5, 7, 7, 3, 15, 9, 8, 9, 4, 7, 9, 4, 6, 10, 13, 2];
pub const UC_IDS: [i64; 4] = [5, 6, 9, 10];

pub fn grid_transform() -> GridTransform {
    GridTransform::new(-225_800.0, 6_036_800.0, 100.0, -100.0)
}

/// Centre four cells of the 4×4 grid, in ESRI:54009.
pub fn urban_centre_polygon() -> geo::Polygon<f64> {
    polygon![
        (x: -225_700.0, y: 6_036_700.0),
        (x: -225_500.0, y: 6_036_700.0),
        (x: -225_500.0, y: 6_036_500.0),
        (x: -225_700.0, y: 6_036_500.0),
    ]
}

pub fn mock_population() -> PopulationTable {
    let transform = grid_transform();
    let ids: Vec<i64> = (0..16).collect();
    let within: Vec<bool> = ids.iter().map(|id| UC_IDS.contains(id)).collect();
    let geometry: Vec<geo::Polygon<f64>> = (0..4)
        .flat_map(|r| (0..4).map(move |c| (r, c)))
        .map(|(r, c)| transform.cell_polygon(r, c))
        .collect();
    let df = DataFrame::new(vec![
        Series::new("id", ids),
        Series::new("population", POPULATIONS.iter().map(|&p| p as f64).collect::<Vec<f64>>()),
        Series::new("within_urban_centre", within),
    ])
    .unwrap();
    PopulationTable {
        df,
        geometry,
        var_name: "population".to_string(),
        crs: Crs::mollweide(),
    }
}

pub fn mock_centroids() -> CentroidTable {
    let transform = grid_transform();
    let mut lons = Vec::new();
    let mut lats = Vec::new();
    for r in 0..4 {
        for c in 0..4 {
            let (x0, y0) = transform.xy(r, c);
            let (lon, lat) = transform_point(
                &Crs::mollweide(),
                &Crs::wgs84(),
                x0 + 50.0,
                y0 - 50.0,
            )
            .unwrap();
            lons.push(lon);
            lats.push(lat);
        }
    }
    let ids: Vec<i64> = (0..16).collect();
    let within: Vec<bool> = ids.iter().map(|id| UC_IDS.contains(id)).collect();
    let df = DataFrame::new(vec![
        Series::new("id", ids),
        Series::new("centroid_x", lons.clone()),
        Series::new("centroid_y", lats.clone()),
        Series::new("within_urban_centre", within),
    ])
    .unwrap();
    CentroidTable {
        df,
        points: lons
            .into_iter()
            .zip(lats)
            .map(|(lon, lat)| geo::Point::new(lon, lat))
            .collect(),
        crs: Crs::wgs84(),
    }
}

/// Travel-time rows: every cell to every urban-centre destination, with
/// `travel_time = |from_id - to_id|`.
pub fn mock_travel_times() -> DataFrame {
    let mut from = Vec::new();
    let mut to = Vec::new();
    let mut tt = Vec::new();
    for &uc_id in &UC_IDS {
        for id in 0..16i64 {
            from.push(id);
            to.push(uc_id);
            tt.push(Some((id - uc_id).unsigned_abs() as i32));
        }
    }
    DataFrame::new(vec![
        Series::new("from_id", from),
        Series::new("to_id", to),
        Series::new("travel_time", tt),
    ])
    .unwrap()
}

pub fn write_parquet(df: &mut DataFrame, path: &Path) {
    let mut file = std::fs::File::create(path).unwrap();
    ParquetWriter::new(&mut file).finish(df).unwrap();
}

/// Single-file travel-time fixture.
pub fn travel_times_file(dir: &Path) -> PathBuf {
    let path = dir.join("mock_tt.parquet");
    write_parquet(&mut mock_travel_times(), &path);
    path
}

/// The same travel times split into one file per destination id.
pub fn travel_times_sharded(dir: &Path) -> PathBuf {
    let shard_dir = dir.join("mock_multi_tt");
    std::fs::create_dir_all(&shard_dir).unwrap();
    let tt = mock_travel_times();
    for &uc_id in &UC_IDS {
        let mut shard = tt
            .clone()
            .lazy()
            .filter(col("to_id").eq(lit(uc_id)))
            .collect()
            .unwrap();
        write_parquet(&mut shard, &shard_dir.join(format!("mock_tt_id{uc_id}.parquet")));
    }
    shard_dir
}
