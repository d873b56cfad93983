//! Origin–destination batching against an external routing engine.
//!
//! The engine is an opaque collaborator behind [`RoutingEngine`]: it takes
//! labelled geographic points and a configuration bundle and returns
//! `(from_id, to_id, travel_time)` rows. This module owns everything around
//! that call: contiguous origin batches in ascending id order, the
//! haversine pre-filter on destinations, partitioned Parquet output keyed
//! by the minimum origin id, per-batch failure isolation, and a JSON run
//! manifest.
//!
//! The distance pre-filter trims the destination set before submission, but
//! the engine re-forms its own cartesian product internally, so the filter
//! is only exact for `num_origins = 1`. That caveat is part of the
//! contract; larger batches get a warning, not an error.

use std::fs;
use std::path::PathBuf;

use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use upa_core::error::{Error as UpaError, Result};
use upa_core::{haversine_km, CentroidRecord, CentroidTable};
use upa_io::store::{write_batch, BatchKey, DEFAULT_PARTITION_BYTES};

/// Transport modes the routing engine may combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransportMode {
    Transit,
    Walk,
    Bicycle,
    Car,
}

/// The configuration bundle handed to the routing engine with every batch.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Departure date and time, interpreted against the engine's timetable.
    pub departure: chrono::NaiveDateTime,
    /// Width of the departure window.
    pub departure_time_window: chrono::Duration,
    /// Trips longer than this are reported as unreachable.
    pub max_trip_duration: chrono::Duration,
    pub modes: Vec<TransportMode>,
}

/// A point submitted to the routing engine, in EPSG:4326.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdPoint {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
}

impl From<&CentroidRecord> for OdPoint {
    fn from(record: &CentroidRecord) -> Self {
        OdPoint {
            id: record.id,
            lon: record.lon,
            lat: record.lat,
        }
    }
}

/// One travel-time row returned by the engine. `None` means unreachable
/// under the routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TravelTime {
    pub from_id: i64,
    pub to_id: i64,
    pub travel_time: Option<i32>,
}

/// Failures the routing engine can signal. An out-of-range departure is a
/// distinct, catchable condition per the engine ABI.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("departure date outside timetable coverage: {0}")]
    DepartureOutOfRange(String),
    #[error("{0}")]
    Engine(String),
}

/// The routing engine seam. Implementations wrap whatever service computes
/// travel times from a street network and timetable.
pub trait RoutingEngine {
    fn travel_times(
        &self,
        origins: &[OdPoint],
        destinations: &[OdPoint],
        config: &RoutingConfig,
    ) -> std::result::Result<Vec<TravelTime>, RoutingError>;
}

/// Batching parameters.
#[derive(Debug, Clone)]
pub struct OdBatchConfig {
    /// Origins per batch. `1` makes the distance pre-filter exact;
    /// `centroids.len()` switches to the non-batched all-origins mode.
    pub num_origins: usize,
    /// Straight-line cut-off for destination candidates, km.
    pub distance_threshold_km: f64,
    /// Output directory for `batch-*.parquet` files and the manifest.
    pub out_dir: PathBuf,
    /// Partition bound on the in-memory batch size, bytes.
    pub partition_bytes: usize,
}

impl OdBatchConfig {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        OdBatchConfig {
            num_origins: 1,
            distance_threshold_km: 11.25,
            out_dir: out_dir.into(),
            partition_bytes: DEFAULT_PARTITION_BYTES,
        }
    }
}

/// Per-batch outcome, recorded in the manifest.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRecord {
    pub batch_index: usize,
    pub key: String,
    pub origins: usize,
    pub destinations: usize,
    pub rows: usize,
    pub status: String,
    pub error: Option<String>,
    pub outputs: Vec<String>,
}

/// Summary returned after the run so callers can log success/failure counts
/// and find the manifest.
#[derive(Debug, Serialize)]
pub struct OdSummary {
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows_written: usize,
    pub manifest_path: PathBuf,
    pub records: Vec<BatchRecord>,
}

/// Run the full origin–destination matrix computation.
///
/// Origins are all centroids; destination candidates are the centroids
/// whose `within_urban_centre` flag is set. Batches are processed
/// sequentially and each batch is fully written before the next begins, so
/// an interrupted run leaves only complete batch files behind. A failed
/// batch is recorded and skipped; already-persisted batches stay valid.
pub fn run_od_matrix(
    centroids: &CentroidTable,
    engine: &dyn RoutingEngine,
    routing: &RoutingConfig,
    config: &OdBatchConfig,
) -> Result<OdSummary> {
    let mut records = centroids.records()?;
    records.sort_by_key(|r| r.id);
    let total = records.len();
    if total == 0 {
        return Err(UpaError::invalid_parameter(
            "centroids",
            "centroid table is empty",
        ));
    }
    if config.num_origins < 1 || config.num_origins > total {
        return Err(UpaError::invalid_parameter(
            "num_origins",
            format!("expected 1..={total}, got {}", config.num_origins),
        ));
    }
    let all_origins_mode = config.num_origins == total;
    if !all_origins_mode && config.num_origins > 1 {
        warn!(
            num_origins = config.num_origins,
            "the distance pre-filter is only exact for num_origins = 1; the \
             engine re-forms the full cartesian product within each batch"
        );
    }

    let destinations: Vec<OdPoint> = records
        .iter()
        .filter(|r| r.within_urban_centre)
        .map(OdPoint::from)
        .collect();

    fs::create_dir_all(&config.out_dir)?;

    let mut batch_records = Vec::new();
    let mut rows_written = 0usize;
    for (batch_index, chunk) in records.chunks(config.num_origins).enumerate() {
        let origins: Vec<OdPoint> = chunk.iter().map(OdPoint::from).collect();
        let key = if all_origins_mode {
            BatchKey::All
        } else {
            // chunks are in ascending id order, so the first origin is min
            BatchKey::MinOrigin(origins[0].id)
        };

        // Destination candidates within the straight-line threshold of any
        // origin in the batch; exact pairs at the threshold are kept. The
        // all-origins mode skips the filter entirely.
        let batch_destinations: Vec<OdPoint> = if all_origins_mode {
            destinations.clone()
        } else {
            destinations
                .iter()
                .filter(|d| {
                    origins.iter().any(|o| {
                        haversine_km(o.lat, o.lon, d.lat, d.lon) <= config.distance_threshold_km
                    })
                })
                .copied()
                .collect()
        };

        let record = run_batch(
            batch_index,
            key,
            &origins,
            &batch_destinations,
            engine,
            routing,
            config,
        );
        rows_written += record.rows;
        batch_records.push(record);
    }

    let succeeded = batch_records.iter().filter(|r| r.status == "ok").count();
    let failed = batch_records.len() - succeeded;
    info!(
        batches = batch_records.len(),
        succeeded, failed, rows_written, "origin-destination run finished"
    );

    let manifest_path = config.out_dir.join("od_manifest.json");
    let manifest = serde_json::to_string_pretty(&batch_records)
        .map_err(|e| UpaError::Columnar(e.to_string()))?;
    fs::write(&manifest_path, manifest)?;

    Ok(OdSummary {
        batches: batch_records.len(),
        succeeded,
        failed,
        rows_written,
        manifest_path,
        records: batch_records,
    })
}

fn run_batch(
    batch_index: usize,
    key: BatchKey,
    origins: &[OdPoint],
    destinations: &[OdPoint],
    engine: &dyn RoutingEngine,
    routing: &RoutingConfig,
    config: &OdBatchConfig,
) -> BatchRecord {
    let mut record = BatchRecord {
        batch_index,
        key: key.to_string(),
        origins: origins.len(),
        destinations: destinations.len(),
        rows: 0,
        status: "ok".to_string(),
        error: None,
        outputs: Vec::new(),
    };

    let runner = || -> Result<(usize, Vec<PathBuf>)> {
        let rows = engine
            .travel_times(origins, destinations, routing)
            .map_err(|e| match e {
                RoutingError::DepartureOutOfRange(msg) => UpaError::RoutingOutOfRange(msg),
                RoutingError::Engine(msg) => UpaError::Routing(msg),
            })?;
        let mut df = travel_times_to_frame(&rows)?;
        let outputs = write_batch(&config.out_dir, key, &mut df, config.partition_bytes)?;
        Ok((rows.len(), outputs))
    };

    match runner() {
        Ok((rows, outputs)) => {
            record.rows = rows;
            record.outputs = outputs
                .into_iter()
                .map(|p| p.display().to_string())
                .collect();
        }
        Err(err) => {
            warn!(batch = batch_index, error = %err, "batch failed; no output written");
            record.status = "error".to_string();
            record.error = Some(err.to_string());
        }
    }
    record
}

fn travel_times_to_frame(rows: &[TravelTime]) -> Result<DataFrame> {
    let from: Vec<i64> = rows.iter().map(|r| r.from_id).collect();
    let to: Vec<i64> = rows.iter().map(|r| r.to_id).collect();
    let tt: Vec<Option<i32>> = rows.iter().map(|r| r.travel_time).collect();
    Ok(DataFrame::new(vec![
        Series::new("from_id", from),
        Series::new("to_id", to),
        Series::new("travel_time", tt),
    ])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use upa_core::Crs;
    use upa_io::TravelTimeStore;

    /// Mock engine: travel time is the id difference, the way the metrics
    /// fixtures are built.
    struct IdDifferenceEngine;

    impl RoutingEngine for IdDifferenceEngine {
        fn travel_times(
            &self,
            origins: &[OdPoint],
            destinations: &[OdPoint],
            _config: &RoutingConfig,
        ) -> std::result::Result<Vec<TravelTime>, RoutingError> {
            let mut out = Vec::new();
            for o in origins {
                for d in destinations {
                    out.push(TravelTime {
                        from_id: o.id,
                        to_id: d.id,
                        travel_time: Some((o.id - d.id).unsigned_abs() as i32),
                    });
                }
            }
            Ok(out)
        }
    }

    struct ClosedTimetableEngine;

    impl RoutingEngine for ClosedTimetableEngine {
        fn travel_times(
            &self,
            _origins: &[OdPoint],
            _destinations: &[OdPoint],
            _config: &RoutingConfig,
        ) -> std::result::Result<Vec<TravelTime>, RoutingError> {
            Err(RoutingError::DepartureOutOfRange(
                "2023-09-01 is before the first service day".to_string(),
            ))
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

    /// Four centroids on a ~100 m grid near Newport; the middle two are
    /// urban-centre destinations.
    fn centroids() -> CentroidTable {
        let lons = vec![-3.002, -3.0005, -2.999, -2.9975];
        let lats = vec![51.588, 51.588, 51.588, 51.588];
        let within = vec![false, true, true, false];
        let df = DataFrame::new(vec![
            Series::new("id", vec![0i64, 1, 2, 3]),
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

    #[test]
    fn single_origin_batches_write_one_file_per_origin() {
        let dir = tempfile::tempdir().unwrap();
        let config = OdBatchConfig::new(dir.path());
        let summary =
            run_od_matrix(&centroids(), &IdDifferenceEngine, &routing_config(), &config).unwrap();

        assert_eq!(summary.batches, 4);
        assert_eq!(summary.failed, 0);
        // every origin sees both destinations at this scale
        assert_eq!(summary.rows_written, 8);
        for id in 0..4 {
            assert!(dir.path().join(format!("batch-{id}-0.parquet")).exists());
        }
        assert!(summary.manifest_path.exists());

        let store = TravelTimeStore::open(dir.path()).unwrap();
        let df = store.lazy().unwrap().collect().unwrap();
        assert_eq!(df.height(), 8);
    }

    #[test]
    fn distance_filter_drops_far_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OdBatchConfig::new(dir.path());
        // ~0.1 km between neighbours; a tight threshold keeps only nearby
        // destinations per origin.
        config.distance_threshold_km = 0.15;
        let summary =
            run_od_matrix(&centroids(), &IdDifferenceEngine, &routing_config(), &config).unwrap();
        // origin 0: dest 1 only (dest 2 is ~0.21 km away); origin 3: dest 2
        // only; origins 1 and 2 see both.
        assert_eq!(summary.rows_written, 1 + 2 + 2 + 1);
    }

    #[test]
    fn all_origins_mode_skips_filtering_and_writes_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OdBatchConfig::new(dir.path());
        config.num_origins = 4;
        // threshold that would drop pairs if filtering applied
        config.distance_threshold_km = 0.01;
        let summary =
            run_od_matrix(&centroids(), &IdDifferenceEngine, &routing_config(), &config).unwrap();
        assert_eq!(summary.batches, 1);
        assert_eq!(summary.rows_written, 8);
        assert!(dir.path().join("batch-all-0.parquet").exists());
    }

    #[test]
    fn out_of_range_departure_fails_batch_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = OdBatchConfig::new(dir.path());
        let summary = run_od_matrix(
            &centroids(),
            &ClosedTimetableEngine,
            &routing_config(),
            &config,
        )
        .unwrap();
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 4);
        assert_eq!(summary.rows_written, 0);
        for record in &summary.records {
            assert_eq!(record.status, "error");
            assert!(record.error.as_ref().unwrap().contains("timetable"));
            assert!(record.outputs.is_empty());
        }
        // only the manifest should exist
        let parquet_files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "parquet").unwrap_or(false))
            .collect();
        assert!(parquet_files.is_empty());
    }

    #[test]
    fn num_origins_out_of_bounds_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        for bad in [0usize, 5] {
            let mut config = OdBatchConfig::new(dir.path());
            config.num_origins = bad;
            let err = run_od_matrix(
                &centroids(),
                &IdDifferenceEngine,
                &routing_config(),
                &config,
            )
            .unwrap_err();
            assert!(matches!(err, UpaError::InvalidParameter { param: "num_origins", .. }));
        }
    }

    #[test]
    fn boundary_distance_is_kept() {
        // A destination exactly at the threshold distance must survive the
        // pre-filter.
        let c = centroids();
        let records = c.records().unwrap();
        let d = haversine_km(
            records[0].lat,
            records[0].lon,
            records[1].lat,
            records[1].lon,
        );

        let dir = tempfile::tempdir().unwrap();
        let mut config = OdBatchConfig::new(dir.path());
        config.distance_threshold_km = d;
        let summary =
            run_od_matrix(&c, &IdDifferenceEngine, &routing_config(), &config).unwrap();
        let first = &summary.records[0];
        assert!(first.destinations >= 1);
    }
}
