//! In-memory record types shared across the pipeline stages.
//!
//! Tabular columns live in polars `DataFrame`s so the aggregator can join
//! and group without conversion; geometries ride alongside in parallel
//! vectors indexed by row (the `id` column is dense and row-major, so row
//! index and id coincide at construction time).

use geo::{Point, Polygon};
use polars::prelude::*;

use crate::crs::Crs;
use crate::error::{Error, Result};

/// Labels of the three urban-centre polygons, in output order.
pub const URBAN_CENTRE_LABELS: [&str; 3] = ["vectorized_uc", "buffer", "bbox"];

/// The urban-centre extraction output: the selected cluster polygon, its
/// buffer, and the buffer's axis-aligned envelope, all in the raster CRS.
///
/// Invariant: `vectorized_uc ⊆ buffer ⊆ bbox`.
#[derive(Debug, Clone)]
pub struct UrbanCentreArtifact {
    pub vectorized_uc: Polygon<f64>,
    pub buffer: Polygon<f64>,
    pub bbox: Polygon<f64>,
    pub crs: Crs,
}

impl UrbanCentreArtifact {
    /// The labelled polygons in persistence order.
    pub fn labelled(&self) -> [(&'static str, &Polygon<f64>); 3] {
        [
            (URBAN_CENTRE_LABELS[0], &self.vectorized_uc),
            (URBAN_CENTRE_LABELS[1], &self.buffer),
            (URBAN_CENTRE_LABELS[2], &self.bbox),
        ]
    }
}

/// One record per population cell: dense id, population value, cell polygon
/// in the raster CRS, and urban-centre membership.
#[derive(Debug, Clone)]
pub struct PopulationTable {
    /// Columns: `id: i64`, `<var_name>: f64|i64`, `within_urban_centre: bool`.
    pub df: DataFrame,
    /// Cell polygons, one per row, in `crs`.
    pub geometry: Vec<Polygon<f64>>,
    pub var_name: String,
    pub crs: Crs,
}

impl PopulationTable {
    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Ids must be a dense 0..N run, geometry must align row-for-row, and
    /// every population must be strictly positive.
    pub fn validate(&self) -> Result<()> {
        if self.geometry.len() != self.df.height() {
            return Err(Error::invalid_parameter(
                "population_table",
                format!(
                    "geometry length {} does not match table height {}",
                    self.geometry.len(),
                    self.df.height()
                ),
            ));
        }
        let ids = self.df.column("id")?.i64()?;
        for (expected, id) in ids.into_iter().enumerate() {
            if id != Some(expected as i64) {
                return Err(Error::invalid_parameter(
                    "population_table",
                    format!("ids are not dense at row {expected}"),
                ));
            }
        }
        let values = self.df.column(&self.var_name)?.cast(&DataType::Float64)?;
        for (row, value) in values.f64()?.into_iter().enumerate() {
            if !value.map(|v| v > 0.0).unwrap_or(false) {
                return Err(Error::invalid_parameter(
                    "population_table",
                    format!("population must be positive, row {row} holds {value:?}"),
                ));
            }
        }
        Ok(())
    }
}

/// One record per population cell: the cell centroid in the routing
/// engine's geographic CRS.
#[derive(Debug, Clone)]
pub struct CentroidTable {
    /// Columns: `id: i64`, `centroid_x: f64` (lon), `centroid_y: f64` (lat),
    /// `within_urban_centre: bool`.
    pub df: DataFrame,
    /// Centroid points, one per row, in `crs` (x = lon, y = lat).
    pub points: Vec<Point<f64>>,
    pub crs: Crs,
}

impl CentroidTable {
    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Ids, lon/lat and urban-centre flags as parallel vectors, for callers
    /// that iterate rather than join.
    pub fn records(&self) -> Result<Vec<CentroidRecord>> {
        let ids = self.df.column("id")?.i64()?;
        let flags = self.df.column("within_urban_centre")?.bool()?;
        let mut out = Vec::with_capacity(self.df.height());
        for (i, point) in self.points.iter().enumerate() {
            out.push(CentroidRecord {
                id: ids.get(i).ok_or_else(|| {
                    Error::invalid_parameter("centroid_table", format!("null id at row {i}"))
                })?,
                lon: point.x(),
                lat: point.y(),
                within_urban_centre: flags.get(i).unwrap_or(false),
            });
        }
        Ok(out)
    }
}

/// A single centroid row, flattened for pointwise work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentroidRecord {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
    pub within_urban_centre: bool,
}
