//! # upa-core: shared types for urban performance analytics
//!
//! Foundation crate for the UPA pipeline: the error type every stage
//! returns, explicit CRS handling, the raster grid model, the haversine
//! distance used for proximity filtering, polygon helpers, and the record
//! types (urban-centre artifact, population table, centroid table) that
//! flow between stages and outlive a run.

pub mod crs;
pub mod distance;
pub mod error;
pub mod geometry;
pub mod raster;
pub mod tables;

pub use crs::{transform_point, transform_polygon, Crs, CrsUnit};
pub use distance::{haversine_km, EARTH_RADIUS_KM};
pub use error::{Error, Result};
pub use geometry::{buffer_polygon, disc, envelope, largest_polygon, rect_to_polygon};
pub use raster::{GridTransform, RasterGrid};
pub use tables::{
    CentroidRecord, CentroidTable, PopulationTable, UrbanCentreArtifact, URBAN_CENTRE_LABELS,
};
