//! # upa-io: raster and columnar I/O for the UPA pipeline
//!
//! Everything that touches disk lives here: GeoTIFF rasters in and out,
//! merge/resample pre-processing, the travel-time Parquet store, and the
//! persisted geo artifacts (population, centroid and urban-centre tables)
//! with WKB geometry columns and CRS metadata.

pub mod artifacts;
pub mod geotiff;
pub mod raster_utils;
pub mod store;

pub use artifacts::{
    read_centroids, read_population, read_urban_centre, write_centroids, write_population,
    write_urban_centre,
};
pub use geotiff::{read_geotiff, write_geotiff};
pub use raster_utils::{merge_rasters, sum_resample, MergeBounds};
pub use store::{write_batch, BatchKey, TravelTimeStore, DEFAULT_PARTITION_BYTES};
