//! Unified error types for the UPA pipeline.
//!
//! This module provides a common error type [`Error`] covering every failure
//! mode of the pipeline stages. Each distinct condition gets its own variant
//! so callers can match on the kind instead of parsing messages.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for all pipeline operations.
///
/// Variants carry the parameter name and the offending value where one
/// exists, so a failure deep inside a stage still tells the caller which
/// input to fix.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (file access, directory creation, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A referenced file or directory is missing.
    #[error("input not found: '{}'", path.display())]
    InputNotFound { path: PathBuf },

    /// File extension, magic bytes or table schema do not match expectations.
    #[error("format mismatch for '{}': {reason}", path.display())]
    FormatMismatch { path: PathBuf, reason: String },

    /// Raster decoding/encoding errors.
    #[error("raster error: {0}")]
    Raster(String),

    /// Input CRSs disagree in a context where no reprojection is performed.
    #[error("CRS mismatch: expected {expected}, got {found}")]
    CrsMismatch { expected: String, found: String },

    /// A raster clip yielded no data.
    #[error("empty window: the clip region contains no raster cells")]
    EmptyWindow,

    /// No cell or cluster survives a threshold.
    #[error("`{param}` value {value} too high, nothing over threshold")]
    ThresholdRejectsAll { param: &'static str, value: f64 },

    /// The urban-centre seed lies outside the raster window.
    #[error("seed coordinates fall outside of the raster window (row {row}, col {col})")]
    SeedOutsideWindow { row: i64, col: i64 },

    /// The urban-centre seed lies inside a discarded region.
    #[error("seed coordinates are not included within any cluster (row {row}, col {col})")]
    SeedUnassigned { row: usize, col: usize },

    /// Requested departure falls outside the timetable's coverage.
    #[error("departure date out of timetable range: {0}")]
    RoutingOutOfRange(String),

    /// Any other routing engine failure, surfaced unchanged.
    #[error("routing engine error: {0}")]
    Routing(String),

    /// An internal join asserted 1-to-1 observed duplicate keys. A bug, not
    /// an input problem.
    #[error("cardinality violation in {context}: join asserted 1:1 observed duplicates")]
    CardinalityViolation { context: String },

    /// A metric-required operation encountered non-metric units.
    #[error("unsupported units '{units}' for CRS {crs}: operation requires metres")]
    UnsupportedUnits { crs: String, units: String },

    /// A parameter is outside its accepted domain.
    #[error("invalid value for `{param}`: {message}")]
    InvalidParameter { param: &'static str, message: String },

    /// Columnar table operation errors.
    #[error("table error: {0}")]
    Table(#[from] polars::prelude::PolarsError),

    /// Geometry encoding/decoding errors (WKB).
    #[error("geometry error: {0}")]
    Geometry(String),

    /// Columnar artifact file errors (Parquet/Arrow layer).
    #[error("columnar file error: {0}")]
    Columnar(String),
}

/// Convenience type alias for Results using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for [`Error::InvalidParameter`] with a formatted message.
    pub fn invalid_parameter(param: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            param,
            message: message.into(),
        }
    }
}
