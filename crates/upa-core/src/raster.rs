//! Gridded raster data: an affine transform plus a dense array of cell
//! values with a nodata sentinel.
//!
//! Only the north-up, axis-aligned affine case is supported (x cell size
//! positive, y cell size negative), which covers every gridded population
//! product the pipeline consumes.

use geo::{Coord, LineString, Polygon, Rect};
use ndarray::Array2;

use crate::crs::Crs;
use crate::error::{Error, Result};

/// Affine transform mapping (row, col) to the (x, y) of a cell's top-left
/// corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTransform {
    /// x of the grid's top-left corner.
    pub x_origin: f64,
    /// y of the grid's top-left corner.
    pub y_origin: f64,
    /// Cell width, positive.
    pub x_size: f64,
    /// Cell height, negative for north-up grids.
    pub y_size: f64,
}

impl GridTransform {
    pub fn new(x_origin: f64, y_origin: f64, x_size: f64, y_size: f64) -> Self {
        GridTransform {
            x_origin,
            y_origin,
            x_size,
            y_size,
        }
    }

    /// World coordinates of the top-left corner of cell (row, col).
    pub fn xy(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.x_origin + col as f64 * self.x_size,
            self.y_origin + row as f64 * self.y_size,
        )
    }

    /// Cell indices containing world point (x, y). May be negative or past
    /// the grid extent; bounds checking is the caller's concern.
    pub fn rowcol(&self, x: f64, y: f64) -> (i64, i64) {
        let col = ((x - self.x_origin) / self.x_size).floor() as i64;
        let row = ((y - self.y_origin) / self.y_size).floor() as i64;
        (row, col)
    }

    /// Transform for a window whose top-left cell is (row, col) of this grid.
    pub fn shifted(&self, row: usize, col: usize) -> GridTransform {
        let (x, y) = self.xy(row, col);
        GridTransform::new(x, y, self.x_size, self.y_size)
    }

    /// Axis-aligned polygon of cell (row, col).
    pub fn cell_polygon(&self, row: usize, col: usize) -> Polygon<f64> {
        let (x0, y0) = self.xy(row, col);
        let x1 = x0 + self.x_size;
        let y1 = y0 + self.y_size;
        Polygon::new(
            LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
            vec![],
        )
    }
}

/// A single-band raster: cell values, affine transform, CRS and nodata
/// sentinel. Cells equal to the sentinel (or NaN) are treated as absent.
#[derive(Debug, Clone)]
pub struct RasterGrid {
    pub data: Array2<f64>,
    pub transform: GridTransform,
    pub crs: Crs,
    pub nodata: Option<f64>,
}

impl RasterGrid {
    pub fn new(
        data: Array2<f64>,
        transform: GridTransform,
        crs: Crs,
        nodata: Option<f64>,
    ) -> Self {
        RasterGrid {
            data,
            transform,
            crs,
            nodata,
        }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || self.nodata.map(|nd| value == nd).unwrap_or(false)
    }

    /// Cell value, or None when out of bounds or nodata.
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        let v = *self.data.get((row, col))?;
        if self.is_nodata(v) {
            None
        } else {
            Some(v)
        }
    }

    /// Full extent of the grid as a rectangle.
    pub fn bounds(&self) -> Rect<f64> {
        let (x0, y0) = self.transform.xy(0, 0);
        let (x1, y1) = self.transform.xy(self.rows(), self.cols());
        Rect::new(Coord { x: x0, y: y1 }, Coord { x: x1, y: y0 })
    }

    /// Crop to the cells intersecting `bbox` (`all_touched` semantics: any
    /// cell with positive overlap is kept). Fails with [`Error::EmptyWindow`]
    /// when the box misses the grid entirely, and with
    /// [`Error::CrsMismatch`] when `bbox_crs` differs from the raster CRS.
    pub fn window(&self, bbox: &Rect<f64>, bbox_crs: &Crs) -> Result<RasterGrid> {
        if bbox_crs != &self.crs {
            return Err(Error::CrsMismatch {
                expected: self.crs.code().to_string(),
                found: bbox_crs.code().to_string(),
            });
        }

        let t = &self.transform;
        // Fractional column/row spans of the box, then every cell with
        // positive overlap. y_size is negative, so min/max y swap rows.
        let c0 = (bbox.min().x - t.x_origin) / t.x_size;
        let c1 = (bbox.max().x - t.x_origin) / t.x_size;
        let r0 = (bbox.max().y - t.y_origin) / t.y_size;
        let r1 = (bbox.min().y - t.y_origin) / t.y_size;

        let col_start = c0.floor().max(0.0) as usize;
        let col_end = (c1.ceil().min(self.cols() as f64) as usize).min(self.cols());
        let row_start = r0.floor().max(0.0) as usize;
        let row_end = (r1.ceil().min(self.rows() as f64) as usize).min(self.rows());

        if c1 <= 0.0 || r1 <= 0.0 || col_start >= col_end || row_start >= row_end {
            return Err(Error::EmptyWindow);
        }

        let view = self
            .data
            .slice(ndarray::s![row_start..row_end, col_start..col_end]);
        Ok(RasterGrid {
            data: view.to_owned(),
            transform: t.shifted(row_start, col_start),
            crs: self.crs.clone(),
            nodata: self.nodata,
        })
    }
}
