//! Raster pre-processing: merging tiles and sum-resampling.
//!
//! Gridded population products ship as fixed tiles; covering a city usually
//! means merging a few of them and coarsening the grid (e.g. 100 m cells
//! summed into 200 m cells) before the pipeline proper starts.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use regex::Regex;

use upa_core::error::{Error, Result};
use upa_core::{GridTransform, RasterGrid};

use crate::geotiff::{read_geotiff, write_geotiff};

/// Extents of the merge inputs and output, for caller-side consistency
/// checks (overlap handling is first-wins; see [`merge_rasters`]).
#[derive(Debug, Clone, PartialEq)]
pub struct MergeBounds {
    /// (min x, min y, max x, max y) per input, in input order.
    pub inputs: Vec<(f64, f64, f64, f64)>,
    /// (min x, min y, max x, max y) of the merged output.
    pub output: (f64, f64, f64, f64),
}

fn rect_bounds(grid: &RasterGrid) -> (f64, f64, f64, f64) {
    let r = grid.bounds();
    (r.min().x, r.min().y, r.max().x, r.max().y)
}

/// Merge every `.tif` in `input_dir` (optionally subset by `subset_regex`
/// over the file name) into one raster at `output_path`.
///
/// CRS, resolution and nodata are taken from the first input; inputs must
/// agree on all three. Where tiles overlap the first input wins. The tiles
/// must share the same grid lattice (origins offset by whole cells).
pub fn merge_rasters(
    input_dir: &Path,
    output_path: &Path,
    subset_regex: Option<&str>,
) -> Result<MergeBounds> {
    if !input_dir.is_dir() {
        return Err(Error::InputNotFound {
            path: input_dir.to_path_buf(),
        });
    }
    let mut files: Vec<PathBuf> = fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("tif"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(Error::InputNotFound {
            path: input_dir.join("*.tif"),
        });
    }

    if let Some(pattern) = subset_regex {
        let re = Regex::new(pattern)
            .map_err(|e| Error::invalid_parameter("subset_regex", e.to_string()))?;
        files.retain(|p| {
            p.file_name()
                .map(|n| re.is_match(&n.to_string_lossy()))
                .unwrap_or(false)
        });
        if files.is_empty() {
            return Err(Error::InputNotFound {
                path: input_dir.join(format!("*.tif matching '{pattern}'")),
            });
        }
    }

    let grids: Vec<RasterGrid> = files
        .iter()
        .map(|p| read_geotiff(p))
        .collect::<Result<Vec<_>>>()?;

    let first = &grids[0];
    let (x_size, y_size) = (first.transform.x_size, first.transform.y_size);
    for grid in &grids[1..] {
        if grid.crs != first.crs {
            return Err(Error::CrsMismatch {
                expected: first.crs.code().to_string(),
                found: grid.crs.code().to_string(),
            });
        }
        if grid.transform.x_size != x_size || grid.transform.y_size != y_size {
            return Err(Error::Raster(format!(
                "inconsistent resolutions: ({x_size}, {y_size}) vs ({}, {})",
                grid.transform.x_size, grid.transform.y_size
            )));
        }
    }

    // Merged lattice: the envelope of all inputs, anchored at the first
    // grid's lattice. Inputs must sit on whole-cell offsets of it.
    let min_x = grids
        .iter()
        .map(|g| g.transform.x_origin)
        .fold(f64::INFINITY, f64::min);
    let max_y = grids
        .iter()
        .map(|g| g.transform.y_origin)
        .fold(f64::NEG_INFINITY, f64::max);
    let max_x = grids
        .iter()
        .map(|g| g.transform.x_origin + g.cols() as f64 * x_size)
        .fold(f64::NEG_INFINITY, f64::max);
    let min_y = grids
        .iter()
        .map(|g| g.transform.y_origin + g.rows() as f64 * y_size)
        .fold(f64::INFINITY, f64::min);

    let cols = ((max_x - min_x) / x_size).round() as usize;
    let rows = ((min_y - max_y) / y_size).round() as usize;

    let fill = first.nodata.unwrap_or(f64::NAN);
    let mut data = Array2::<f64>::from_elem((rows, cols), fill);
    let merged_transform = GridTransform::new(min_x, max_y, x_size, y_size);

    for grid in &grids {
        let col_off = ((grid.transform.x_origin - min_x) / x_size).round() as i64;
        let row_off = ((grid.transform.y_origin - max_y) / y_size).round() as i64;
        if col_off < 0 || row_off < 0 {
            return Err(Error::Raster(
                "input tiles are not aligned to a common lattice".to_string(),
            ));
        }
        for ((r, c), &value) in grid.data.indexed_iter() {
            if grid.is_nodata(value) {
                continue;
            }
            let target = &mut data[[r + row_off as usize, c + col_off as usize]];
            let occupied = !target.is_nan() && first.nodata.map(|nd| *target != nd).unwrap_or(true);
            if !occupied {
                *target = value;
            }
        }
    }

    let merged = RasterGrid::new(data, merged_transform, first.crs.clone(), first.nodata);
    write_geotiff(output_path, &merged)?;

    Ok(MergeBounds {
        inputs: grids.iter().map(rect_bounds).collect(),
        output: rect_bounds(&merged),
    })
}

/// Resample a raster to a coarser grid by summing blocks of
/// `factor` × `factor` cells. Nodata cells contribute nothing; a target
/// cell whose sources are all nodata stays nodata.
pub fn sum_resample(input_path: &Path, output_path: &Path, factor: usize) -> Result<()> {
    if factor < 1 {
        return Err(Error::invalid_parameter(
            "resample_factor",
            "must be at least 1",
        ));
    }
    let grid = read_geotiff(input_path)?;
    let out_rows = (grid.rows() + factor - 1) / factor;
    let out_cols = (grid.cols() + factor - 1) / factor;
    let fill = grid.nodata.unwrap_or(f64::NAN);

    let mut data = Array2::<f64>::from_elem((out_rows, out_cols), fill);
    for out_r in 0..out_rows {
        for out_c in 0..out_cols {
            let mut sum = 0.0;
            let mut seen = false;
            for r in (out_r * factor)..((out_r + 1) * factor).min(grid.rows()) {
                for c in (out_c * factor)..((out_c + 1) * factor).min(grid.cols()) {
                    if let Some(v) = grid.value(r, c) {
                        sum += v;
                        seen = true;
                    }
                }
            }
            if seen {
                data[[out_r, out_c]] = sum;
            }
        }
    }

    let transform = GridTransform::new(
        grid.transform.x_origin,
        grid.transform.y_origin,
        grid.transform.x_size * factor as f64,
        grid.transform.y_size * factor as f64,
    );
    let resampled = RasterGrid::new(data, transform, grid.crs.clone(), grid.nodata);
    write_geotiff(output_path, &resampled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use upa_core::Crs;

    fn tile(x_origin: f64, values: Array2<f64>) -> RasterGrid {
        RasterGrid::new(
            values,
            GridTransform::new(x_origin, 2000.0, 1000.0, -1000.0),
            Crs::mollweide(),
            Some(-1.0),
        )
    }

    #[test]
    fn merge_two_adjacent_tiles() {
        let dir = tempfile::tempdir().unwrap();
        write_geotiff(
            &dir.path().join("a.tif"),
            &tile(0.0, array![[1.0, 2.0], [3.0, 4.0]]),
        )
        .unwrap();
        write_geotiff(
            &dir.path().join("b.tif"),
            &tile(2000.0, array![[5.0, 6.0], [7.0, 8.0]]),
        )
        .unwrap();

        let out = dir.path().join("merged.tif");
        let bounds = merge_rasters(dir.path(), &out, None).unwrap();
        assert_eq!(bounds.inputs.len(), 2);
        assert_eq!(bounds.output, (0.0, 0.0, 4000.0, 2000.0));

        let merged = read_geotiff(&out).unwrap();
        assert_eq!((merged.rows(), merged.cols()), (2, 4));
        assert_eq!(merged.value(0, 0), Some(1.0));
        assert_eq!(merged.value(1, 3), Some(8.0));
    }

    #[test]
    fn merge_subset_regex_filters_files() {
        let dir = tempfile::tempdir().unwrap();
        write_geotiff(
            &dir.path().join("pop_2020.tif"),
            &tile(0.0, array![[1.0]]),
        )
        .unwrap();
        write_geotiff(
            &dir.path().join("pop_2015.tif"),
            &tile(1000.0, array![[9.0]]),
        )
        .unwrap();

        let out = dir.path().join("merged.tif");
        let bounds = merge_rasters(dir.path(), &out, Some("2020")).unwrap();
        assert_eq!(bounds.inputs.len(), 1);

        let err = merge_rasters(dir.path(), &out, Some("2031")).unwrap_err();
        assert!(matches!(err, Error::InputNotFound { .. }));
    }

    #[test]
    fn merge_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = merge_rasters(dir.path(), &dir.path().join("out.tif"), None).unwrap_err();
        assert!(matches!(err, Error::InputNotFound { .. }));
    }

    #[test]
    fn resample_sums_blocks_and_keeps_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("fine.tif");
        write_geotiff(
            &input,
            &tile(
                0.0,
                array![
                    [1.0, 2.0, -1.0, -1.0],
                    [3.0, 4.0, -1.0, -1.0],
                ],
            ),
        )
        .unwrap();

        let output = dir.path().join("coarse.tif");
        sum_resample(&input, &output, 2).unwrap();
        let coarse = read_geotiff(&output).unwrap();
        assert_eq!((coarse.rows(), coarse.cols()), (1, 2));
        assert_eq!(coarse.value(0, 0), Some(10.0));
        // all-nodata block stays nodata
        assert_eq!(coarse.value(0, 1), None);
        assert_eq!(coarse.transform.x_size, 2000.0);
    }
}
