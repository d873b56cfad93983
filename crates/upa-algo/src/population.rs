//! Population conditioning: clip a fine-resolution population raster to an
//! area of interest, optionally round and threshold, vectorise to per-cell
//! records with dense ids, derive routing-ready centroids, and tag cells by
//! urban-centre membership.

use geo::{Contains, Intersects, Polygon};
use polars::prelude::*;

use upa_core::error::{Error, Result};
use upa_core::{transform_point, transform_polygon, CentroidTable, Crs, PopulationTable, RasterGrid};

/// Conditioning parameters.
#[derive(Debug, Clone)]
pub struct PopulationParams {
    /// CRS of the AOI polygon when it differs from the raster's.
    pub aoi_crs: Option<Crs>,
    /// Round cell values to the nearest integer (half-to-even) and emit an
    /// integer population column.
    pub round: bool,
    /// Set cells strictly below this to missing.
    pub threshold: Option<f64>,
    /// Name of the population column.
    pub var_name: String,
    /// CRS of the urban-centre polygon when it differs from the raster's.
    pub urban_centre_crs: Option<Crs>,
}

impl Default for PopulationParams {
    fn default() -> Self {
        PopulationParams {
            aoi_crs: None,
            round: false,
            threshold: None,
            var_name: "population".to_string(),
            urban_centre_crs: None,
        }
    }
}

/// Produce the population and centroid tables for the area of interest.
///
/// Ids are dense `0..N`, assigned in row-major order over the surviving
/// cells, and identical across the two tables. Every surviving cell holds a
/// strictly positive population; a `threshold` only raises that bar.
/// Centroids land in EPSG:4326 for the routing engine.
pub fn condition_population(
    raster: &RasterGrid,
    aoi: &Polygon<f64>,
    urban_centre: Option<&Polygon<f64>>,
    params: &PopulationParams,
) -> Result<(PopulationTable, CentroidTable)> {
    // Bring the AOI into the raster CRS before any windowing.
    let aoi = match &params.aoi_crs {
        Some(crs) if crs != &raster.crs => transform_polygon(crs, &raster.crs, aoi)?,
        _ => aoi.clone(),
    };
    let urban_centre = match (urban_centre, &params.urban_centre_crs) {
        (Some(uc), Some(crs)) if crs != &raster.crs => {
            Some(transform_polygon(crs, &raster.crs, uc)?)
        }
        (Some(uc), _) => Some(uc.clone()),
        (None, _) => None,
    };

    use geo::BoundingRect;
    let aoi_rect = aoi.bounding_rect().ok_or(Error::EmptyWindow)?;
    let window = raster.window(&aoi_rect, &raster.crs)?;

    // Vectorise: one record per cell that intersects the AOI polygon
    // (all_touched), is not nodata, and carries a positive population after
    // rounding and thresholding.
    let mut ids: Vec<i64> = Vec::new();
    let mut values: Vec<f64> = Vec::new();
    let mut geometry: Vec<Polygon<f64>> = Vec::new();
    let mut within: Vec<bool> = Vec::new();
    let mut lons: Vec<f64> = Vec::new();
    let mut lats: Vec<f64> = Vec::new();

    for r in 0..window.rows() {
        for c in 0..window.cols() {
            let Some(raw) = window.value(r, c) else {
                continue;
            };
            let cell = window.transform.cell_polygon(r, c);
            if !cell.intersects(&aoi) {
                continue;
            }
            let value = if params.round { raw.round_ties_even() } else { raw };
            if value <= 0.0 || params.threshold.is_some_and(|t| value < t) {
                continue;
            }

            let id = ids.len() as i64;
            // Cell centre; for an axis-aligned cell this is the geometric
            // centroid.
            let (x0, y0) = window.transform.xy(r, c);
            let cx = x0 + window.transform.x_size / 2.0;
            let cy = y0 + window.transform.y_size / 2.0;
            let (lon, lat) = transform_point(&window.crs, &Crs::wgs84(), cx, cy)?;

            within.push(
                urban_centre
                    .as_ref()
                    .map(|uc| uc.contains(&cell))
                    .unwrap_or(false),
            );
            ids.push(id);
            values.push(value);
            geometry.push(cell);
            lons.push(lon);
            lats.push(lat);
        }
    }

    let var_series = if params.round {
        Series::new(&params.var_name, values.iter().map(|v| *v as i64).collect::<Vec<i64>>())
    } else {
        Series::new(&params.var_name, values)
    };

    let pop_df = DataFrame::new(vec![
        Series::new("id", ids.clone()),
        var_series,
        Series::new("within_urban_centre", within.clone()),
    ])?;
    let population = PopulationTable {
        df: pop_df,
        geometry,
        var_name: params.var_name.clone(),
        crs: window.crs.clone(),
    };

    let centroid_df = DataFrame::new(vec![
        Series::new("id", ids),
        Series::new("centroid_x", lons.clone()),
        Series::new("centroid_y", lats.clone()),
        Series::new("within_urban_centre", within),
    ])?;
    let centroids = CentroidTable {
        df: centroid_df,
        points: lons
            .into_iter()
            .zip(lats)
            .map(|(lon, lat)| geo::Point::new(lon, lat))
            .collect(),
        crs: Crs::wgs84(),
    };

    population.validate()?;
    Ok((population, centroids))
}
