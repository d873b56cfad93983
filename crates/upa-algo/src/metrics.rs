//! Transport performance aggregation.
//!
//! Joins the travel-time matrix with centroid coordinates and origin
//! populations, computes the inter-centroid haversine distance inside the
//! lazy plan, and aggregates per destination:
//!
//! - accessible population: origins within the distance threshold whose
//!   travel time is within the time threshold,
//! - proximity population: origins within the distance threshold,
//! - transport performance: `100 * accessible / proximity`.
//!
//! The whole computation is one streaming polars plan; nothing materialises
//! before the per-destination aggregates.

use std::collections::HashMap;

use geo::{Area, Polygon};
use polars::prelude::*;
use tracing::warn;

use upa_core::error::{Error, Result};
use upa_core::{
    transform_polygon, CentroidTable, Crs, PopulationTable, UrbanCentreArtifact, EARTH_RADIUS_KM,
};
use upa_io::TravelTimeStore;

/// Aggregation options. The id column names must match the travel-time
/// store schema.
#[derive(Debug, Clone)]
pub struct PerformanceOptions {
    /// Maximum travel time counted as accessible, minutes. Inclusive.
    pub travel_time_threshold: i64,
    /// Maximum straight-line distance counted as proximate, km. Inclusive.
    pub distance_threshold_km: f64,
    pub sources_col: String,
    pub destinations_col: String,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        PerformanceOptions {
            travel_time_threshold: 45,
            distance_threshold_km: 11.25,
            sources_col: "from_id".to_string(),
            destinations_col: "to_id".to_string(),
        }
    }
}

/// Per-destination performance results with the destination cell geometry
/// reattached.
#[derive(Debug, Clone)]
pub struct PerformanceTable {
    /// Columns: `id`, `accessible_population`, `proximity_population`,
    /// `transport_performance`, `population`, `within_urban_centre`.
    /// Population and the flag are null for destinations outside the
    /// population table.
    pub df: DataFrame,
    /// Destination cell polygons, row-aligned; `None` when the id is not in
    /// the population table.
    pub geometry: Vec<Option<Polygon<f64>>>,
    pub crs: Crs,
}

/// Great-circle distance (km) as a polars expression over degree columns.
///
/// The exact operation sequence of [`upa_core::haversine_km`], so scalar and
/// columnar distances agree bit-for-bit.
fn haversine_km_expr(lat1: Expr, lon1: Expr, lat2: Expr, lon2: Expr) -> Expr {
    let to_rad = std::f64::consts::PI / 180.0;
    let phi1 = lat1 * lit(to_rad);
    let phi2 = lat2 * lit(to_rad);
    let d_lambda = (lon2 - lon1) * lit(to_rad);
    let cosine = phi1.clone().sin() * phi2.clone().sin()
        + phi1.cos() * phi2.cos() * d_lambda.cos();
    // clamp into the arccos domain against float drift on identical points
    let clamped = when(cosine.clone().gt(lit(1.0)))
        .then(lit(1.0))
        .when(cosine.clone().lt(lit(-1.0)))
        .then(lit(-1.0))
        .otherwise(cosine);
    lit(EARTH_RADIUS_KM) * clamped.arccos()
}

/// Compute per-destination transport performance.
///
/// Boundary behaviour: a pair exactly at the distance threshold is
/// proximate, a trip exactly at the travel-time threshold is accessible.
/// Missing origin ids join to nulls and fall out of both sums; unreachable
/// trips (null travel time) never count as accessible.
pub fn transport_performance(
    store: &TravelTimeStore,
    centroids: &CentroidTable,
    population: &PopulationTable,
    options: &PerformanceOptions,
) -> Result<PerformanceTable> {
    let src = options.sources_col.as_str();
    let dst = options.destinations_col.as_str();

    let tts = store
        .lazy()?
        .select([col(src), col(dst), col("travel_time")]);

    let cent = centroids
        .df
        .clone()
        .lazy()
        .select([col("id"), col("centroid_x"), col("centroid_y")]);
    let pop = population
        .df
        .clone()
        .lazy()
        .select([
            col("id"),
            col(&population.var_name)
                .cast(DataType::Float64)
                .alias("population"),
        ]);
    // combine for a single join against the origin side
    let cent_pop = cent
        .clone()
        .join(pop, [col("id")], [col("id")], JoinArgs::new(JoinType::Left));

    let merged = tts
        .join(
            cent_pop,
            [col(src)],
            [col("id")],
            JoinArgs::new(JoinType::Left),
        )
        .rename(
            ["centroid_x", "centroid_y", "population"],
            ["from_centroid_x", "from_centroid_y", "from_population"],
        )
        .join(cent, [col(dst)], [col("id")], JoinArgs::new(JoinType::Left))
        .rename(["centroid_x", "centroid_y"], ["to_centroid_x", "to_centroid_y"])
        .with_column(
            haversine_km_expr(
                col("from_centroid_y"),
                col("from_centroid_x"),
                col("to_centroid_y"),
                col("to_centroid_x"),
            )
            .alias("inter_centroid_distance"),
        );

    let within_distance = col("inter_centroid_distance").lt_eq(lit(options.distance_threshold_km));
    let accessibility = merged
        .clone()
        .filter(within_distance.clone())
        .filter(col("travel_time").lt_eq(lit(options.travel_time_threshold)))
        .group_by([col(dst)])
        .agg([col("from_population").sum().alias("accessible_population")]);
    let proximity = merged
        .filter(within_distance)
        .group_by([col(dst)])
        .agg([col("from_population").sum().alias("proximity_population")]);

    let perf = accessibility
        .join(
            proximity,
            [col(dst)],
            [col(dst)],
            JoinArgs::new(JoinType::Inner),
        )
        .with_column(
            (col("accessible_population") / col("proximity_population") * lit(100.0))
                .alias("transport_performance"),
        )
        .sort(dst, SortOptions::default());
    let perf_df = perf.collect()?;

    // Both inputs are grouped by destination, so the join must stay 1:1;
    // anything else is a bug in the plan, not an input problem.
    let unique = perf_df.column(dst)?.n_unique()?;
    if unique != perf_df.height() {
        return Err(Error::CardinalityViolation {
            context: "accessibility/proximity destination join".to_string(),
        });
    }

    attach_destination_cells(&perf_df, dst, population)
}

/// Left-join the per-destination aggregates back onto the population table
/// to reattach cell geometry and urban-centre flags.
fn attach_destination_cells(
    perf_df: &DataFrame,
    dst: &str,
    population: &PopulationTable,
) -> Result<PerformanceTable> {
    let pop_ids = population.df.column("id")?.i64()?;
    let mut index: HashMap<i64, usize> = HashMap::with_capacity(population.len());
    for (row, id) in pop_ids.into_no_null_iter().enumerate() {
        index.insert(id, row);
    }
    let pop_values = population
        .df
        .column(&population.var_name)?
        .cast(&DataType::Float64)?;
    let pop_values = pop_values.f64()?;
    let pop_flags = population.df.column("within_urban_centre")?.bool()?;

    let dest_ids = perf_df.column(dst)?.i64()?;
    let mut ids = Vec::with_capacity(perf_df.height());
    let mut populations: Vec<Option<f64>> = Vec::with_capacity(perf_df.height());
    let mut flags: Vec<Option<bool>> = Vec::with_capacity(perf_df.height());
    let mut geometry: Vec<Option<Polygon<f64>>> = Vec::with_capacity(perf_df.height());
    for id in dest_ids.into_no_null_iter() {
        ids.push(id);
        match index.get(&id) {
            Some(&row) => {
                populations.push(pop_values.get(row));
                flags.push(pop_flags.get(row));
                geometry.push(population.geometry.get(row).cloned());
            }
            None => {
                populations.push(None);
                flags.push(None);
                geometry.push(None);
            }
        }
    }

    let df = DataFrame::new(vec![
        Series::new("id", ids),
        perf_df.column("accessible_population")?.clone(),
        perf_df.column("proximity_population")?.clone(),
        perf_df.column("transport_performance")?.clone(),
        Series::new("population", populations),
        Series::new("within_urban_centre", flags),
    ])?;

    Ok(PerformanceTable {
        df,
        geometry,
        crs: population.crs.clone(),
    })
}

/// Naming metadata for the summary statistics.
#[derive(Debug, Clone, Default)]
pub struct StatsOptions {
    pub urban_centre_name: Option<String>,
    pub urban_centre_country: Option<String>,
}

/// Descriptive statistics over a performance table.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceStats {
    pub urban_centre_name: Option<String>,
    pub urban_centre_country: Option<String>,
    /// Urban-centre area in km², with the CRS the area was computed in.
    pub urban_centre_area_km2: Option<f64>,
    pub area_crs: Option<Crs>,
    /// Total population over the destination cells, rounded to a count.
    pub urban_centre_population: i64,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

/// Summarise a performance table: min, quartiles (linear interpolation)
/// and max of the performance percentage, the summed destination
/// population, and the urban-centre area in an equal-area CRS.
pub fn performance_stats(
    perf: &PerformanceTable,
    urban_centre: Option<&UrbanCentreArtifact>,
    options: &StatsOptions,
) -> Result<PerformanceStats> {
    let tp = perf.df.column("transport_performance")?.f64()?;
    let (min, q25, median, q75, max) = if tp.is_empty() {
        (None, None, None, None, None)
    } else {
        (
            tp.min(),
            tp.quantile(0.25, QuantileInterpolOptions::Linear)?,
            tp.quantile(0.5, QuantileInterpolOptions::Linear)?,
            tp.quantile(0.75, QuantileInterpolOptions::Linear)?,
            tp.max(),
        )
    };

    let population = perf
        .df
        .column("population")?
        .f64()?
        .sum()
        .unwrap_or(0.0)
        .round() as i64;

    let (area, area_crs) = match urban_centre {
        Some(uc) => {
            let (polygon, crs) = if uc.crs.is_metric() {
                (uc.vectorized_uc.clone(), uc.crs.clone())
            } else {
                warn!(
                    crs = %uc.crs,
                    "urban centre CRS is not metric; reprojecting to ESRI:54009 \
                     for the area calculation"
                );
                let projected = transform_polygon(&uc.crs, &Crs::mollweide(), &uc.vectorized_uc)
                    .map_err(|_| Error::UnsupportedUnits {
                        crs: uc.crs.code().to_string(),
                        units: uc.crs.unit().as_str().to_string(),
                    })?;
                (projected, Crs::mollweide())
            };
            (Some(polygon.unsigned_area() * 1e-6), Some(crs))
        }
        None => (None, None),
    };

    Ok(PerformanceStats {
        urban_centre_name: options.urban_centre_name.clone(),
        urban_centre_country: options.urban_centre_country.clone(),
        urban_centre_area_km2: area,
        area_crs,
        urban_centre_population: population,
        min,
        q25,
        median,
        q75,
        max,
    })
}
