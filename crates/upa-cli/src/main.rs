use anyhow::{anyhow, Context, Result};
use clap::Parser;
use geo::{Coord, Rect};
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use upa_algo::metrics::{
    performance_stats, transport_performance, PerformanceOptions, StatsOptions,
};
use upa_algo::population::{condition_population, PopulationParams};
use upa_algo::urban_centre::{extract_urban_centre, UrbanCentreParams};
use upa_core::Crs;
use upa_io::{
    merge_rasters, read_centroids, read_geotiff, read_population, read_urban_centre, sum_resample,
    write_centroids, write_population, write_urban_centre, TravelTimeStore,
};

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber")?;

    match cli.command {
        Commands::UrbanCentre {
            raster,
            bbox,
            centre,
            cell_pop_threshold,
            diag,
            cluster_pop_threshold,
            cell_fill_threshold,
            buffer_size,
            output,
        } => {
            let grid = read_geotiff(&raster)?;
            let bbox = parse_bbox(&bbox)?;
            let seed = parse_lat_lon(&centre)?;
            let params = UrbanCentreParams {
                cell_pop_threshold,
                diag,
                cluster_pop_threshold,
                cell_fill_threshold,
                buffer_size,
            };
            let bbox_crs = grid.crs.clone();
            let artifact =
                extract_urban_centre(&grid, &bbox, &bbox_crs, seed, &Crs::wgs84(), &params)?;
            write_urban_centre(&artifact, &output)?;
            info!(output = %output.display(), crs = %artifact.crs, "urban centre written");
        }

        Commands::Population {
            raster,
            urban_centre,
            round,
            threshold,
            var_name,
            output_population,
            output_centroids,
        } => {
            let grid = read_geotiff(&raster)?;
            let artifact = read_urban_centre(&urban_centre)?;
            let params = PopulationParams {
                aoi_crs: Some(artifact.crs.clone()),
                round,
                threshold,
                var_name,
                urban_centre_crs: Some(artifact.crs.clone()),
            };
            let (population, centroids) = condition_population(
                &grid,
                &artifact.buffer,
                Some(&artifact.vectorized_uc),
                &params,
            )?;
            write_population(&population, &output_population)?;
            write_centroids(&centroids, &output_centroids)?;
            info!(
                cells = population.len(),
                population = %output_population.display(),
                centroids = %output_centroids.display(),
                "population tables written"
            );
        }

        Commands::Performance {
            travel_times,
            population,
            centroids,
            travel_time_threshold,
            distance_threshold,
            urban_centre,
            name,
            country,
            output,
        } => {
            let store = TravelTimeStore::open(&travel_times)?;
            let population = read_population(&population)?;
            let centroids = read_centroids(&centroids)?;
            let options = PerformanceOptions {
                travel_time_threshold,
                distance_threshold_km: distance_threshold,
                ..PerformanceOptions::default()
            };
            let perf = transport_performance(&store, &centroids, &population, &options)?;

            let artifact = match &urban_centre {
                Some(path) => Some(read_urban_centre(path)?),
                None => None,
            };
            let stats_options = StatsOptions {
                urban_centre_name: name,
                urban_centre_country: country,
            };
            let stats = performance_stats(&perf, artifact.as_ref(), &stats_options)?;

            if let Some(path) = output {
                use polars::prelude::ParquetWriter;
                let mut df = perf.df.clone();
                let mut file = std::fs::File::create(&path)
                    .with_context(|| format!("creating '{}'", path.display()))?;
                ParquetWriter::new(&mut file)
                    .finish(&mut df)
                    .context("writing performance table")?;
                info!(output = %path.display(), rows = df.height(), "performance table written");
            }

            let summary = serde_json::json!({
                "urban_centre_name": stats.urban_centre_name,
                "urban_centre_country": stats.urban_centre_country,
                "urban_centre_area_km2": stats.urban_centre_area_km2,
                "area_crs": stats.area_crs.as_ref().map(|c| c.code().to_string()),
                "urban_centre_population": stats.urban_centre_population,
                "transport_performance": {
                    "min": stats.min,
                    "q25": stats.q25,
                    "median": stats.median,
                    "q75": stats.q75,
                    "max": stats.max,
                },
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Merge {
            input_dir,
            output,
            subset_regex,
        } => {
            let bounds = merge_rasters(&input_dir, &output, subset_regex.as_deref())?;
            info!(
                inputs = bounds.inputs.len(),
                output = %output.display(),
                "rasters merged"
            );
        }

        Commands::Resample {
            input,
            output,
            factor,
        } => {
            sum_resample(&input, &output, factor)?;
            info!(factor, output = %output.display(), "raster resampled");
        }
    }

    Ok(())
}

fn parse_bbox(text: &str) -> Result<Rect<f64>> {
    let parts: Vec<f64> = text
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("parsing bbox '{text}'"))?;
    if parts.len() != 4 {
        return Err(anyhow!(
            "bbox expects min_x,min_y,max_x,max_y; got {} values",
            parts.len()
        ));
    }
    Ok(Rect::new(
        Coord { x: parts[0], y: parts[1] },
        Coord { x: parts[2], y: parts[3] },
    ))
}

fn parse_lat_lon(text: &str) -> Result<(f64, f64)> {
    let parts: Vec<f64> = text
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("parsing coordinates '{text}'"))?;
    if parts.len() != 2 {
        return Err(anyhow!("expected lat,lon; got {} values", parts.len()));
    }
    Ok((parts[0], parts[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_parses_four_floats() {
        let rect = parse_bbox("-243000, 6049000, -233000, 6056000").unwrap();
        assert_eq!(rect.min().x, -243_000.0);
        assert_eq!(rect.max().y, 6_056_000.0);
        assert!(parse_bbox("1,2,3").is_err());
        assert!(parse_bbox("a,b,c,d").is_err());
    }

    #[test]
    fn lat_lon_parses_pairs() {
        assert_eq!(parse_lat_lon("51.74, -3.25").unwrap(), (51.74, -3.25));
        assert!(parse_lat_lon("51.74").is_err());
    }
}
