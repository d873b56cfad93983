//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "upa",
    about = "Urban transport performance analytics",
    version
)]
pub struct Cli {
    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract an urban centre from a population raster
    UrbanCentre {
        /// Input population raster (GeoTIFF, ~1 km cells)
        raster: PathBuf,
        /// Window as min_x,min_y,max_x,max_y in the raster CRS
        #[arg(long)]
        bbox: String,
        /// Seed point as lat,lon (EPSG:4326) selecting the cluster
        #[arg(long)]
        centre: String,
        /// Per-cell population threshold
        #[arg(long, default_value_t = 1500.0)]
        cell_pop_threshold: f64,
        /// Consider diagonal neighbours adjacent when clustering
        #[arg(long)]
        diag: bool,
        /// Cluster total-population threshold
        #[arg(long, default_value_t = 50_000.0)]
        cluster_pop_threshold: f64,
        /// Gap-fill neighbourhood threshold (5..=8)
        #[arg(long, default_value_t = 5)]
        cell_fill_threshold: u8,
        /// Buffer radius in raster CRS units
        #[arg(long, default_value_t = 10_000.0)]
        buffer_size: f64,
        /// Output artifact file (.parquet)
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Condition a population raster into cell and centroid tables
    Population {
        /// Input population raster (GeoTIFF, fine resolution)
        raster: PathBuf,
        /// Urban-centre artifact supplying the AOI (buffer polygon)
        #[arg(long)]
        urban_centre: PathBuf,
        /// Round populations to whole people (half-to-even)
        #[arg(long)]
        round: bool,
        /// Drop cells strictly below this population
        #[arg(long)]
        threshold: Option<f64>,
        /// Population variable name
        #[arg(long, default_value = "population")]
        var_name: String,
        /// Output population table (.parquet)
        #[arg(long)]
        output_population: PathBuf,
        /// Output centroid table (.parquet)
        #[arg(long)]
        output_centroids: PathBuf,
    },

    /// Compute transport performance from a travel-time matrix
    Performance {
        /// Travel-time Parquet file or directory of them
        travel_times: PathBuf,
        /// Population table from `population`
        #[arg(long)]
        population: PathBuf,
        /// Centroid table from `population`
        #[arg(long)]
        centroids: PathBuf,
        /// Travel-time threshold, minutes
        #[arg(long, default_value_t = 45)]
        travel_time_threshold: i64,
        /// Straight-line distance threshold, km
        #[arg(long, default_value_t = 11.25)]
        distance_threshold: f64,
        /// Urban-centre artifact for the summary statistics
        #[arg(long)]
        urban_centre: Option<PathBuf>,
        /// Urban centre name for the summary
        #[arg(long)]
        name: Option<String>,
        /// Urban centre country for the summary
        #[arg(long)]
        country: Option<String>,
        /// Optional output for the per-destination table (.parquet)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Merge raster tiles in a directory into one file
    Merge {
        /// Directory of input .tif tiles
        input_dir: PathBuf,
        /// Merged output raster
        #[arg(long, short)]
        output: PathBuf,
        /// Only merge files whose name matches this regex
        #[arg(long)]
        subset_regex: Option<String>,
    },

    /// Resample a raster to a coarser grid by summing cells
    Resample {
        /// Input raster
        input: PathBuf,
        /// Resampled output raster
        #[arg(long, short)]
        output: PathBuf,
        /// Integer resampling factor
        #[arg(long, default_value_t = 2)]
        factor: usize,
    },
}
