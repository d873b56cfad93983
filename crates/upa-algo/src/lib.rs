//! # upa-algo: the urban transport performance pipeline
//!
//! The four pipeline stages, leaves first:
//!
//! 1. [`urban_centre`]: detect and vectorise the contiguous high-density
//!    cluster containing a seed point, with its buffer and bounding box.
//! 2. [`population`]: clip a fine population raster to the buffered area,
//!    vectorise to per-cell records and routing-ready centroids.
//! 3. [`od`]: batch origin–destination submissions to an external routing
//!    engine and persist the travel-time matrix.
//! 4. [`metrics`]: join travel times with populations and centroids and
//!    compute per-destination transport performance plus summary stats.

pub mod metrics;
pub mod od;
pub mod population;
pub mod urban_centre;

pub use metrics::{
    performance_stats, transport_performance, PerformanceOptions, PerformanceStats,
    PerformanceTable, StatsOptions,
};
pub use od::{
    run_od_matrix, BatchRecord, OdBatchConfig, OdPoint, OdSummary, RoutingConfig, RoutingEngine,
    RoutingError, TransportMode, TravelTime,
};
pub use population::{condition_population, PopulationParams};
pub use urban_centre::{extract_urban_centre, UrbanCentreParams};
