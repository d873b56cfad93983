//! Coordinate reference system handling.
//!
//! Exactly three CRSs cross the pipeline: the population raster's projected
//! equal-area CRS (ESRI:54009, World Mollweide for GHS-style inputs), the
//! geographic CRS the routing engine speaks (EPSG:4326), and the equal-area
//! CRS used for area statistics (ESRI:54009 again, fixed). Every conversion
//! is explicit; there is no default CRS and no silent reprojection.
//!
//! The Mollweide forward/inverse here follows the standard spherical
//! equations with the sphere radius taken from the ellipsoid semi-major axis
//! (R = 6 378 137 m), matching `+proj=moll +a=6378137`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MOLLWEIDE_RADIUS: f64 = 6_378_137.0;

/// Linear or angular unit of a CRS axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsUnit {
    Metre,
    Degree,
}

impl CrsUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrsUnit::Metre => "metre",
            CrsUnit::Degree => "degree",
        }
    }
}

/// A coordinate reference system identified by its authority code.
///
/// Codes are normalised on construction, so `"ESRI: 54009"`, `"esri:54009"`
/// and `"ESRI:54009"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs(String);

impl Crs {
    pub fn new(code: &str) -> Self {
        let normalised: String = code
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        Crs(normalised)
    }

    /// EPSG:4326, geographic lon/lat on WGS84. The routing engine's CRS.
    pub fn wgs84() -> Self {
        Crs("EPSG:4326".to_string())
    }

    /// ESRI:54009, World Mollweide. The GHS population raster CRS and the
    /// equal-area CRS used for area statistics.
    pub fn mollweide() -> Self {
        Crs("ESRI:54009".to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Axis unit for the supported codes. Unknown projected codes are
    /// assumed metric; geographic codes must be listed explicitly.
    pub fn unit(&self) -> CrsUnit {
        match self.0.as_str() {
            "EPSG:4326" | "EPSG:4258" => CrsUnit::Degree,
            _ => CrsUnit::Metre,
        }
    }

    pub fn is_metric(&self) -> bool {
        self.unit() == CrsUnit::Metre
    }

    /// Whether this CRS preserves areas. Only World Mollweide qualifies out
    /// of the codes the pipeline knows about.
    pub fn is_equal_area(&self) -> bool {
        self.0 == "ESRI:54009"
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transform a point between two supported CRSs.
///
/// Coordinates are (x, y): (lon, lat) degrees for EPSG:4326, metres for
/// ESRI:54009. Identity when the CRSs match; any pair outside
/// {EPSG:4326, ESRI:54009} fails with [`Error::CrsMismatch`].
pub fn transform_point(from: &Crs, to: &Crs, x: f64, y: f64) -> Result<(f64, f64)> {
    if from == to {
        return Ok((x, y));
    }
    match (from.code(), to.code()) {
        ("EPSG:4326", "ESRI:54009") => Ok(mollweide_forward(x, y)),
        ("ESRI:54009", "EPSG:4326") => Ok(mollweide_inverse(x, y)),
        _ => Err(Error::CrsMismatch {
            expected: to.code().to_string(),
            found: from.code().to_string(),
        }),
    }
}

/// Transform every vertex of a polygon between two supported CRSs.
pub fn transform_polygon(
    from: &Crs,
    to: &Crs,
    polygon: &geo::Polygon<f64>,
) -> Result<geo::Polygon<f64>> {
    if from == to {
        return Ok(polygon.clone());
    }
    let transform_ring = |ring: &geo::LineString<f64>| -> Result<geo::LineString<f64>> {
        let coords = ring
            .0
            .iter()
            .map(|c| transform_point(from, to, c.x, c.y).map(|(x, y)| geo::Coord { x, y }))
            .collect::<Result<Vec<_>>>()?;
        Ok(geo::LineString::new(coords))
    };
    let exterior = transform_ring(polygon.exterior())?;
    let interiors = polygon
        .interiors()
        .iter()
        .map(transform_ring)
        .collect::<Result<Vec<_>>>()?;
    Ok(geo::Polygon::new(exterior, interiors))
}

/// Spherical Mollweide forward projection: (lon, lat) degrees -> metres.
fn mollweide_forward(lon: f64, lat: f64) -> (f64, f64) {
    let lambda = lon.to_radians();
    let phi = lat.to_radians();
    let theta = solve_theta(phi);
    let x = MOLLWEIDE_RADIUS * (2.0 * 2f64.sqrt() / std::f64::consts::PI) * lambda * theta.cos();
    let y = MOLLWEIDE_RADIUS * 2f64.sqrt() * theta.sin();
    (x, y)
}

/// Spherical Mollweide inverse projection: metres -> (lon, lat) degrees.
fn mollweide_inverse(x: f64, y: f64) -> (f64, f64) {
    let theta = (y / (MOLLWEIDE_RADIUS * 2f64.sqrt())).clamp(-1.0, 1.0).asin();
    let phi = ((2.0 * theta + (2.0 * theta).sin()) / std::f64::consts::PI)
        .clamp(-1.0, 1.0)
        .asin();
    let lambda = if theta.cos().abs() < f64::EPSILON {
        0.0
    } else {
        std::f64::consts::PI * x / (2.0 * 2f64.sqrt() * MOLLWEIDE_RADIUS * theta.cos())
    };
    (lambda.to_degrees(), phi.to_degrees())
}

/// Solve 2θ + sin 2θ = π sin φ by Newton iteration.
fn solve_theta(phi: f64) -> f64 {
    let target = std::f64::consts::PI * phi.sin();
    // At the poles the equation degenerates; θ = φ exactly.
    if (phi.abs() - std::f64::consts::FRAC_PI_2).abs() < 1e-12 {
        return phi;
    }
    let mut theta = phi;
    for _ in 0..50 {
        let f = 2.0 * theta + (2.0 * theta).sin() - target;
        let fp = 2.0 + 2.0 * (2.0 * theta).cos();
        if fp.abs() < 1e-15 {
            break;
        }
        let next = theta - f / fp;
        if (next - theta).abs() < 1e-13 {
            return next;
        }
        theta = next;
    }
    theta
}
