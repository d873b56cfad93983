//! Polygon helpers: buffering, envelopes and disc construction.
//!
//! Buffering is a Minkowski sum of the filled polygon with a disc: the
//! polygon itself, a rectangle straddling every boundary edge, and a disc at
//! every vertex, all unioned. Boolean union carries the heavy lifting; the
//! disc is a regular polygon with a configurable segment count.

use geo::{BooleanOps, BoundingRect, Coord, LineString, MultiPolygon, Polygon, Rect};

use crate::error::{Error, Result};

/// Number of segments used to approximate a disc unless a caller overrides.
pub const DEFAULT_BUFFER_SEGMENTS: usize = 32;

/// Minkowski-sum buffer of `polygon` by `radius` (same units as the
/// polygon's CRS). Holes shrink and small holes are swallowed, as with any
/// positive offset. Fails on a non-positive radius.
pub fn buffer_polygon(polygon: &Polygon<f64>, radius: f64, segments: usize) -> Result<Polygon<f64>> {
    if radius <= 0.0 {
        return Err(Error::invalid_parameter(
            "buffer_size",
            format!("expected positive non-zero value, got {radius}"),
        ));
    }
    let segments = segments.max(8);

    let mut out = MultiPolygon::new(vec![polygon.clone()]);
    for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors().iter()) {
        let coords = &ring.0;
        for pair in coords.windows(2) {
            if let Some(rect) = edge_rectangle(pair[0], pair[1], radius) {
                out = out.union(&MultiPolygon::new(vec![rect]));
            }
        }
        // Last coordinate duplicates the first; skip the duplicate disc.
        for c in coords.iter().take(coords.len().saturating_sub(1)) {
            out = out.union(&MultiPolygon::new(vec![disc(*c, radius, segments)]));
        }
    }

    Ok(largest_polygon(out))
}

/// Rectangle of width 2r straddling the edge a->b. None for degenerate
/// (zero-length) edges.
fn edge_rectangle(a: Coord<f64>, b: Coord<f64>, radius: f64) -> Option<Polygon<f64>> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return None;
    }
    let nx = -dy / len * radius;
    let ny = dx / len * radius;
    Some(Polygon::new(
        LineString::from(vec![
            (a.x + nx, a.y + ny),
            (b.x + nx, b.y + ny),
            (b.x - nx, b.y - ny),
            (a.x - nx, a.y - ny),
            (a.x + nx, a.y + ny),
        ]),
        vec![],
    ))
}

/// Regular polygon approximating a disc of `radius` around `centre`.
pub fn disc(centre: Coord<f64>, radius: f64, segments: usize) -> Polygon<f64> {
    let mut coords = Vec::with_capacity(segments + 1);
    for i in 0..segments {
        let angle = 2.0 * std::f64::consts::PI * i as f64 / segments as f64;
        coords.push((
            centre.x + radius * angle.cos(),
            centre.y + radius * angle.sin(),
        ));
    }
    coords.push(coords[0]);
    Polygon::new(LineString::from(coords), vec![])
}

/// Largest polygon of a multi-polygon by unsigned area. A buffered
/// connected polygon always yields exactly one piece; this collapses any
/// numeric slivers from the union chain.
pub fn largest_polygon(mp: MultiPolygon<f64>) -> Polygon<f64> {
    use geo::Area;
    mp.0.into_iter()
        .max_by(|a, b| {
            a.unsigned_area()
                .partial_cmp(&b.unsigned_area())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or_else(|| Polygon::new(LineString::new(vec![]), vec![]))
}

/// Axis-aligned envelope of a polygon, as a polygon.
pub fn envelope(polygon: &Polygon<f64>) -> Polygon<f64> {
    match polygon.bounding_rect() {
        Some(rect) => rect_to_polygon(&rect),
        None => Polygon::new(LineString::new(vec![]), vec![]),
    }
}

pub fn rect_to_polygon(rect: &Rect<f64>) -> Polygon<f64> {
    let (min, max) = (rect.min(), rect.max());
    Polygon::new(
        LineString::from(vec![
            (min.x, min.y),
            (max.x, min.y),
            (max.x, max.y),
            (min.x, max.y),
            (min.x, min.y),
        ]),
        vec![],
    )
}
