//! Urban-centre extraction from a gridded population raster.
//!
//! Follows the Eurostat urban-centre definition: threshold the raster at a
//! per-cell population, cluster the surviving cells by adjacency, drop
//! clusters under a total-population floor, knit small gaps with a 3×3 mode
//! filter iterated to a fixed point, pick the cluster containing a seed
//! point, vectorise it, and derive its buffer and bounding box.
//!
//! The kernels are plain array code: a boolean
//! threshold mask, two-pass union-find connected components, per-label
//! population sums, and the mode-filter stencil. The fill step terminates
//! because cells only ever leave label 0, a monotone move on a finite
//! lattice.

use std::collections::BTreeMap;

use geo::{LineString, Polygon, Rect};
use ndarray::Array2;
use tracing::warn;

use upa_core::error::{Error, Result};
use upa_core::geometry::{buffer_polygon, envelope, DEFAULT_BUFFER_SEGMENTS};
use upa_core::{transform_point, Crs, RasterGrid, UrbanCentreArtifact};

/// Extraction parameters with the Eurostat defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct UrbanCentreParams {
    /// A cell is flagged when population ≥ this (people per cell).
    pub cell_pop_threshold: f64,
    /// Treat diagonals as adjacent when clustering.
    pub diag: bool,
    /// A cluster survives when its summed population ≥ this.
    pub cluster_pop_threshold: f64,
    /// Cells in a 3×3 neighbourhood that must share a label for an empty
    /// cell to be filled. Accepted range 5..=8.
    pub cell_fill_threshold: u8,
    /// Buffer radius around the vectorised cluster, in raster CRS units.
    pub buffer_size: f64,
}

impl Default for UrbanCentreParams {
    fn default() -> Self {
        UrbanCentreParams {
            cell_pop_threshold: 1500.0,
            diag: false,
            cluster_pop_threshold: 50_000.0,
            cell_fill_threshold: 5,
            buffer_size: 10_000.0,
        }
    }
}

/// Run the full extraction over `raster`, windowed to `bbox`.
///
/// `seed` is (lat, lon) in `seed_crs` (typically EPSG:4326); it selects
/// which cluster becomes the urban centre. The returned polygons are in the
/// raster's CRS.
pub fn extract_urban_centre(
    raster: &RasterGrid,
    bbox: &Rect<f64>,
    bbox_crs: &Crs,
    seed: (f64, f64),
    seed_crs: &Crs,
    params: &UrbanCentreParams,
) -> Result<UrbanCentreArtifact> {
    if !(5..=8).contains(&params.cell_fill_threshold) {
        return Err(Error::invalid_parameter(
            "cell_fill_threshold",
            format!(
                "expected a value between 5 and 8, got {}",
                params.cell_fill_threshold
            ),
        ));
    }
    if params.buffer_size <= 0.0 {
        return Err(Error::invalid_parameter(
            "buffer_size",
            format!("expected positive non-zero value, got {}", params.buffer_size),
        ));
    }

    let window = raster.window(bbox, bbox_crs)?;
    let flags = flag_cells(&window, params.cell_pop_threshold)?;
    let (clusters, num_clusters) = cluster_cells(&flags, params.diag);
    let filtered = check_cluster_pop(&window, clusters, num_clusters, params.cluster_pop_threshold)?;
    let filled = fill_gaps(filtered, params.cell_fill_threshold);

    let (row, col) = seed_cell(&window, seed, seed_crs)?;
    let label = filled[[row, col]];
    if label == 0 {
        return Err(Error::SeedUnassigned { row, col });
    }

    let mask = filled.map(|&l| l == label);
    let vectorized_uc = vectorize_mask(&mask, &window)?;

    if !window.crs.is_equal_area() {
        warn!(
            crs = %window.crs,
            "buffering in a non-equal-area CRS; distances will be distorted"
        );
    }
    let buffer = buffer_polygon(&vectorized_uc, params.buffer_size, DEFAULT_BUFFER_SEGMENTS)?;
    let bbox = envelope(&buffer);

    Ok(UrbanCentreArtifact {
        vectorized_uc,
        buffer,
        bbox,
        crs: window.crs.clone(),
    })
}

/// Boolean mask of cells at or above the population threshold.
fn flag_cells(window: &RasterGrid, threshold: f64) -> Result<Array2<bool>> {
    let mut any = false;
    let flags = Array2::from_shape_fn(window.data.dim(), |(r, c)| {
        let hit = window.value(r, c).map(|v| v >= threshold).unwrap_or(false);
        any |= hit;
        hit
    });
    if !any {
        return Err(Error::ThresholdRejectsAll {
            param: "cell_pop_threshold",
            value: threshold,
        });
    }
    Ok(flags)
}

/// Label connected components of the mask. 4-neighbour by default,
/// 8-neighbour when `diag`. Labels are 1..=n in scan order.
fn cluster_cells(flags: &Array2<bool>, diag: bool) -> (Array2<u32>, u32) {
    let (rows, cols) = flags.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut parent: Vec<u32> = vec![0];

    fn find(parent: &mut Vec<u32>, mut x: u32) -> u32 {
        while parent[x as usize] != x {
            parent[x as usize] = parent[parent[x as usize] as usize];
            x = parent[x as usize];
        }
        x
    }

    for r in 0..rows {
        for c in 0..cols {
            if !flags[[r, c]] {
                continue;
            }
            // Previously visited neighbours under the chosen connectivity.
            let mut neighbours = [0u32; 4];
            let mut count = 0;
            if r > 0 && labels[[r - 1, c]] != 0 {
                neighbours[count] = labels[[r - 1, c]];
                count += 1;
            }
            if c > 0 && labels[[r, c - 1]] != 0 {
                neighbours[count] = labels[[r, c - 1]];
                count += 1;
            }
            if diag {
                if r > 0 && c > 0 && labels[[r - 1, c - 1]] != 0 {
                    neighbours[count] = labels[[r - 1, c - 1]];
                    count += 1;
                }
                if r > 0 && c + 1 < cols && labels[[r - 1, c + 1]] != 0 {
                    neighbours[count] = labels[[r - 1, c + 1]];
                    count += 1;
                }
            }

            if count == 0 {
                let label = parent.len() as u32;
                parent.push(label);
                labels[[r, c]] = label;
            } else {
                let mut root = find(&mut parent, neighbours[0]);
                for &n in &neighbours[1..count] {
                    let other = find(&mut parent, n);
                    if other != root {
                        // union by smaller root to keep scan-order numbering
                        if other < root {
                            parent[root as usize] = other;
                            root = other;
                        } else {
                            parent[other as usize] = root;
                        }
                    }
                }
                labels[[r, c]] = root;
            }
        }
    }

    // Second pass: path-compress and renumber 1..=n in first-seen order.
    let mut remap: Vec<u32> = vec![0; parent.len()];
    let mut next = 0u32;
    for label in labels.iter_mut() {
        if *label == 0 {
            continue;
        }
        let root = find(&mut parent, *label);
        if remap[root as usize] == 0 {
            next += 1;
            remap[root as usize] = next;
        }
        *label = remap[root as usize];
    }
    (labels, next)
}

/// Zero out clusters whose summed population is below the threshold.
fn check_cluster_pop(
    window: &RasterGrid,
    mut labels: Array2<u32>,
    num_clusters: u32,
    threshold: f64,
) -> Result<Array2<u32>> {
    let mut sums = vec![0.0f64; num_clusters as usize + 1];
    for ((r, c), &label) in labels.indexed_iter() {
        if label != 0 {
            if let Some(v) = window.value(r, c) {
                sums[label as usize] += v;
            }
        }
    }

    let mut survivors = 0;
    for label in labels.iter_mut() {
        if *label != 0 {
            if sums[*label as usize] < threshold {
                *label = 0;
            } else {
                survivors += 1;
            }
        }
    }
    if survivors == 0 {
        return Err(Error::ThresholdRejectsAll {
            param: "cluster_pop_threshold",
            value: threshold,
        });
    }
    Ok(labels)
}

/// One pass of the 3×3 mode filter: an unassigned cell takes the
/// neighbourhood mode when the mode's count reaches the threshold. Edges
/// wrap with zeros; the centre cell participates in its own window.
fn fill_pass(labels: &Array2<u32>, threshold: u8) -> Array2<u32> {
    let (rows, cols) = labels.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let centre = labels[[r, c]];
        if centre != 0 {
            return centre;
        }
        // Gather the 3x3 window in row-major order, zero-padded.
        let mut values = [0u32; 9];
        let mut i = 0;
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                let rr = r as i64 + dr;
                let cc = c as i64 + dc;
                values[i] = if rr >= 0 && cc >= 0 && (rr as usize) < rows && (cc as usize) < cols {
                    labels[[rr as usize, cc as usize]]
                } else {
                    0
                };
                i += 1;
            }
        }
        // Mode with ties broken by first appearance, like a scan-order
        // counter over the flattened window.
        let mut best = values[0];
        let mut best_count = 0u8;
        for (i, &v) in values.iter().enumerate() {
            if values[..i].contains(&v) {
                continue;
            }
            let count = values.iter().filter(|&&x| x == v).count() as u8;
            if count > best_count {
                best = v;
                best_count = count;
            }
        }
        if best_count >= threshold {
            best
        } else {
            centre
        }
    })
}

/// Iterate the mode filter to a fixed point.
fn fill_gaps(mut labels: Array2<u32>, threshold: u8) -> Array2<u32> {
    loop {
        let next = fill_pass(&labels, threshold);
        if next == labels {
            return labels;
        }
        labels = next;
    }
}

/// Transform the seed into the window and return its cell indices.
fn seed_cell(window: &RasterGrid, seed: (f64, f64), seed_crs: &Crs) -> Result<(usize, usize)> {
    let (lat, lon) = seed;
    let (x, y) = transform_point(seed_crs, &window.crs, lon, lat)?;
    let (row, col) = window.transform.rowcol(x, y);
    if row < 0 || col < 0 || row as usize >= window.rows() || col as usize >= window.cols() {
        return Err(Error::SeedOutsideWindow { row, col });
    }
    Ok((row as usize, col as usize))
}

/// Trace the boundary of a cell mask into a polygon.
///
/// Boundary edges are collected per cell and stitched into rings on the
/// integer vertex lattice. With the clockwise-per-cell edge convention,
/// shells come out with positive shoelace area in grid coordinates and
/// holes negative. A diagonal pinch (possible under 8-connectivity) yields
/// several shells; they are unioned and the largest piece kept.
fn vectorize_mask(mask: &Array2<bool>, window: &RasterGrid) -> Result<Polygon<f64>> {
    let (rows, cols) = mask.dim();
    let at = |r: i64, c: i64| -> bool {
        r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols && mask[[r as usize, c as usize]]
    };

    // Directed boundary edges, keyed by start vertex (col, row).
    let mut edges: BTreeMap<(i64, i64), Vec<(i64, i64)>> = BTreeMap::new();
    let mut push = |from: (i64, i64), to: (i64, i64)| {
        edges.entry(from).or_default().push(to);
    };
    for r in 0..rows as i64 {
        for c in 0..cols as i64 {
            if !at(r, c) {
                continue;
            }
            if !at(r - 1, c) {
                push((c, r), (c + 1, r));
            }
            if !at(r, c + 1) {
                push((c + 1, r), (c + 1, r + 1));
            }
            if !at(r + 1, c) {
                push((c + 1, r + 1), (c, r + 1));
            }
            if !at(r, c - 1) {
                push((c, r + 1), (c, r));
            }
        }
    }
    for ends in edges.values_mut() {
        ends.sort();
    }

    let mut rings: Vec<Vec<(i64, i64)>> = Vec::new();
    while let Some((&start, _)) = edges.iter().find(|(_, ends)| !ends.is_empty()) {
        let mut ring = vec![start];
        let mut current = start;
        let mut incoming = (0i64, 0i64);
        loop {
            let ends = edges.get_mut(&current).expect("open ring while tracing mask");
            // At pinch vertices prefer the tightest clockwise turn, which
            // keeps each lobe on its own ring.
            let pick = if ends.len() == 1 {
                0
            } else {
                let mut best = 0;
                let mut best_cross = i64::MIN;
                for (i, &(ex, ey)) in ends.iter().enumerate() {
                    let dir = (ex - current.0, ey - current.1);
                    let cross = incoming.0 * dir.1 - incoming.1 * dir.0;
                    if cross > best_cross {
                        best_cross = cross;
                        best = i;
                    }
                }
                best
            };
            let next = ends.remove(pick);
            incoming = (next.0 - current.0, next.1 - current.1);
            current = next;
            ring.push(current);
            if current == start {
                break;
            }
        }
        edges.retain(|_, ends| !ends.is_empty());
        rings.push(ring);
    }

    if rings.is_empty() {
        return Err(Error::EmptyWindow);
    }

    // Shoelace in grid coordinates; positive = shell, negative = hole.
    let grid_area = |ring: &[(i64, i64)]| -> i64 {
        ring.windows(2)
            .map(|w| w[0].0 * w[1].1 - w[1].0 * w[0].1)
            .sum()
    };
    let to_world = |ring: &[(i64, i64)]| -> LineString<f64> {
        let t = &window.transform;
        LineString::from(
            ring.iter()
                .map(|&(c, r)| {
                    (
                        t.x_origin + c as f64 * t.x_size,
                        t.y_origin + r as f64 * t.y_size,
                    )
                })
                .collect::<Vec<_>>(),
        )
    };

    // Conventional winding: counter-clockwise shells, clockwise holes.
    let world_signed = |ls: &LineString<f64>| -> f64 {
        ls.0.windows(2)
            .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
            .sum::<f64>()
            / 2.0
    };
    let oriented = |mut ls: LineString<f64>, ccw: bool| -> LineString<f64> {
        if (world_signed(&ls) > 0.0) != ccw {
            ls.0.reverse();
        }
        ls
    };

    let mut shells: Vec<(i64, LineString<f64>)> = Vec::new();
    let mut holes: Vec<LineString<f64>> = Vec::new();
    for ring in &rings {
        let area = grid_area(ring);
        if area > 0 {
            shells.push((area, oriented(to_world(ring), true)));
        } else {
            holes.push(oriented(to_world(ring), false));
        }
    }
    shells.sort_by_key(|(area, _)| std::cmp::Reverse(*area));

    let (_, exterior) = shells.swap_remove(0);
    let polygon = Polygon::new(exterior, holes);
    if shells.is_empty() {
        Ok(polygon)
    } else {
        // Diagonal pinch: union the secondary lobes in.
        use geo::BooleanOps;
        let mut merged = geo::MultiPolygon::new(vec![polygon]);
        for (_, shell) in shells {
            merged = merged.union(&geo::MultiPolygon::new(vec![Polygon::new(shell, vec![])]));
        }
        Ok(upa_core::largest_polygon(merged))
    }
}
