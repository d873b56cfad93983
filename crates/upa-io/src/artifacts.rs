//! Parquet persistence for the geo artifacts that outlive a run.
//!
//! Three tables: the urban-centre geometry (labelled polygons), the
//! population table (cell polygons + values) and the centroid table.
//! Geometry is WKB in a binary column; the CRS rides in the Parquet schema
//! key/value metadata so a re-read restores the exact in-memory type. A
//! file appears only if its whole content was produced successfully.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BinaryArray, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType as ArrowType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use geo::{Geometry, Point, Polygon};
use geozero::wkb::Wkb;
use geozero::{CoordDimensions, ToGeo, ToWkb};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use polars::prelude::{DataFrame, NamedFrom, Series};

use upa_core::error::{Error, Result};
use upa_core::{CentroidTable, Crs, PopulationTable, UrbanCentreArtifact, URBAN_CENTRE_LABELS};

const CRS_KEY: &str = "crs";
const ENCODING_KEY: &str = "geometry_encoding";
const WKB_ENCODING: &str = "WKB";

fn columnar_err(e: impl std::fmt::Display) -> Error {
    Error::Columnar(e.to_string())
}

fn polygon_to_wkb(polygon: &Polygon<f64>) -> Result<Vec<u8>> {
    Geometry::Polygon(polygon.clone())
        .to_wkb(CoordDimensions::xy())
        .map_err(|e| Error::Geometry(e.to_string()))
}

fn point_to_wkb(point: &Point<f64>) -> Result<Vec<u8>> {
    Geometry::Point(*point)
        .to_wkb(CoordDimensions::xy())
        .map_err(|e| Error::Geometry(e.to_string()))
}

fn wkb_to_polygon(bytes: &[u8]) -> Result<Polygon<f64>> {
    match Wkb(bytes.to_vec())
        .to_geo()
        .map_err(|e| Error::Geometry(e.to_string()))?
    {
        Geometry::Polygon(p) => Ok(p),
        other => Err(Error::Geometry(format!(
            "expected a polygon, decoded {other:?}"
        ))),
    }
}

fn wkb_to_point(bytes: &[u8]) -> Result<Point<f64>> {
    match Wkb(bytes.to_vec())
        .to_geo()
        .map_err(|e| Error::Geometry(e.to_string()))?
    {
        Geometry::Point(p) => Ok(p),
        other => Err(Error::Geometry(format!(
            "expected a point, decoded {other:?}"
        ))),
    }
}

fn geo_metadata(crs: &Crs) -> HashMap<String, String> {
    HashMap::from([
        (CRS_KEY.to_string(), crs.code().to_string()),
        (ENCODING_KEY.to_string(), WKB_ENCODING.to_string()),
    ])
}

/// Write a single record batch through a temp file so the target appears
/// atomically.
fn write_batch_file(path: &Path, schema: SchemaRef, columns: Vec<ArrayRef>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let batch = RecordBatch::try_new(schema.clone(), columns).map_err(columnar_err)?;
    let tmp = path.with_extension("parquet.tmp");
    {
        let file = File::create(&tmp)?;
        let mut writer = ArrowWriter::try_new(file, schema, None).map_err(columnar_err)?;
        writer.write(&batch).map_err(columnar_err)?;
        writer.close().map_err(columnar_err)?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a Parquet file into one record batch plus the stored CRS.
fn read_batch_file(path: &Path) -> Result<(RecordBatch, Crs)> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::InputNotFound {
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(e)
        }
    })?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(columnar_err)?;
    let schema = builder.schema().clone();
    let crs_code = schema
        .metadata()
        .get(CRS_KEY)
        .cloned()
        .ok_or_else(|| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: "missing 'crs' metadata".to_string(),
        })?;
    let reader = builder.build().map_err(columnar_err)?;
    let batches: Vec<RecordBatch> = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(columnar_err)?;
    let batch = concat_batches(&schema, batches.iter()).map_err(columnar_err)?;
    Ok((batch, Crs::new(&crs_code)))
}

fn binary_column<'a>(batch: &'a RecordBatch, name: &str, path: &Path) -> Result<&'a BinaryArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<BinaryArray>())
        .ok_or_else(|| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: format!("missing binary column '{name}'"),
        })
}

// ---------------------------------------------------------------------------
// Urban-centre artifact
// ---------------------------------------------------------------------------

/// Persist the three labelled urban-centre polygons.
pub fn write_urban_centre(artifact: &UrbanCentreArtifact, path: &Path) -> Result<()> {
    let schema = Arc::new(
        Schema::new(vec![
            Field::new("label", ArrowType::Utf8, false),
            Field::new("geometry", ArrowType::Binary, false),
        ])
        .with_metadata(geo_metadata(&artifact.crs)),
    );

    let labels: Vec<&str> = artifact.labelled().iter().map(|(l, _)| *l).collect();
    let wkbs = artifact
        .labelled()
        .iter()
        .map(|(_, p)| polygon_to_wkb(p))
        .collect::<Result<Vec<_>>>()?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(labels)),
        Arc::new(BinaryArray::from_vec(
            wkbs.iter().map(|b| b.as_slice()).collect(),
        )),
    ];
    write_batch_file(path, schema, columns)
}

/// Read back an urban-centre artifact written by [`write_urban_centre`].
pub fn read_urban_centre(path: &Path) -> Result<UrbanCentreArtifact> {
    let (batch, crs) = read_batch_file(path)?;
    let labels = batch
        .column_by_name("label")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: "missing string column 'label'".to_string(),
        })?;
    let geometry = binary_column(&batch, "geometry", path)?;

    let mut polygons: HashMap<String, Polygon<f64>> = HashMap::new();
    for i in 0..batch.num_rows() {
        polygons.insert(labels.value(i).to_string(), wkb_to_polygon(geometry.value(i))?);
    }
    let mut take = |label: &str| -> Result<Polygon<f64>> {
        polygons.remove(label).ok_or_else(|| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: format!("missing '{label}' row"),
        })
    };
    Ok(UrbanCentreArtifact {
        vectorized_uc: take(URBAN_CENTRE_LABELS[0])?,
        buffer: take(URBAN_CENTRE_LABELS[1])?,
        bbox: take(URBAN_CENTRE_LABELS[2])?,
        crs,
    })
}

// ---------------------------------------------------------------------------
// Population table
// ---------------------------------------------------------------------------

/// Persist a population table: `id`, the population variable (f64 or i64
/// depending on the conditioning), WKB cell geometry and the urban-centre
/// flag.
pub fn write_population(table: &PopulationTable, path: &Path) -> Result<()> {
    table.validate()?;
    let ids = int_column(&table.df, "id")?;
    let flags = bool_column(&table.df, "within_urban_centre")?;

    let var = table.df.column(&table.var_name)?;
    let (var_field, var_array): (Field, ArrayRef) = match var.dtype() {
        polars::prelude::DataType::Int64 => {
            let values: Vec<i64> = var.i64()?.into_no_null_iter().collect();
            (
                Field::new(&table.var_name, ArrowType::Int64, false),
                Arc::new(Int64Array::from(values)),
            )
        }
        _ => {
            let values: Vec<f64> = var.f64()?.into_no_null_iter().collect();
            (
                Field::new(&table.var_name, ArrowType::Float64, false),
                Arc::new(Float64Array::from(values)),
            )
        }
    };

    let wkbs = table
        .geometry
        .iter()
        .map(polygon_to_wkb)
        .collect::<Result<Vec<_>>>()?;

    let schema = Arc::new(
        Schema::new(vec![
            Field::new("id", ArrowType::Int64, false),
            var_field,
            Field::new("geometry", ArrowType::Binary, false),
            Field::new("within_urban_centre", ArrowType::Boolean, false),
        ])
        .with_metadata(geo_metadata(&table.crs)),
    );
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)),
        var_array,
        Arc::new(BinaryArray::from_vec(
            wkbs.iter().map(|b| b.as_slice()).collect(),
        )),
        Arc::new(BooleanArray::from(flags)),
    ];
    write_batch_file(path, schema, columns)
}

/// Read back a population table written by [`write_population`].
pub fn read_population(path: &Path) -> Result<PopulationTable> {
    let (batch, crs) = read_batch_file(path)?;
    let var_name = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .find(|n| !matches!(n.as_str(), "id" | "geometry" | "within_urban_centre"))
        .ok_or_else(|| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: "no population variable column".to_string(),
        })?;

    let ids = read_i64(&batch, "id", path)?;
    let flags = read_bool(&batch, "within_urban_centre", path)?;
    let geometry_col = binary_column(&batch, "geometry", path)?;
    let mut geometry = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        geometry.push(wkb_to_polygon(geometry_col.value(i))?);
    }

    let var_series = match batch
        .column_by_name(&var_name)
        .map(|c| c.data_type().clone())
    {
        Some(ArrowType::Int64) => {
            let values = read_i64(&batch, &var_name, path)?;
            Series::new(&var_name, values)
        }
        Some(ArrowType::Float64) => {
            let values = read_f64(&batch, &var_name, path)?;
            Series::new(&var_name, values)
        }
        other => {
            return Err(Error::FormatMismatch {
                path: path.to_path_buf(),
                reason: format!("unsupported population dtype {other:?}"),
            })
        }
    };

    let df = DataFrame::new(vec![
        Series::new("id", ids),
        var_series,
        Series::new("within_urban_centre", flags),
    ])?;
    Ok(PopulationTable {
        df,
        geometry,
        var_name,
        crs,
    })
}

// ---------------------------------------------------------------------------
// Centroid table
// ---------------------------------------------------------------------------

/// Persist a centroid table: `id`, WKB point centroid and the urban-centre
/// flag. The CRS metadata records the geographic CRS the points are in.
pub fn write_centroids(table: &CentroidTable, path: &Path) -> Result<()> {
    let ids = int_column(&table.df, "id")?;
    let flags = bool_column(&table.df, "within_urban_centre")?;
    let wkbs = table
        .points
        .iter()
        .map(point_to_wkb)
        .collect::<Result<Vec<_>>>()?;

    let schema = Arc::new(
        Schema::new(vec![
            Field::new("id", ArrowType::Int64, false),
            Field::new("centroid", ArrowType::Binary, false),
            Field::new("within_urban_centre", ArrowType::Boolean, false),
        ])
        .with_metadata(geo_metadata(&table.crs)),
    );
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)),
        Arc::new(BinaryArray::from_vec(
            wkbs.iter().map(|b| b.as_slice()).collect(),
        )),
        Arc::new(BooleanArray::from(flags)),
    ];
    write_batch_file(path, schema, columns)
}

/// Read back a centroid table written by [`write_centroids`].
pub fn read_centroids(path: &Path) -> Result<CentroidTable> {
    let (batch, crs) = read_batch_file(path)?;
    let ids = read_i64(&batch, "id", path)?;
    let flags = read_bool(&batch, "within_urban_centre", path)?;
    let centroid_col = binary_column(&batch, "centroid", path)?;

    let mut points = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        points.push(wkb_to_point(centroid_col.value(i))?);
    }
    let xs: Vec<f64> = points.iter().map(|p| p.x()).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.y()).collect();

    let df = DataFrame::new(vec![
        Series::new("id", ids),
        Series::new("centroid_x", xs),
        Series::new("centroid_y", ys),
        Series::new("within_urban_centre", flags),
    ])?;
    Ok(CentroidTable { df, points, crs })
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

fn int_column(df: &DataFrame, name: &str) -> Result<Vec<i64>> {
    Ok(df.column(name)?.i64()?.into_no_null_iter().collect())
}

fn bool_column(df: &DataFrame, name: &str) -> Result<Vec<bool>> {
    Ok(df.column(name)?.bool()?.into_no_null_iter().collect())
}

fn read_i64(batch: &RecordBatch, name: &str, path: &Path) -> Result<Vec<i64>> {
    let array = batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: format!("missing int64 column '{name}'"),
        })?;
    Ok(array.values().to_vec())
}

fn read_f64(batch: &RecordBatch, name: &str, path: &Path) -> Result<Vec<f64>> {
    let array = batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
        .ok_or_else(|| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: format!("missing float64 column '{name}'"),
        })?;
    Ok(array.values().to_vec())
}

fn read_bool(batch: &RecordBatch, name: &str, path: &Path) -> Result<Vec<bool>> {
    let array = batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
        .ok_or_else(|| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: format!("missing boolean column '{name}'"),
        })?;
    Ok((0..array.len()).map(|i| array.value(i)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 - size),
            (x: x0, y: y0 - size),
        ]
    }

    fn sample_artifact() -> UrbanCentreArtifact {
        UrbanCentreArtifact {
            vectorized_uc: square(0.0, 0.0, 1000.0),
            buffer: square(-100.0, 100.0, 1200.0),
            bbox: square(-100.0, 100.0, 1200.0),
            crs: Crs::mollweide(),
        }
    }

    #[test]
    fn urban_centre_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uc.parquet");
        let artifact = sample_artifact();
        write_urban_centre(&artifact, &path).unwrap();

        let back = read_urban_centre(&path).unwrap();
        assert_eq!(back.crs, artifact.crs);
        assert_eq!(back.vectorized_uc, artifact.vectorized_uc);
        assert_eq!(back.buffer, artifact.buffer);
        assert_eq!(back.bbox, artifact.bbox);
    }

    #[test]
    fn population_round_trip_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pop.parquet");
        let df = DataFrame::new(vec![
            Series::new("id", vec![0i64, 1, 2]),
            Series::new("population", vec![10.5f64, 0.25, 3.0]),
            Series::new("within_urban_centre", vec![true, false, true]),
        ])
        .unwrap();
        let table = PopulationTable {
            df,
            geometry: vec![
                square(0.0, 0.0, 100.0),
                square(100.0, 0.0, 100.0),
                square(200.0, 0.0, 100.0),
            ],
            var_name: "population".to_string(),
            crs: Crs::mollweide(),
        };
        write_population(&table, &path).unwrap();
        let back = read_population(&path).unwrap();

        assert_eq!(back.var_name, "population");
        assert_eq!(back.crs, table.crs);
        assert!(back.df.frame_equal(&table.df));
        assert_eq!(back.geometry, table.geometry);
    }

    #[test]
    fn rounded_population_keeps_integer_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pop.parquet");
        let df = DataFrame::new(vec![
            Series::new("id", vec![0i64, 1]),
            Series::new("population", vec![10i64, 3]),
            Series::new("within_urban_centre", vec![false, false]),
        ])
        .unwrap();
        let table = PopulationTable {
            df,
            geometry: vec![square(0.0, 0.0, 100.0), square(100.0, 0.0, 100.0)],
            var_name: "population".to_string(),
            crs: Crs::mollweide(),
        };
        write_population(&table, &path).unwrap();
        let back = read_population(&path).unwrap();
        assert_eq!(
            back.df.column("population").unwrap().dtype(),
            &polars::prelude::DataType::Int64
        );
    }

    #[test]
    fn centroid_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("centroids.parquet");
        let points = vec![Point::new(-2.9997, 51.5886), Point::new(-2.9967, 51.5879)];
        let df = DataFrame::new(vec![
            Series::new("id", vec![0i64, 1]),
            Series::new("centroid_x", points.iter().map(|p| p.x()).collect::<Vec<_>>()),
            Series::new("centroid_y", points.iter().map(|p| p.y()).collect::<Vec<_>>()),
            Series::new("within_urban_centre", vec![true, false]),
        ])
        .unwrap();
        let table = CentroidTable {
            df,
            points,
            crs: Crs::wgs84(),
        };
        write_centroids(&table, &path).unwrap();
        let back = read_centroids(&path).unwrap();
        assert_eq!(back.crs, Crs::wgs84());
        assert_eq!(back.points, table.points);
        assert!(back.df.frame_equal(&table.df));
    }

    #[test]
    fn reading_missing_artifact_is_input_not_found() {
        let err = read_urban_centre(Path::new("/no/such/uc.parquet")).unwrap_err();
        assert!(matches!(err, Error::InputNotFound { .. }));
    }
}
