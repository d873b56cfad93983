//! Travel-time store: one logical table over one-or-many Parquet files.
//!
//! The routing engine's outputs are append-only Parquet files with the
//! schema `{from_id: int, to_id: int, travel_time: int|null}`. A store
//! opened on a single file or on a directory of files presents the same
//! lazy frame; the aggregator never learns how the data was sharded.
//! Writes partition automatically so no single file exceeds the configured
//! in-memory size, and go through a temp-file rename so a file appears only
//! once its whole content was produced.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use polars::prelude::*;

use upa_core::error::{Error, Result};

/// Default partition bound: 200 MB measured on the in-memory frame.
pub const DEFAULT_PARTITION_BYTES: usize = 200_000_000;

/// Key under which a batch's files are named: the minimum origin id in the
/// batch, or `all` for the non-batched mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKey {
    All,
    MinOrigin(i64),
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKey::All => write!(f, "all"),
            BatchKey::MinOrigin(id) => write!(f, "{id}"),
        }
    }
}

/// Lazy reader over one travel-time file or a directory of them.
#[derive(Debug, Clone)]
pub struct TravelTimeStore {
    files: Vec<PathBuf>,
}

impl TravelTimeStore {
    /// Open a `.parquet` file or a directory containing them. Splits are
    /// discovered by directory enumeration, in name order.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.eq_ignore_ascii_case("parquet"))
                        .unwrap_or(false)
                })
                .collect();
            files.sort();
            if files.is_empty() {
                return Err(Error::InputNotFound {
                    path: path.join("*.parquet"),
                });
            }
            files
        } else {
            if path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| !e.eq_ignore_ascii_case("parquet"))
                .unwrap_or(true)
            {
                return Err(Error::FormatMismatch {
                    path: path.to_path_buf(),
                    reason: "expected a .parquet file or a directory of them".to_string(),
                });
            }
            vec![path.to_path_buf()]
        };
        Ok(TravelTimeStore { files })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// One lazy frame over all underlying files, schema-checked, restricted
    /// to the store columns. Reading stays lazy; filters pushed onto the
    /// returned frame run as a streaming scan.
    pub fn lazy(&self) -> Result<LazyFrame> {
        let mut frames = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let lf = LazyFrame::scan_parquet(
                file.to_string_lossy().to_string(),
                ScanArgsParquet::default(),
            )?;
            self.validate_schema(&lf, file)?;
            frames.push(lf);
        }
        let combined = concat(frames.as_slice(), UnionArgs::default())?;
        Ok(combined.select([col("from_id"), col("to_id"), col("travel_time")]))
    }

    fn validate_schema(&self, lf: &LazyFrame, file: &Path) -> Result<()> {
        let mut lf = lf.clone();
        let schema = lf.schema()?;
        for (name, want_nullable_ok) in
            [("from_id", false), ("to_id", false), ("travel_time", true)]
        {
            let dtype = schema.get(name).ok_or_else(|| Error::FormatMismatch {
                path: file.to_path_buf(),
                reason: format!("missing column '{name}'"),
            })?;
            let ok = is_integer(dtype) || (want_nullable_ok && matches!(dtype, DataType::Null));
            if !ok {
                return Err(Error::FormatMismatch {
                    path: file.to_path_buf(),
                    reason: format!("column '{name}' has non-integer dtype {dtype}"),
                });
            }
        }
        Ok(())
    }
}

fn is_integer(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

/// Write one batch of travel-time rows under `dir`, split into partitions
/// of at most `partition_bytes` (in-memory estimate), named
/// `batch-<key>-<n>.parquet`. Each partition lands atomically via a
/// temp-file rename. Returns the final paths.
pub fn write_batch(
    dir: &Path,
    key: BatchKey,
    df: &mut DataFrame,
    partition_bytes: usize,
) -> Result<Vec<PathBuf>> {
    if partition_bytes == 0 {
        return Err(Error::invalid_parameter(
            "partition_bytes",
            "must be positive",
        ));
    }
    fs::create_dir_all(dir)?;

    let height = df.height();
    let partitions = (df.estimated_size() + partition_bytes - 1) / partition_bytes;
    let partitions = partitions.max(1);
    let rows_per_partition = (height + partitions - 1) / partitions.max(1);

    let mut written = Vec::with_capacity(partitions);
    for index in 0..partitions {
        let offset = index * rows_per_partition;
        let len = rows_per_partition.min(height.saturating_sub(offset));
        let mut part = df.slice(offset as i64, len);

        let final_path = dir.join(format!("batch-{key}-{index}.parquet"));
        let tmp_path = dir.join(format!(".batch-{key}-{index}.parquet.tmp"));
        {
            let mut file = File::create(&tmp_path)?;
            ParquetWriter::new(&mut file).finish(&mut part)?;
        }
        fs::rename(&tmp_path, &final_path)?;
        written.push(final_path);
    }
    Ok(written)
}
