//! Single-band GeoTIFF reading and writing.
//!
//! A thin layer over the `tiff` crate that carries the georeferencing the
//! pipeline needs: pixel scale, tiepoint, the CRS authority code from the
//! GeoKey directory, and the GDAL nodata tag. Band 1 only; values are
//! widened to f64.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::Array2;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use upa_core::error::{Error, Result};
use upa_core::{Crs, GridTransform, RasterGrid};

// GeoKey ids, per the GeoTIFF spec.
const GT_MODEL_TYPE: u32 = 1024;
const GEOGRAPHIC_TYPE: u32 = 2048;
const PROJECTED_CS_TYPE: u32 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;

fn raster_err(e: impl std::fmt::Display) -> Error {
    Error::Raster(e.to_string())
}

fn check_extension(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if ext != "tif" && ext != "tiff" {
        return Err(Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: "expected a .tif/.tiff file".to_string(),
        });
    }
    Ok(())
}

/// Read band 1 of a GeoTIFF into a [`RasterGrid`].
pub fn read_geotiff(path: &Path) -> Result<RasterGrid> {
    check_extension(path)?;
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::InputNotFound {
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(e)
        }
    })?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(raster_err)?
        .with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions().map_err(raster_err)?;

    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: "missing ModelPixelScale tag".to_string(),
        })?;
    let tie = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: "missing ModelTiepoint tag".to_string(),
        })?;
    if scale.len() < 2 || tie.len() < 6 {
        return Err(Error::FormatMismatch {
            path: path.to_path_buf(),
            reason: "malformed georeferencing tags".to_string(),
        });
    }
    // Tiepoint maps raster (i, j) to world (x, y); shift back to pixel (0, 0).
    let x_size = scale[0];
    let y_size = -scale[1];
    let x_origin = tie[3] - tie[0] * x_size;
    let y_origin = tie[4] - tie[1] * y_size;

    let crs = read_crs(&mut decoder).ok_or_else(|| Error::FormatMismatch {
        path: path.to_path_buf(),
        reason: "missing or unreadable GeoKey directory".to_string(),
    })?;

    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok());

    let values = read_band(&mut decoder, path)?;
    let data = Array2::from_shape_vec((height as usize, width as usize), values)
        .map_err(raster_err)?;

    Ok(RasterGrid::new(
        data,
        GridTransform::new(x_origin, y_origin, x_size, y_size),
        crs,
        nodata,
    ))
}

fn read_crs<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<Crs> {
    let directory = decoder
        .get_tag(Tag::GeoKeyDirectoryTag)
        .ok()?
        .into_u32_vec()
        .ok()?;
    // Entries of four shorts: (key id, tag location, count, value).
    let mut projected = None;
    let mut geographic = None;
    for entry in directory.chunks_exact(4).skip(1) {
        match entry[0] {
            PROJECTED_CS_TYPE => projected = Some(entry[3]),
            GEOGRAPHIC_TYPE => geographic = Some(entry[3]),
            _ => {}
        }
    }
    let code = projected.or(geographic)?;
    // EPSG owns the 1024..32767 range; the 32768..65535 vendor range holds
    // the ESRI world projections (54009 et al.).
    let authority = if code < 32767 { "EPSG" } else { "ESRI" };
    Some(Crs::new(&format!("{authority}:{code}")))
}

fn read_band<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<Vec<f64>> {
    let image = decoder.read_image().map_err(raster_err)?;
    let values = match image {
        DecodingResult::F64(v) => v,
        DecodingResult::F32(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::U8(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f64).collect(),
        _ => {
            return Err(Error::FormatMismatch {
                path: path.to_path_buf(),
                reason: "unsupported sample format".to_string(),
            })
        }
    };
    Ok(values)
}

/// Write a [`RasterGrid`] as a single-band f64 GeoTIFF.
pub fn write_geotiff(path: &Path, grid: &RasterGrid) -> Result<()> {
    check_extension(path)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(raster_err)?;
    let mut image = encoder
        .new_image::<colortype::Gray64Float>(grid.cols() as u32, grid.rows() as u32)
        .map_err(raster_err)?;

    let t = grid.transform;
    image
        .encoder()
        .write_tag(Tag::ModelPixelScaleTag, &[t.x_size, -t.y_size, 0.0][..])
        .map_err(raster_err)?;
    image
        .encoder()
        .write_tag(
            Tag::ModelTiepointTag,
            &[0.0, 0.0, 0.0, t.x_origin, t.y_origin, 0.0][..],
        )
        .map_err(raster_err)?;

    let (code, model, key) = crs_geokey(&grid.crs)?;
    let directory: [u16; 12] = [
        1, 1, 0, 2, // version, revision, minor, key count
        GT_MODEL_TYPE as u16, 0, 1, model,
        key as u16, 0, 1, code,
    ];
    image
        .encoder()
        .write_tag(Tag::GeoKeyDirectoryTag, &directory[..])
        .map_err(raster_err)?;

    if let Some(nodata) = grid.nodata {
        let text = format!("{nodata}");
        image
            .encoder()
            .write_tag(Tag::GdalNodata, text.as_str())
            .map_err(raster_err)?;
    }

    let data: Vec<f64> = grid.data.iter().copied().collect();
    image.write_data(&data).map_err(raster_err)?;
    Ok(())
}

fn crs_geokey(crs: &Crs) -> Result<(u16, u16, u32)> {
    let mut parts = crs.code().splitn(2, ':');
    let authority = parts.next().unwrap_or_default();
    let code: u16 = parts
        .next()
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| Error::Raster(format!("cannot encode CRS '{}' as a GeoKey", crs)))?;
    let (model, key) = if authority == "EPSG" && code == 4326 {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE)
    };
    Ok((code, model, key))
}
