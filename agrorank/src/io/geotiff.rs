//! GeoTIFF reading and writing on top of the `tiff` crate
//!
//! Georeferencing is carried by the usual GeoTIFF tags: ModelPixelScale +
//! ModelTiepoint (or ModelTransformation for rotated grids), the EPSG code in
//! the GeoKeyDirectory and the nodata value in GDAL_NODATA.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::mem::size_of;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, DirectoryEncoder, TiffEncoder, TiffKindStandard, TiffValue};
use tiff::tags::{
    CompressionMethod, PhotometricInterpretation, PlanarConfiguration, SampleFormat, Tag,
};

use crate::error::{Error, Result};
use crate::geo_core::{Crs, GeoTransform};
use crate::raster::{RasterDataset, SampleType};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Read a GeoTIFF file
pub fn read<P: AsRef<Path>>(path: P) -> Result<RasterDataset> {
    let path = path.as_ref();
    log::info!("Reading GeoTIFF {:?}", path);
    let file = File::open(path)
        .map_err(|e| Error::RasterIo(format!("Failed to open {:?}: {}", path, e)))?;
    decode(BufReader::new(file))
}

/// Read a GeoTIFF held in memory
pub fn read_bytes(bytes: &[u8]) -> Result<RasterDataset> {
    decode(Cursor::new(bytes))
}

/// Write a raster to a GeoTIFF file
pub fn write<P: AsRef<Path>>(raster: &RasterDataset, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| Error::RasterIo(format!("Failed to create {:?}: {}", path, e)))?;
    let mut writer = BufWriter::new(file);
    encode(raster, &mut writer)?;
    writer
        .flush()
        .map_err(|e| Error::RasterIo(format!("Failed to flush {:?}: {}", path, e)))?;
    log::info!(
        "Wrote {}x{} GeoTIFF with {} band(s) to {:?}",
        raster.width(),
        raster.height(),
        raster.band_count(),
        path
    );
    Ok(())
}

/// Encode a raster as GeoTIFF bytes
pub fn to_bytes(raster: &RasterDataset) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    encode(raster, &mut cursor)?;
    Ok(cursor.into_inner())
}

fn decode<R: Read + Seek>(reader: R) -> Result<RasterDataset> {
    let mut decoder = Decoder::new(reader)?.with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    let samples_per_pixel = decoder
        .find_tag(Tag::SamplesPerPixel)?
        .map(|v| v.into_u16())
        .transpose()?
        .unwrap_or(1) as usize;

    let planar = decoder
        .find_tag(Tag::PlanarConfiguration)?
        .map(|v| v.into_u16())
        .transpose()?
        .unwrap_or(1);
    if planar != 1 {
        return Err(Error::RasterIo(
            "Planar (band-separate) TIFF layout is not supported".to_string(),
        ));
    }

    let transform = read_transform(&mut decoder)?;
    let crs = read_crs(&mut decoder)?;
    let nodata = read_nodata(&mut decoder)?;

    let (samples, sample_type) = widen(decoder.read_image()?);
    if samples.len() != width * height * samples_per_pixel {
        return Err(Error::RasterIo(format!(
            "Decoded {} samples, expected {}x{}x{}",
            samples.len(),
            width,
            height,
            samples_per_pixel
        )));
    }

    let bands = deinterleave(&samples, samples_per_pixel);
    log::debug!(
        "Decoded {}x{} raster, {} band(s), {:?}, crs {:?}, nodata {:?}",
        width,
        height,
        samples_per_pixel,
        sample_type,
        crs,
        nodata
    );

    Ok(RasterDataset::new(width, height, bands, transform, sample_type)?
        .with_crs(crs)
        .with_nodata(nodata))
}

fn widen(result: DecodingResult) -> (Vec<f64>, SampleType) {
    fn cast<T: Copy + Into<f64>>(v: Vec<T>) -> Vec<f64> {
        v.into_iter().map(Into::into).collect()
    }

    #[allow(unreachable_patterns)]
    match result {
        DecodingResult::U8(v) => (cast(v), SampleType::U8),
        DecodingResult::U16(v) => (cast(v), SampleType::U16),
        DecodingResult::U32(v) => (cast(v), SampleType::U32),
        DecodingResult::I8(v) => (cast(v), SampleType::I16),
        DecodingResult::I16(v) => (cast(v), SampleType::I16),
        DecodingResult::I32(v) => (cast(v), SampleType::I32),
        DecodingResult::F32(v) => (cast(v), SampleType::F32),
        DecodingResult::F64(v) => (v, SampleType::F64),
        DecodingResult::U64(v) => (v.into_iter().map(|x| x as f64).collect(), SampleType::F64),
        DecodingResult::I64(v) => (v.into_iter().map(|x| x as f64).collect(), SampleType::F64),
        _ => (Vec::new(), SampleType::F64),
    }
}

fn deinterleave(samples: &[f64], band_count: usize) -> Vec<Vec<f64>> {
    if band_count == 1 {
        return vec![samples.to_vec()];
    }
    (0..band_count)
        .map(|b| samples.iter().skip(b).step_by(band_count).copied().collect())
        .collect()
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(matrix) = decoder.find_tag(geo_tag(MODEL_TRANSFORMATION))? {
        let m = matrix.into_f64_vec()?;
        if m.len() >= 8 {
            return Ok(GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }

    let scale = decoder
        .find_tag(geo_tag(MODEL_PIXEL_SCALE))?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let tiepoint = decoder
        .find_tag(geo_tag(MODEL_TIEPOINT))?
        .map(|v| v.into_f64_vec())
        .transpose()?;

    match (scale, tiepoint) {
        (Some(scale), Some(tp)) if scale.len() >= 2 && tp.len() >= 6 => Ok(GeoTransform::new(
            tp[3] - tp[0] * scale[0],
            tp[4] + tp[1] * scale[1],
            scale[0],
            -scale[1],
        )),
        _ => {
            log::warn!("GeoTIFF has no georeferencing tags, using pixel coordinates");
            Ok(GeoTransform::default())
        }
    }
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<Crs>> {
    let keys = match decoder.find_tag(geo_tag(GEO_KEY_DIRECTORY))? {
        Some(v) => v.into_u16_vec()?,
        None => return Ok(None),
    };
    Ok(epsg_from_geokeys(&keys).map(|code| Crs::from_epsg(code as u32)))
}

/// EPSG code from a GeoKeyDirectory, projected CRS first
fn epsg_from_geokeys(keys: &[u16]) -> Option<u16> {
    if keys.len() < 4 {
        return None;
    }
    let entries: Vec<&[u16]> = keys[4..].chunks_exact(4).collect();
    let lookup = |wanted: u16| {
        entries
            .iter()
            .find(|e| e[0] == wanted && e[1] == 0)
            .map(|e| e[3])
            .filter(|code| *code != 0 && *code != USER_DEFINED)
    };
    lookup(PROJECTED_CS_TYPE_KEY).or_else(|| lookup(GEOGRAPHIC_TYPE_KEY))
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>> {
    let text = match decoder.find_tag(geo_tag(GDAL_NODATA))? {
        Some(v) => v.into_string()?,
        None => return Ok(None),
    };
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    match trimmed.parse::<f64>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => {
            log::warn!("Ignoring unparsable GDAL_NODATA value {:?}", trimmed);
            Ok(None)
        }
    }
}

fn encode<W: Write + Seek>(raster: &RasterDataset, writer: W) -> Result<()> {
    let mut encoder = TiffEncoder::new(writer)?;

    // 1, 3 and 4 bands keep a gray / RGB / RGBA photometric interpretation,
    // any other count is written as a multi-sample BlackIsZero image
    macro_rules! encode_as {
        ($gray:ty, $rgb:ty, $rgba:ty, $bits:expr, $format:expr, $convert:expr) => {
            match raster.band_count() {
                1 => encode_image::<$gray, W>(&mut encoder, raster, $convert),
                3 => encode_image::<$rgb, W>(&mut encoder, raster, $convert),
                4 => encode_image::<$rgba, W>(&mut encoder, raster, $convert),
                _ => encode_multiband(&mut encoder, raster, $bits, $format, $convert),
            }
        };
    }

    match raster.sample_type() {
        SampleType::U8 => encode_as!(
            colortype::Gray8,
            colortype::RGB8,
            colortype::RGBA8,
            8,
            SampleFormat::Uint,
            |v: f64| if v.is_nan() { 0 } else { v.round().clamp(0.0, 255.0) as u8 }
        ),
        SampleType::U16 => encode_as!(
            colortype::Gray16,
            colortype::RGB16,
            colortype::RGBA16,
            16,
            SampleFormat::Uint,
            |v: f64| if v.is_nan() { 0 } else { v.round().clamp(0.0, 65535.0) as u16 }
        ),
        SampleType::I16 | SampleType::F32 => encode_as!(
            colortype::Gray32Float,
            colortype::RGB32Float,
            colortype::RGBA32Float,
            32,
            SampleFormat::IEEEFP,
            |v: f64| v as f32
        ),
        SampleType::U32 | SampleType::I32 | SampleType::F64 => encode_as!(
            colortype::Gray64Float,
            colortype::RGB64Float,
            colortype::RGBA64Float,
            64,
            SampleFormat::IEEEFP,
            |v: f64| v
        ),
    }
}

/// Pixel-interleaved samples, band order within each pixel
fn interleave<T>(raster: &RasterDataset, convert: fn(f64) -> T) -> Vec<T> {
    let bands = raster.bands();
    let pixels = raster.width() * raster.height();
    let mut data = Vec::with_capacity(pixels * bands.len());
    for i in 0..pixels {
        for band in bands {
            data.push(convert(band[i]));
        }
    }
    data
}

fn encode_image<C, W>(
    encoder: &mut TiffEncoder<W>,
    raster: &RasterDataset,
    convert: fn(f64) -> C::Inner,
) -> Result<()>
where
    C: colortype::ColorType,
    W: Write + Seek,
    [C::Inner]: TiffValue,
{
    let mut image = encoder.new_image::<C>(raster.width() as u32, raster.height() as u32)?;
    write_geo_tags(image.encoder(), raster)?;
    image.write_data(&interleave(raster, convert))?;
    Ok(())
}

/// Single-strip chunky image with one sample per band and N-1 unspecified
/// extra samples
fn encode_multiband<T, W>(
    encoder: &mut TiffEncoder<W>,
    raster: &RasterDataset,
    bits: u16,
    format: SampleFormat,
    convert: fn(f64) -> T,
) -> Result<()>
where
    W: Write + Seek,
    [T]: TiffValue,
{
    let band_count = raster.band_count();
    let data = interleave(raster, convert);
    let byte_count = u32::try_from(data.len() * size_of::<T>()).map_err(|_| {
        Error::RasterIo(format!(
            "{}x{}x{} raster is too large for a single strip",
            raster.width(),
            raster.height(),
            band_count
        ))
    })?;

    let mut dir = encoder.new_directory()?;
    dir.write_tag(Tag::ImageWidth, raster.width() as u32)?;
    dir.write_tag(Tag::ImageLength, raster.height() as u32)?;
    dir.write_tag(Tag::BitsPerSample, &vec![bits; band_count][..])?;
    dir.write_tag(Tag::Compression, CompressionMethod::None.to_u16())?;
    dir.write_tag(
        Tag::PhotometricInterpretation,
        PhotometricInterpretation::BlackIsZero.to_u16(),
    )?;
    dir.write_tag(Tag::SamplesPerPixel, band_count as u16)?;
    dir.write_tag(Tag::RowsPerStrip, raster.height() as u32)?;
    dir.write_tag(Tag::PlanarConfiguration, PlanarConfiguration::Chunky.to_u16())?;
    dir.write_tag(Tag::ExtraSamples, &vec![0u16; band_count - 1][..])?;
    dir.write_tag(Tag::SampleFormat, &vec![format.to_u16(); band_count][..])?;
    write_geo_tags(&mut dir, raster)?;

    let offset = dir.write_data(&data[..])?;
    let offset = u32::try_from(offset)
        .map_err(|_| Error::RasterIo("Strip offset exceeds 4 GiB".to_string()))?;
    dir.write_tag(Tag::StripOffsets, offset)?;
    dir.write_tag(Tag::StripByteCounts, byte_count)?;
    dir.finish()?;
    Ok(())
}

fn write_geo_tags<W: Write + Seek>(
    dir: &mut DirectoryEncoder<'_, W, TiffKindStandard>,
    raster: &RasterDataset,
) -> Result<()> {
    let gt = raster.transform();
    if gt.is_rotated() {
        let matrix = [
            gt.pixel_width,
            gt.row_rotation,
            0.0,
            gt.origin_x,
            gt.col_rotation,
            gt.pixel_height,
            0.0,
            gt.origin_y,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
        ];
        dir.write_tag(geo_tag(MODEL_TRANSFORMATION), &matrix[..])?;
    } else {
        let scale = [gt.pixel_width, -gt.pixel_height, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
        dir.write_tag(geo_tag(MODEL_PIXEL_SCALE), &scale[..])?;
        dir.write_tag(geo_tag(MODEL_TIEPOINT), &tiepoint[..])?;
    }

    dir.write_tag(geo_tag(GEO_KEY_DIRECTORY), &geokeys(raster.crs())[..])?;

    if let Some(nodata) = raster.nodata() {
        dir.write_tag(geo_tag(GDAL_NODATA), nodata.to_string().as_str())?;
    }
    Ok(())
}

/// GeoKeyDirectory for a CRS: model type, pixel-is-area and the EPSG code
fn geokeys(crs: Option<&Crs>) -> Vec<u16> {
    let code = crs
        .and_then(Crs::epsg)
        .and_then(|c| u16::try_from(c).ok());

    let mut entries: Vec<[u16; 4]> = Vec::new();
    match code {
        Some(code) if (4000..5000).contains(&code) => {
            entries.push([GT_MODEL_TYPE_KEY, 0, 1, 2]);
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, 1]);
            entries.push([GEOGRAPHIC_TYPE_KEY, 0, 1, code]);
        }
        Some(code) => {
            entries.push([GT_MODEL_TYPE_KEY, 0, 1, 1]);
            entries.push([GT_RASTER_TYPE_KEY, 0, 1, 1]);
            entries.push([PROJECTED_CS_TYPE_KEY, 0, 1, code]);
        }
        None => entries.push([GT_RASTER_TYPE_KEY, 0, 1, 1]),
    }

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}
