use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::types::{DataType, Image, ImageMetadata};

const FITS_BLOCK_SIZE: usize = 2880;
const FITS_CARD_SIZE: usize = 80;

const CHUNK: usize = 65536;
const PAR_THRESHOLD: usize = CHUNK * 2;

struct FitsHeader {
    bitpix: i32,
    naxis: i32,
    naxis1: usize,
    naxis2: usize,
    naxis3: usize,
    bzero: f64,
    bscale: f64,
    exposure: Option<f64>,
    date_obs: Option<String>,
}

fn card_keyword(card: &str) -> &str {
    card.get(..8).unwrap_or(card).trim_end()
}

fn card_value(card: &str) -> Option<&str> {
    if card.get(8..10) != Some("= ") {
        return None;
    }
    Some(card[10..].trim_start())
}

fn parse_int(val: &str) -> Option<i64> {
    let num_str: String = val
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-' || *c == '+')
        .collect();
    num_str.parse().ok()
}

fn parse_float(val: &str) -> Option<f64> {
    let num_str: String = val
        .chars()
        .take_while(|c| {
            c.is_ascii_digit() || matches!(*c, '-' | '+' | '.' | 'E' | 'e' | 'D' | 'd')
        })
        .map(|c| if c == 'D' || c == 'd' { 'E' } else { c })
        .collect();
    num_str.parse().ok()
}

fn parse_string(val: &str) -> Option<String> {
    let val = val.strip_prefix('\'')?;
    let end = val.find('\'')?;
    Some(val[..end].trim_end().to_string())
}

/// DATE-OBS is either a full ISO timestamp or a bare date.
pub(crate) fn parse_date_obs(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn read_fits_header<R: Read>(reader: &mut R) -> Result<FitsHeader> {
    let mut hdr = FitsHeader {
        bitpix: 0,
        naxis: 0,
        naxis1: 0,
        naxis2: 0,
        naxis3: 0,
        bzero: 0.0,
        bscale: 1.0,
        exposure: None,
        date_obs: None,
    };

    let mut block = [0u8; FITS_BLOCK_SIZE];
    let mut found_end = false;

    while !found_end {
        reader
            .read_exact(&mut block)
            .context("Failed to read FITS header block")?;

        for card_bytes in block.chunks_exact(FITS_CARD_SIZE) {
            let card = std::str::from_utf8(card_bytes).unwrap_or("");
            let keyword = card_keyword(card);

            if keyword == "END" {
                found_end = true;
                break;
            }

            let Some(val) = card_value(card) else {
                continue;
            };

            match keyword {
                "BITPIX" => hdr.bitpix = parse_int(val).unwrap_or(0) as i32,
                "NAXIS" => hdr.naxis = parse_int(val).unwrap_or(0) as i32,
                "NAXIS1" => hdr.naxis1 = parse_int(val).unwrap_or(0).max(0) as usize,
                "NAXIS2" => hdr.naxis2 = parse_int(val).unwrap_or(0).max(0) as usize,
                "NAXIS3" => hdr.naxis3 = parse_int(val).unwrap_or(0).max(0) as usize,
                "BZERO" => hdr.bzero = parse_float(val).unwrap_or(0.0),
                "BSCALE" => hdr.bscale = parse_float(val).unwrap_or(1.0),
                // EXPOSURE wins over EXPTIME when both are present
                "EXPOSURE" => hdr.exposure = parse_float(val).or(hdr.exposure),
                "EXPTIME" => {
                    if hdr.exposure.is_none() {
                        hdr.exposure = parse_float(val);
                    }
                }
                "DATE-OBS" => hdr.date_obs = parse_string(val),
                _ => {}
            }
        }
    }

    if hdr.bitpix == 0 {
        bail!("Missing BITPIX keyword in FITS header");
    }
    if hdr.naxis < 2 {
        bail!("FITS image must have at least 2 dimensions");
    }
    if hdr.naxis1 == 0 || hdr.naxis2 == 0 {
        bail!("Invalid FITS image dimensions");
    }

    Ok(hdr)
}

fn raw_value(dtype: DataType, b: &[u8]) -> f64 {
    match dtype {
        DataType::Uint8 => b[0] as f64,
        DataType::Int16 => i16::from_be_bytes([b[0], b[1]]) as f64,
        DataType::Int32 => i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64,
        DataType::Float32 => f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64,
        DataType::Float64 => {
            f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        }
    }
}

fn decode_pixels(raw: &[u8], dtype: DataType, bzero: f64, bscale: f64) -> Vec<f64> {
    let bpp = dtype.bytes_per_pixel();
    let num_pixels = raw.len() / bpp;
    let mut out = vec![0f64; num_pixels];

    let convert = |s: &[u8], d: &mut [f64]| {
        for (px, dst) in s.chunks_exact(bpp).zip(d.iter_mut()) {
            *dst = bzero + bscale * raw_value(dtype, px);
        }
    };

    if num_pixels >= PAR_THRESHOLD {
        raw.par_chunks(CHUNK * bpp)
            .zip(out.par_chunks_mut(CHUNK))
            .for_each(|(s, d)| convert(s, d));
    } else {
        convert(raw, &mut out);
    }
    out
}

/// Read the primary HDU of a FITS file. Cubes yield their first plane.
pub fn read_fits_image(path: &Path) -> Result<Image> {
    let file = File::open(path).context("Failed to open FITS file")?;
    let mut reader = BufReader::new(file);

    let hdr = read_fits_header(&mut reader)?;

    let Some(dtype) = DataType::from_bitpix(hdr.bitpix) else {
        bail!("Unsupported BITPIX value: {}", hdr.bitpix);
    };
    if hdr.naxis >= 3 && hdr.naxis3 > 1 {
        debug!(
            "{}: {} planes present, using the first",
            path.display(),
            hdr.naxis3
        );
    }

    let Some(data_size) = hdr
        .naxis1
        .checked_mul(hdr.naxis2)
        .and_then(|n| n.checked_mul(dtype.bytes_per_pixel()))
    else {
        bail!("FITS dimensions overflow: {} x {}", hdr.naxis1, hdr.naxis2);
    };
    let file_len = reader
        .get_ref()
        .metadata()
        .context("Failed to stat FITS file")?
        .len();
    let header_len = reader
        .stream_position()
        .context("Failed to locate FITS data")?;
    let available = file_len.saturating_sub(header_len);
    if data_size as u64 > available {
        bail!(
            "FITS data truncated: expected {} bytes, {} available",
            data_size,
            available
        );
    }

    let mut raw_data = vec![0u8; data_size];
    reader
        .read_exact(&mut raw_data)
        .context("Failed to read FITS data")?;

    let data = decode_pixels(&raw_data, dtype, hdr.bzero, hdr.bscale);
    let pixels = Array2::from_shape_vec((hdr.naxis2, hdr.naxis1), data)
        .context("FITS data does not match NAXIS1 x NAXIS2")?;

    let meta = ImageMetadata {
        width: hdr.naxis1,
        height: hdr.naxis2,
        dtype,
        exposure: hdr.exposure,
        date_obs: hdr.date_obs.as_deref().and_then(parse_date_obs),
    };

    Ok(Image { meta, pixels })
}

fn push_card(header: &mut Vec<u8>, card: &str) {
    let mut bytes = card.as_bytes().to_vec();
    bytes.resize(FITS_CARD_SIZE, b' ');
    header.extend_from_slice(&bytes);
}

fn value_card(keyword: &str, value: &str) -> String {
    format!("{:<8}= {:>20}", keyword, value)
}

/// Write `pixels` as a BITPIX -64 primary HDU. EXPOSURE and DATE-OBS are
/// taken from `meta` when present; its width, height and dtype are ignored.
pub fn write_fits(path: &Path, pixels: ArrayView2<f64>, meta: &ImageMetadata) -> Result<()> {
    let (height, width) = pixels.dim();
    if width == 0 || height == 0 {
        bail!("Cannot write an empty image");
    }

    let mut header = Vec::with_capacity(FITS_BLOCK_SIZE);
    push_card(&mut header, &value_card("SIMPLE", "T"));
    push_card(&mut header, &value_card("BITPIX", "-64"));
    push_card(&mut header, &value_card("NAXIS", "2"));
    push_card(&mut header, &value_card("NAXIS1", &width.to_string()));
    push_card(&mut header, &value_card("NAXIS2", &height.to_string()));
    if let Some(exposure) = meta.exposure {
        push_card(&mut header, &value_card("EXPOSURE", &format!("{:?}", exposure)));
    }
    if let Some(date_obs) = meta.date_obs {
        let stamp = date_obs.format("%Y-%m-%dT%H:%M:%S%.3f");
        push_card(&mut header, &format!("{:<8}= '{}'", "DATE-OBS", stamp));
    }
    push_card(&mut header, "END");
    let padded = header.len().div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE;
    header.resize(padded, b' ');

    let file = File::create(path).context("Failed to create FITS file")?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&header)
        .context("Failed to write FITS header")?;

    let mut data = Vec::with_capacity(width * height * 8);
    for v in pixels.iter() {
        data.extend_from_slice(&v.to_be_bytes());
    }
    let padded = data.len().div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE;
    data.resize(padded, 0);
    writer.write_all(&data).context("Failed to write FITS data")?;
    writer.flush().context("Failed to flush FITS file")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn header_block(cards: &[String]) -> Vec<u8> {
        let mut header = Vec::new();
        for card in cards {
            push_card(&mut header, card);
        }
        push_card(&mut header, "END");
        header.resize(FITS_BLOCK_SIZE, b' ');
        header
    }

    #[test]
    fn test_write_then_read_preserves_pixels_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.fits");

        let pixels = Array2::from_shape_fn((4, 6), |(y, x)| (y * 10 + x) as f64 + 0.25);
        let mut meta = ImageMetadata::new(6, 4);
        meta.exposure = Some(30.0);
        meta.date_obs = parse_date_obs("2013-05-01T21:30:15.500");

        write_fits(&path, pixels.view(), &meta).unwrap();
        let image = read_fits_image(&path).unwrap();

        assert_eq!(image.meta.width, 6);
        assert_eq!(image.meta.height, 4);
        assert_eq!(image.meta.dtype, DataType::Float64);
        assert_eq!(image.meta.exposure, Some(30.0));
        assert_eq!(image.meta.date_obs, meta.date_obs);
        assert_eq!(image.pixels, pixels);
        // Row-major: x runs fastest, so [[y, x]] addressing is preserved
        assert_relative_eq!(image.pixels[[3, 5]], 35.25);
    }

    #[test]
    fn test_int16_with_bzero_is_rescaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u16.fits");

        let mut bytes = header_block(&[
            value_card("SIMPLE", "T"),
            value_card("BITPIX", "16"),
            value_card("NAXIS", "2"),
            value_card("NAXIS1", "2"),
            value_card("NAXIS2", "1"),
            value_card("BZERO", "32768"),
            value_card("BSCALE", "1"),
            value_card("EXPTIME", "12.5"),
        ]);
        // 0x8000 -> 0 + 32768, 0x0001 -> 32769
        bytes.extend_from_slice(&[0x80, 0x00, 0x00, 0x01]);
        bytes.resize(FITS_BLOCK_SIZE * 2, 0);
        std::fs::write(&path, &bytes).unwrap();

        let image = read_fits_image(&path).unwrap();
        assert_eq!(image.meta.dtype, DataType::Int16);
        assert_eq!(image.meta.exposure, Some(12.5));
        assert_relative_eq!(image.pixels[[0, 0]], 0.0);
        assert_relative_eq!(image.pixels[[0, 1]], 32769.0);
    }

    #[test]
    fn test_cube_uses_first_plane() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.fits");

        let mut bytes = header_block(&[
            value_card("SIMPLE", "T"),
            value_card("BITPIX", "8"),
            value_card("NAXIS", "3"),
            value_card("NAXIS1", "2"),
            value_card("NAXIS2", "2"),
            value_card("NAXIS3", "2"),
        ]);
        bytes.extend_from_slice(&[1, 2, 3, 4, 9, 9, 9, 9]);
        bytes.resize(FITS_BLOCK_SIZE * 2, 0);
        std::fs::write(&path, &bytes).unwrap();

        let image = read_fits_image(&path).unwrap();
        assert_eq!(image.pixels.dim(), (2, 2));
        assert_relative_eq!(image.pixels.sum(), 10.0);
    }

    #[test]
    fn test_missing_bitpix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.fits");
        let bytes = header_block(&[value_card("SIMPLE", "T"), value_card("NAXIS", "2")]);
        std::fs::write(&path, &bytes).unwrap();

        let err = read_fits_image(&path).unwrap_err();
        assert!(err.to_string().contains("Missing BITPIX"));
    }

    #[test]
    fn test_truncated_data_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.fits");
        let bytes = header_block(&[
            value_card("SIMPLE", "T"),
            value_card("BITPIX", "-32"),
            value_card("NAXIS", "2"),
            value_card("NAXIS1", "100"),
            value_card("NAXIS2", "100"),
        ]);
        std::fs::write(&path, &bytes).unwrap();

        let err = read_fits_image(&path).unwrap_err();
        assert!(err.to_string().contains("FITS data truncated"));
    }

    #[test]
    fn test_overflowing_dimensions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.fits");
        let bytes = header_block(&[
            value_card("SIMPLE", "T"),
            value_card("BITPIX", "16"),
            value_card("NAXIS", "2"),
            value_card("NAXIS1", "4294967296"),
            value_card("NAXIS2", "4294967296"),
        ]);
        std::fs::write(&path, &bytes).unwrap();

        let err = read_fits_image(&path).unwrap_err();
        assert!(err.to_string().contains("FITS dimensions overflow"));
    }

    #[test]
    fn test_oversized_header_claim_is_truncation_not_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims_large.fits");
        let bytes = header_block(&[
            value_card("SIMPLE", "T"),
            value_card("BITPIX", "-64"),
            value_card("NAXIS", "2"),
            value_card("NAXIS1", "1000000"),
            value_card("NAXIS2", "1000000"),
        ]);
        std::fs::write(&path, &bytes).unwrap();

        let err = read_fits_image(&path).unwrap_err();
        assert!(err.to_string().contains("FITS data truncated"));
    }

    #[test]
    fn test_date_obs_formats() {
        let full = parse_date_obs("2013-05-01T21:30:15").unwrap();
        assert_eq!(full.to_string(), "2013-05-01 21:30:15");
        let bare = parse_date_obs("2013-05-01").unwrap();
        assert_eq!(bare.to_string(), "2013-05-01 00:00:00");
        assert!(parse_date_obs("yesterday").is_none());
    }

    #[test]
    fn test_float_keyword_accepts_fortran_exponent() {
        assert_eq!(parse_float("1.5D2 / comment"), Some(150.0));
        assert_eq!(parse_float("-2.5E-1"), Some(-0.25));
    }
}
