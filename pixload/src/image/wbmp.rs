//! Type 0 wireless bitmaps: one bit per pixel, no magic bytes

use std::io::Read;

use anyhow::{bail, ensure, Context, Result};

use crate::bitmap::{Bitmap, PixelFormat};
use crate::request::ImageDimensions;

use super::decode::{Decoder, ImageStream};

const MAX_FILE_SIZE: usize = 4096 * 4096 * 4;
const MAX_DIMENSION: u32 = 65536;
// type + fixed header + two integers of at most four bytes each
const MAX_HEADER_LEN: u64 = 10;

/// Reads a big endian base 128 integer of at most four bytes.
fn read_multibyte_integer(data: &[u8], pos: &mut usize) -> Result<u32> {
    let mut value = 0u32;
    for _ in 0..4 {
        let Some(&byte) = data.get(*pos) else {
            bail!("WBMP header truncated");
        };
        *pos += 1;
        value = (value << 7) | (byte & 0x7f) as u32;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    bail!("WBMP integer longer than four bytes")
}

fn parse_header(data: &[u8]) -> Result<(ImageDimensions, usize)> {
    let mut pos = 0;
    let kind = read_multibyte_integer(data, &mut pos)?;
    ensure!(kind == 0, "unsupported WBMP type {kind}");

    // Fixed header field, always zero for type 0
    ensure!(pos < data.len(), "WBMP header truncated");
    pos += 1;

    let width = read_multibyte_integer(data, &mut pos)?;
    let height = read_multibyte_integer(data, &mut pos)?;
    ensure!(
        (1..=MAX_DIMENSION).contains(&width) && (1..=MAX_DIMENSION).contains(&height),
        "invalid WBMP dimensions {width}x{height}"
    );

    Ok((ImageDimensions::new(width, height), pos))
}

pub struct WbmpDecoder;

impl Decoder for WbmpDecoder {
    fn header_dimensions(&self, stream: &mut dyn ImageStream) -> Result<ImageDimensions> {
        let mut header = Vec::with_capacity(MAX_HEADER_LEN as usize);
        stream
            .take(MAX_HEADER_LEN)
            .read_to_end(&mut header)
            .context("reading WBMP header")?;
        let (dimensions, _) = parse_header(&header)?;
        Ok(dimensions)
    }

    fn decode(
        &self,
        stream: &mut dyn ImageStream,
        _orientation_correction: bool,
    ) -> Result<Bitmap> {
        let mut data = Vec::new();
        stream
            .take(MAX_FILE_SIZE as u64 + 1)
            .read_to_end(&mut data)
            .context("reading WBMP data")?;
        ensure!(
            data.len() > 4 && data.len() <= MAX_FILE_SIZE,
            "WBMP file size {} out of range",
            data.len()
        );

        let (dimensions, start) = parse_header(&data)?;
        let width = dimensions.width as usize;
        let height = dimensions.height as usize;
        let row_bytes = (width + 7) >> 3;
        let body = &data[start..];
        ensure!(
            body.len() >= row_bytes * height,
            "WBMP data truncated: {} of {} bytes",
            body.len(),
            row_bytes * height
        );

        let mut pixels = Vec::with_capacity(width * height);
        for row in body.chunks_exact(row_bytes).take(height) {
            pixels.extend(
                (0..width).map(|x| if row[x >> 3] & (0x80 >> (x & 7)) != 0 { 0xff } else { 0x00 }),
            );
        }

        Bitmap::from_pixels(dimensions.width, dimensions.height, PixelFormat::L8, pixels)
            .context("WBMP pixel count mismatch")
    }
}

#[cfg(test)]
pub(crate) fn encode_test_wbmp(width: u32, height: u32, rows: &[&[u8]]) -> Vec<u8> {
    fn push_multibyte(out: &mut Vec<u8>, value: u32) {
        let mut groups = vec![(value & 0x7f) as u8];
        let mut rest = value >> 7;
        while rest > 0 {
            groups.push((rest & 0x7f) as u8 | 0x80);
            rest >>= 7;
        }
        out.extend(groups.into_iter().rev());
    }

    let mut out = vec![0, 0];
    push_multibyte(&mut out, width);
    push_multibyte(&mut out, height);
    for row in rows {
        out.extend_from_slice(row);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn multibyte_integers() {
        let mut pos = 0;
        assert_eq!(read_multibyte_integer(&[0x05], &mut pos).unwrap(), 5);
        let mut pos = 0;
        assert_eq!(read_multibyte_integer(&[0x81, 0x00], &mut pos).unwrap(), 128);
        assert_eq!(pos, 2);
        let mut pos = 0;
        assert!(read_multibyte_integer(&[0x80, 0x80, 0x80, 0x80, 0x01], &mut pos).is_err());
        let mut pos = 0;
        assert!(read_multibyte_integer(&[0x80], &mut pos).is_err());
    }

    #[test]
    fn expands_bits_msb_first() {
        let file = encode_test_wbmp(10, 2, &[&[0b1010_0000, 0b0100_0000], &[0xff, 0xc0]]);
        let mut stream = Cursor::new(file);

        assert_eq!(
            WbmpDecoder.header_dimensions(&mut stream).unwrap(),
            ImageDimensions::new(10, 2)
        );

        stream.set_position(0);
        let bitmap = WbmpDecoder.decode(&mut stream, false).unwrap();
        assert_eq!(bitmap.format(), PixelFormat::L8);
        assert_eq!(bitmap.dimensions(), (10, 2));
        assert_eq!(
            &bitmap.buffer()[..10],
            &[0xff, 0, 0xff, 0, 0, 0, 0, 0, 0, 0xff]
        );
        assert!(bitmap.buffer()[10..].iter().all(|&p| p == 0xff));
    }

    #[test]
    fn large_dimensions_use_multibyte_header() {
        let row = [0u8; 25];
        let rows: Vec<&[u8]> = (0..3).map(|_| &row[..]).collect();
        let file = encode_test_wbmp(200, 3, &rows);
        let bitmap = WbmpDecoder.decode(&mut Cursor::new(file), false).unwrap();
        assert_eq!(bitmap.dimensions(), (200, 3));
    }

    #[test]
    fn rejects_bad_files() {
        let cases: [Vec<u8>; 4] = [
            vec![1, 0, 2, 2, 0, 0],
            vec![0, 0, 0, 2, 0, 0],
            vec![0, 0, 2],
            encode_test_wbmp(16, 4, &[&[0, 0]]),
        ];
        for (i, file) in cases.into_iter().enumerate() {
            assert!(WbmpDecoder.decode(&mut Cursor::new(file), false).is_err(), "case {i}");
        }
    }
}
