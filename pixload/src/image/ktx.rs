//! KTX 1.1 container holding a single compressed 2D texture

use std::io::SeekFrom;

use anyhow::{bail, ensure, Context, Result};
use num_enum::TryFromPrimitive;

use crate::bitmap::{Bitmap, PixelFormat};
use crate::request::ImageDimensions;

use super::decode::{Decoder, ImageStream};

const IDENTIFIER: [u8; 12] = [
    0xAB, 0x4B, 0x54, 0x58, 0x20, 0x31, 0x31, 0xBB, 0x0D, 0x0A, 0x1A, 0x0A,
];
const HEADER_LEN: usize = 64;
const ENDIANNESS_NATIVE: u32 = 0x0403_0201;
const MAX_KEY_VALUE_BYTES: u32 = 65536;
const MAX_DIMENSION: u32 = 4096;
const MAX_IMAGE_BYTES: u32 = MAX_DIMENSION * MAX_DIMENSION;

/// OpenGL internal formats a KTX file may carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum InternalFormat {
    R11Eac = 0x9270,
    SignedR11Eac = 0x9271,
    Rg11Eac = 0x9272,
    SignedRg11Eac = 0x9273,
    Rgb8Etc2 = 0x9274,
    Srgb8Etc2 = 0x9275,
    Rgb8PunchthroughAlpha1Etc2 = 0x9276,
    Srgb8PunchthroughAlpha1Etc2 = 0x9277,
    Rgba8Etc2Eac = 0x9278,
    Srgb8Alpha8Etc2Eac = 0x9279,
    Etc1Rgb8 = 0x8D64,
    Pvrtc4bppv1 = 0x8C00,
}

impl From<InternalFormat> for PixelFormat {
    fn from(format: InternalFormat) -> Self {
        match format {
            InternalFormat::R11Eac => PixelFormat::R11Eac,
            InternalFormat::SignedR11Eac => PixelFormat::SignedR11Eac,
            InternalFormat::Rg11Eac => PixelFormat::Rg11Eac,
            InternalFormat::SignedRg11Eac => PixelFormat::SignedRg11Eac,
            InternalFormat::Rgb8Etc2 => PixelFormat::Rgb8Etc2,
            InternalFormat::Srgb8Etc2 => PixelFormat::Srgb8Etc2,
            InternalFormat::Rgb8PunchthroughAlpha1Etc2 => PixelFormat::Rgb8PunchthroughAlpha1Etc2,
            InternalFormat::Srgb8PunchthroughAlpha1Etc2 => {
                PixelFormat::Srgb8PunchthroughAlpha1Etc2
            }
            InternalFormat::Rgba8Etc2Eac => PixelFormat::Rgba8Etc2Eac,
            InternalFormat::Srgb8Alpha8Etc2Eac => PixelFormat::Srgb8Alpha8Etc2Eac,
            InternalFormat::Etc1Rgb8 => PixelFormat::Rgb8Etc1,
            InternalFormat::Pvrtc4bppv1 => PixelFormat::RgbPvrtc4bppv1,
        }
    }
}

impl InternalFormat {
    pub fn from_pixel_format(format: PixelFormat) -> Option<Self> {
        let internal = match format {
            PixelFormat::R11Eac => InternalFormat::R11Eac,
            PixelFormat::SignedR11Eac => InternalFormat::SignedR11Eac,
            PixelFormat::Rg11Eac => InternalFormat::Rg11Eac,
            PixelFormat::SignedRg11Eac => InternalFormat::SignedRg11Eac,
            PixelFormat::Rgb8Etc2 => InternalFormat::Rgb8Etc2,
            PixelFormat::Srgb8Etc2 => InternalFormat::Srgb8Etc2,
            PixelFormat::Rgb8PunchthroughAlpha1Etc2 => InternalFormat::Rgb8PunchthroughAlpha1Etc2,
            PixelFormat::Srgb8PunchthroughAlpha1Etc2 => {
                InternalFormat::Srgb8PunchthroughAlpha1Etc2
            }
            PixelFormat::Rgba8Etc2Eac => InternalFormat::Rgba8Etc2Eac,
            PixelFormat::Srgb8Alpha8Etc2Eac => InternalFormat::Srgb8Alpha8Etc2Eac,
            PixelFormat::Rgb8Etc1 => InternalFormat::Etc1Rgb8,
            PixelFormat::RgbPvrtc4bppv1 => InternalFormat::Pvrtc4bppv1,
            _ => return None,
        };
        Some(internal)
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    endianness: u32,
    gl_type: u32,
    gl_type_size: u32,
    gl_format: u32,
    gl_internal_format: u32,
    pixel_width: u32,
    pixel_height: u32,
    pixel_depth: u32,
    number_of_array_elements: u32,
    number_of_faces: u32,
    number_of_mipmap_levels: u32,
    bytes_of_key_value_data: u32,
}

fn read_header(stream: &mut dyn ImageStream) -> Result<Header> {
    let mut raw = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut raw)
        .context("KTX header truncated")?;
    ensure!(raw[..12] == IDENTIFIER, "not a KTX file");

    let mut words = [0u32; 13];
    for (word, bytes) in words.iter_mut().zip(raw[12..].chunks_exact(4)) {
        *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }

    // words[6] is glBaseInternalFormat, which adds nothing for compressed data
    Ok(Header {
        endianness: words[0],
        gl_type: words[1],
        gl_type_size: words[2],
        gl_format: words[3],
        gl_internal_format: words[4],
        pixel_width: words[6],
        pixel_height: words[7],
        pixel_depth: words[8],
        number_of_array_elements: words[9],
        number_of_faces: words[10],
        number_of_mipmap_levels: words[11],
        bytes_of_key_value_data: words[12],
    })
}

impl Header {
    fn validate(&self) -> Result<PixelFormat> {
        ensure!(
            self.endianness == ENDIANNESS_NATIVE,
            "unsupported KTX endianness {:#010x}",
            self.endianness
        );
        ensure!(
            self.gl_type == 0 && self.gl_type_size == 1 && self.gl_format == 0,
            "only compressed KTX textures are supported"
        );
        let Ok(format) = InternalFormat::try_from(self.gl_internal_format) else {
            bail!(
                "unsupported KTX internal format {:#06x}",
                self.gl_internal_format
            );
        };
        ensure!(
            self.pixel_depth <= 1
                && self.number_of_array_elements <= 1
                && self.number_of_faces <= 1
                && self.number_of_mipmap_levels <= 1,
            "only single 2D KTX textures are supported"
        );
        ensure!(
            self.bytes_of_key_value_data <= MAX_KEY_VALUE_BYTES,
            "KTX key/value data too large: {} bytes",
            self.bytes_of_key_value_data
        );
        ensure!(
            self.pixel_width <= MAX_DIMENSION && self.pixel_height <= MAX_DIMENSION,
            "KTX texture too large: {}x{}",
            self.pixel_width,
            self.pixel_height
        );
        Ok(format.into())
    }
}

pub struct KtxDecoder;

impl Decoder for KtxDecoder {
    fn header_dimensions(&self, stream: &mut dyn ImageStream) -> Result<ImageDimensions> {
        let header = read_header(stream)?;
        header.validate()?;
        Ok(ImageDimensions::new(header.pixel_width, header.pixel_height))
    }

    fn decode(
        &self,
        stream: &mut dyn ImageStream,
        _orientation_correction: bool,
    ) -> Result<Bitmap> {
        stream.seek(SeekFrom::Start(0))?;
        let header = read_header(stream)?;
        let format = header.validate()?;

        stream.seek(SeekFrom::Start(
            HEADER_LEN as u64 + header.bytes_of_key_value_data as u64,
        ))?;
        let mut size = [0u8; 4];
        stream
            .read_exact(&mut size)
            .context("KTX image size missing")?;
        let image_size = u32::from_le_bytes(size);

        let pixel_budget = header.pixel_width * header.pixel_height * 2;
        ensure!(
            image_size <= MAX_IMAGE_BYTES && image_size <= pixel_budget,
            "KTX image size {image_size} exceeds {}x{} texture",
            header.pixel_width,
            header.pixel_height
        );

        let mut blob = vec![0u8; image_size as usize];
        stream
            .read_exact(&mut blob)
            .context("KTX image data truncated")?;

        Ok(Bitmap::compressed(
            header.pixel_width,
            header.pixel_height,
            format,
            blob,
        ))
    }
}

/// Wraps a compressed bitmap back into a KTX file. `None` for packed bitmaps.
pub fn encode_ktx(bitmap: &Bitmap) -> Option<Vec<u8>> {
    let internal_format = InternalFormat::from_pixel_format(bitmap.format())?;
    Some(encode_container(
        bitmap.width(),
        bitmap.height(),
        internal_format as u32,
        &[],
        bitmap.buffer(),
    ))
}

const GL_RGB: u32 = 0x1907;

pub(crate) fn encode_container(
    width: u32,
    height: u32,
    internal_format: u32,
    key_value: &[u8],
    blob: &[u8],
) -> Vec<u8> {
    let mut out = IDENTIFIER.to_vec();
    let words = [
        ENDIANNESS_NATIVE,
        0,
        1,
        0,
        internal_format,
        GL_RGB,
        width,
        height,
        0,
        0,
        1,
        1,
        key_value.len() as u32,
    ];
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(key_value);
    out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
    out.extend_from_slice(blob);
    out
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn patch_word(mut file: Vec<u8>, index: usize, value: u32) -> Vec<u8> {
        let start = 12 + index * 4;
        file[start..start + 4].copy_from_slice(&value.to_le_bytes());
        file
    }

    #[test]
    fn decodes_etc2_texture() {
        let blob = [0x5au8; 32];
        let file = encode_container(8, 8, 0x9274, b"KTXorientation\0S=r,T=d\0\0", &blob);
        let mut stream = Cursor::new(file);

        let dims = KtxDecoder.header_dimensions(&mut stream).unwrap();
        assert_eq!(dims, ImageDimensions::new(8, 8));

        let bitmap = KtxDecoder.decode(&mut stream, true).unwrap();
        assert!(!bitmap.is_packed());
        assert_eq!(bitmap.format(), PixelFormat::Rgb8Etc2);
        assert_eq!(bitmap.dimensions(), (8, 8));
        assert_eq!(bitmap.buffer(), &blob);
    }

    #[test]
    fn maps_every_internal_format() {
        for code in [0x9270, 0x9279, 0x8D64, 0x8C00] {
            let format = InternalFormat::try_from(code).unwrap();
            assert!(PixelFormat::from(format).is_compressed());
        }
        assert!(InternalFormat::try_from(0x1908).is_err());
    }

    #[test]
    fn compressed_bitmaps_reencode() {
        let file = encode_container(4, 4, 0x8D64, &[], &[7; 8]);
        let bitmap = KtxDecoder.decode(&mut Cursor::new(file.clone()), true).unwrap();
        assert_eq!(encode_ktx(&bitmap), Some(file));

        for format in PixelFormat::iter().filter(|f| f.is_compressed()) {
            let internal = InternalFormat::from_pixel_format(format).unwrap();
            assert_eq!(PixelFormat::from(internal), format);
        }
        assert_eq!(encode_ktx(&Bitmap::packed(1, 1, PixelFormat::L8)), None);
    }

    #[test]
    fn rejects_invalid_headers() {
        let good = encode_container(4, 4, 0x9278, &[], &[0; 16]);
        let invalid = [
            patch_word(good.clone(), 0, 0x0102_0304),
            patch_word(good.clone(), 1, 0x1401),
            patch_word(good.clone(), 4, 0x1908),
            patch_word(good.clone(), 11, 3),
            patch_word(good.clone(), 10, 6),
            patch_word(good.clone(), 12, 65537),
            patch_word(good.clone(), 6, 4097),
        ];
        for (i, file) in invalid.into_iter().enumerate() {
            assert!(
                KtxDecoder.header_dimensions(&mut Cursor::new(file)).is_err(),
                "case {i}"
            );
        }

        let mut not_ktx = good;
        not_ktx[1] = b'X';
        assert!(KtxDecoder.header_dimensions(&mut Cursor::new(not_ktx)).is_err());
    }

    #[test]
    fn rejects_oversized_payload() {
        let file = encode_container(2, 2, 0x9274, &[], &[0; 9]);
        assert!(KtxDecoder.decode(&mut Cursor::new(file), false).is_err());

        let mut truncated = encode_container(4, 4, 0x9274, &[], &[0; 8]);
        truncated.truncate(truncated.len() - 3);
        assert!(KtxDecoder.decode(&mut Cursor::new(truncated), false).is_err());
    }
}
