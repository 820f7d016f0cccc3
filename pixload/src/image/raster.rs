//! PNG, JPEG, BMP, GIF and ICO through the image crate

use anyhow::{Context, Result};
use imageproc::image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};

use crate::bitmap::{Bitmap, PixelFormat};
use crate::request::ImageDimensions;

use super::decode::{Decoder, ImageStream};

pub struct RasterDecoder {
    format: ImageFormat,
}

impl RasterDecoder {
    pub const fn new(format: ImageFormat) -> Self {
        Self { format }
    }
}

impl Decoder for RasterDecoder {
    fn header_dimensions(&self, stream: &mut dyn ImageStream) -> Result<ImageDimensions> {
        let (width, height) = ImageReader::with_format(stream, self.format)
            .into_dimensions()
            .with_context(|| format!("reading {:?} header", self.format))?;
        Ok(ImageDimensions::new(width, height))
    }

    fn decode(&self, stream: &mut dyn ImageStream, orientation_correction: bool) -> Result<Bitmap> {
        let mut decoder = ImageReader::with_format(stream, self.format).into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut image = DynamicImage::from_decoder(decoder)?;

        if orientation_correction {
            image.apply_orientation(orientation);
        }

        into_bitmap(image)
    }
}

/// Keeps 8 bit layouts as they are and widens everything else to RGBA.
fn into_bitmap(image: DynamicImage) -> Result<Bitmap> {
    let (width, height) = (image.width(), image.height());
    let (format, pixels) = match image {
        DynamicImage::ImageLuma8(buffer) => (PixelFormat::L8, buffer.into_raw()),
        DynamicImage::ImageLumaA8(buffer) => (PixelFormat::La88, buffer.into_raw()),
        DynamicImage::ImageRgb8(buffer) => (PixelFormat::Rgb888, buffer.into_raw()),
        DynamicImage::ImageRgba8(buffer) => (PixelFormat::Rgba8888, buffer.into_raw()),
        other => (PixelFormat::Rgba8888, other.to_rgba8().into_raw()),
    };

    Bitmap::from_pixels(width, height, format, pixels)
        .context("decoded buffer does not match its dimensions")
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use imageproc::image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    use super::*;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn keeps_eight_bit_layouts() {
        let cases = [
            (
                DynamicImage::ImageLuma8(GrayImage::from_pixel(5, 3, Luma([9]))),
                PixelFormat::L8,
            ),
            (
                DynamicImage::ImageRgb8(RgbImage::from_pixel(5, 3, Rgb([1, 2, 3]))),
                PixelFormat::Rgb888,
            ),
            (
                DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 3, Rgba([1, 2, 3, 4]))),
                PixelFormat::Rgba8888,
            ),
        ];
        for (image, expected) in cases {
            let png = encode(image, ImageFormat::Png);
            let decoder = RasterDecoder::new(ImageFormat::Png);
            let mut stream = Cursor::new(png);

            let dims = decoder.header_dimensions(&mut stream).unwrap();
            assert_eq!(dims, ImageDimensions::new(5, 3));

            stream.set_position(0);
            let bitmap = decoder.decode(&mut stream, true).unwrap();
            assert_eq!(bitmap.format(), expected);
            assert_eq!(bitmap.dimensions(), (5, 3));
        }
    }

    #[test]
    fn sixteen_bit_widens_to_rgba() {
        let image = DynamicImage::new_rgb16(4, 4);
        let bitmap = into_bitmap(image).unwrap();
        assert_eq!(bitmap.format(), PixelFormat::Rgba8888);
        assert_eq!(bitmap.buffer().len(), 4 * 4 * 4);
    }

    #[test]
    fn decodes_bmp_and_gif() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 2, Rgb([200, 100, 50])));
        for format in [ImageFormat::Bmp, ImageFormat::Gif] {
            let bytes = encode(image.clone(), format);
            let bitmap = RasterDecoder::new(format)
                .decode(&mut Cursor::new(bytes), false)
                .unwrap();
            assert_eq!(bitmap.dimensions(), (6, 2), "{format:?}");
        }
    }

    #[test]
    fn rejects_other_formats() {
        let png = encode(DynamicImage::new_luma8(2, 2), ImageFormat::Png);
        let jpeg = RasterDecoder::new(ImageFormat::Jpeg);
        assert!(jpeg.header_dimensions(&mut Cursor::new(png)).is_err());
    }
}
