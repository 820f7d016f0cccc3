//! Decoded pixel buffers

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter};

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    TryFromPrimitive,
    EnumCount,
    EnumIter,
    Display,
)]
#[repr(u8)]
pub enum PixelFormat {
    A8 = 0,
    L8 = 1,
    La88 = 2,
    Rgb565 = 3,
    Rgb888 = 4,
    Rgba8888 = 5,

    // Compressed blocks, passed through untouched
    R11Eac = 6,
    SignedR11Eac = 7,
    Rg11Eac = 8,
    SignedRg11Eac = 9,
    Rgb8Etc2 = 10,
    Srgb8Etc2 = 11,
    Rgb8PunchthroughAlpha1Etc2 = 12,
    Srgb8PunchthroughAlpha1Etc2 = 13,
    Rgba8Etc2Eac = 14,
    Srgb8Alpha8Etc2Eac = 15,
    Rgb8Etc1 = 16,
    RgbPvrtc4bppv1 = 17,
}

impl PixelFormat {
    pub fn len() -> usize {
        Self::COUNT
    }

    pub fn iter() -> impl Iterator<Item = Self> {
        <Self as strum::IntoEnumIterator>::iter()
    }

    /// Bytes per pixel for packed formats, zero for compressed ones.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::A8 | PixelFormat::L8 => 1,
            PixelFormat::La88 | PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgba8888 => 4,
            _ => 0,
        }
    }

    pub fn is_compressed(self) -> bool {
        self.bytes_per_pixel() == 0
    }

    pub fn has_alpha(self) -> bool {
        self.alpha_offset().is_some()
    }

    /// Byte offset of the alpha channel inside one packed pixel.
    pub fn alpha_offset(self) -> Option<usize> {
        match self {
            PixelFormat::A8 => Some(0),
            PixelFormat::La88 => Some(1),
            PixelFormat::Rgba8888 => Some(3),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Profile {
    Packed,
    Compressed,
}

/// An image held in memory.
///
/// Packed bitmaps always hold exactly `width * height * bytes_per_pixel`
/// bytes. Compressed bitmaps hold an opaque blob whose size depends on the
/// block format.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    format: PixelFormat,
    profile: Profile,
    buffer: Vec<u8>,
    fully_opaque: bool,
}

impl Bitmap {
    /// Zero filled packed bitmap.
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            profile: Profile::Packed,
            buffer: vec![0; len],
            fully_opaque: !format.has_alpha(),
        }
    }

    /// Wraps already decoded pixels, returning `None` when the buffer length
    /// does not match the dimensions.
    pub fn from_pixels(
        width: u32,
        height: u32,
        format: PixelFormat,
        buffer: Vec<u8>,
    ) -> Option<Self> {
        if format.is_compressed()
            || buffer.len() != width as usize * height as usize * format.bytes_per_pixel()
        {
            return None;
        }

        Some(Self {
            width,
            height,
            format,
            profile: Profile::Packed,
            buffer,
            fully_opaque: !format.has_alpha(),
        })
    }

    pub fn compressed(width: u32, height: u32, format: PixelFormat, blob: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            profile: Profile::Compressed,
            buffer: blob,
            fully_opaque: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn is_packed(&self) -> bool {
        self.profile == Profile::Packed
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_pixel()
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    /// Keeps only the leading `width * height` pixels.
    pub(crate) fn truncate_packed(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize * self.bytes_per_pixel();
        debug_assert!(len <= self.buffer.len());
        self.buffer.truncate(len);
        self.buffer.shrink_to_fit();
        self.width = width;
        self.height = height;
    }

    pub(crate) fn replace_pixels(&mut self, width: u32, height: u32, buffer: Vec<u8>) {
        debug_assert_eq!(
            buffer.len(),
            width as usize * height as usize * self.bytes_per_pixel()
        );
        self.buffer = buffer;
        self.width = width;
        self.height = height;
    }

    pub fn is_fully_opaque(&self) -> bool {
        self.fully_opaque
    }

    /// Scans the alpha channel and records whether every pixel is opaque.
    pub fn test_for_transparency(&mut self) {
        self.fully_opaque = match (self.profile, self.format.alpha_offset()) {
            (Profile::Packed, Some(offset)) => {
                let bpp = self.format.bytes_per_pixel();
                self.buffer
                    .chunks_exact(bpp)
                    .all(|pixel| pixel[offset] == 0xff)
            }
            (Profile::Packed, None) => true,
            (Profile::Compressed, _) => false,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_buffers_are_exactly_sized() {
        for format in PixelFormat::iter().filter(|f| !f.is_compressed()) {
            let bitmap = Bitmap::packed(7, 3, format);
            assert_eq!(bitmap.buffer().len(), 7 * 3 * format.bytes_per_pixel());
            assert_eq!(bitmap.stride(), 7 * format.bytes_per_pixel());
        }
    }

    #[test]
    fn from_pixels_rejects_wrong_length() {
        assert!(Bitmap::from_pixels(2, 2, PixelFormat::Rgb888, vec![0; 11]).is_none());
        let pixels: Vec<u8> = (0..12).collect();
        let bitmap = Bitmap::from_pixels(2, 2, PixelFormat::Rgb888, pixels.clone()).unwrap();
        assert_eq!(bitmap.into_buffer(), pixels);
        assert!(Bitmap::from_pixels(2, 2, PixelFormat::Rgb8Etc2, vec![0; 8]).is_none());
    }

    #[test]
    fn format_round_trips_through_its_discriminant() {
        assert_eq!(PixelFormat::len(), 18);
        for format in PixelFormat::iter() {
            assert_eq!(PixelFormat::try_from(format as u8).ok(), Some(format));
        }
    }

    #[test]
    fn transparency_follows_alpha_channel() {
        let mut opaque =
            Bitmap::from_pixels(2, 1, PixelFormat::La88, vec![10, 255, 20, 255]).unwrap();
        opaque.test_for_transparency();
        assert!(opaque.is_fully_opaque());

        let mut translucent =
            Bitmap::from_pixels(2, 1, PixelFormat::Rgba8888, vec![0, 0, 0, 255, 0, 0, 0, 128])
                .unwrap();
        translucent.test_for_transparency();
        assert!(!translucent.is_fully_opaque());

        let mut grey = Bitmap::packed(4, 4, PixelFormat::L8);
        grey.test_for_transparency();
        assert!(grey.is_fully_opaque());
    }
}
