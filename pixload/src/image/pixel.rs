//! Bit exact pixel arithmetic used by the rescaler
//!
//! Every routine works on caller owned slices. Nothing here allocates.

use crate::bitmap::PixelFormat;

/// Truncating mean of two components.
#[inline(always)]
pub fn average_component(a: u32, b: u32) -> u32 {
    ((a as u64 + b as u64) >> 1) as u32
}

/// Per byte mean of two RGBA8888 pixels packed into native endian words.
#[inline(always)]
pub fn average_pixel_rgba8888(a: u32, b: u32) -> u32 {
    // The top byte is shifted down first so the sum cannot overflow 32 bits
    ((average_component((a & 0xff00_0000) >> 1, (b & 0xff00_0000) >> 1) << 1) & 0xff00_0000)
        + (average_component(a & 0x00ff_0000, b & 0x00ff_0000) & 0x00ff_0000)
        + (average_component(a & 0x0000_ff00, b & 0x0000_ff00) & 0x0000_ff00)
        + average_component(a & 0x0000_00ff, b & 0x0000_00ff)
}

/// Per channel mean of two 5:6:5 pixels.
#[inline(always)]
pub fn average_pixel_rgb565(a: u16, b: u16) -> u16 {
    let (a, b) = (a as u32, b as u32);
    ((average_component(a & 0xf800, b & 0xf800) & 0xf800)
        + (average_component(a & 0x07e0, b & 0x07e0) & 0x07e0)
        + average_component(a & 0x001f, b & 0x001f)) as u16
}

/// `a * (1 - f) + b * f` with `f` in 0.16 fixed point, giving a 16.16 result.
#[inline(always)]
pub fn weighted_blend_int_to_fixed1616(a: u32, b: u32, fract: u32) -> u32 {
    a * (65535 - fract) + b * fract
}

/// Second blending stage, widening 16.16 inputs to a 16.32 result.
#[inline(always)]
pub fn weighted_blend_fixed1616_to_fixed1632(a: u32, b: u32, fract: u32) -> u64 {
    a as u64 * (65535 - fract) as u64 + b as u64 * fract as u64
}

/// Bilinear interpolation of one component between four taps.
///
/// `fract_h` blends left to right, `fract_v` top to bottom, both in 0.16
/// fixed point.
#[inline(always)]
pub fn bilinear_filter_1_component(
    top_left: u32,
    top_right: u32,
    bottom_left: u32,
    bottom_right: u32,
    fract_h: u32,
    fract_v: u32,
) -> u32 {
    let top = weighted_blend_int_to_fixed1616(top_left, top_right, fract_h);
    let bottom = weighted_blend_int_to_fixed1616(bottom_left, bottom_right, fract_h);
    let blended = weighted_blend_fixed1616_to_fixed1632(top, bottom, fract_v);
    ((blended + (1 << 31)) >> 32) as u32
}

#[inline(always)]
fn average_bytes<const N: usize>(a: [u8; N], b: [u8; N]) -> [u8; N] {
    std::array::from_fn(|i| average_component(a[i] as u32, b[i] as u32) as u8)
}

#[inline(always)]
fn blend_bytes<const N: usize>(
    tl: [u8; N],
    tr: [u8; N],
    bl: [u8; N],
    br: [u8; N],
    fract_h: u32,
    fract_v: u32,
) -> [u8; N] {
    std::array::from_fn(|i| {
        bilinear_filter_1_component(
            tl[i] as u32,
            tr[i] as u32,
            bl[i] as u32,
            br[i] as u32,
            fract_h,
            fract_v,
        ) as u8
    })
}

/// Load, store and filter operations for one packed pixel layout.
pub(crate) trait PixelCodec {
    const BYTES_PER_PIXEL: usize;
    type Pixel: Copy;

    fn load(bytes: &[u8]) -> Self::Pixel;
    fn store(pixel: Self::Pixel, bytes: &mut [u8]);
    fn average(a: Self::Pixel, b: Self::Pixel) -> Self::Pixel;
    fn blend(
        top_left: Self::Pixel,
        top_right: Self::Pixel,
        bottom_left: Self::Pixel,
        bottom_right: Self::Pixel,
        fract_h: u32,
        fract_v: u32,
    ) -> Self::Pixel;

    #[inline(always)]
    fn read(buffer: &[u8], index: usize) -> Self::Pixel {
        let start = index * Self::BYTES_PER_PIXEL;
        Self::load(&buffer[start..start + Self::BYTES_PER_PIXEL])
    }

    #[inline(always)]
    fn write(buffer: &mut [u8], index: usize, pixel: Self::Pixel) {
        let start = index * Self::BYTES_PER_PIXEL;
        Self::store(pixel, &mut buffer[start..start + Self::BYTES_PER_PIXEL]);
    }

    /// Averages neighbouring pairs of the first `width` pixels into the
    /// first `width / 2` slots. A trailing odd pixel is dropped.
    fn halve_scanline(scanline: &mut [u8], width: usize) {
        if width < 2 {
            return;
        }
        let last_pair = (width - 2) & !1;
        for (out, pixel) in (0..=last_pair).step_by(2).enumerate() {
            let left = Self::read(scanline, pixel);
            let right = Self::read(scanline, pixel + 1);
            let averaged = Self::average(left, right);
            Self::write(scanline, out, averaged);
        }
    }
}

pub(crate) struct Rgba8888;

impl PixelCodec for Rgba8888 {
    const BYTES_PER_PIXEL: usize = 4;
    type Pixel = u32;

    #[inline(always)]
    fn load(bytes: &[u8]) -> u32 {
        u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline(always)]
    fn store(pixel: u32, bytes: &mut [u8]) {
        bytes.copy_from_slice(&pixel.to_ne_bytes());
    }

    #[inline(always)]
    fn average(a: u32, b: u32) -> u32 {
        average_pixel_rgba8888(a, b)
    }

    #[inline(always)]
    fn blend(tl: u32, tr: u32, bl: u32, br: u32, fract_h: u32, fract_v: u32) -> u32 {
        u32::from_ne_bytes(blend_bytes(
            tl.to_ne_bytes(),
            tr.to_ne_bytes(),
            bl.to_ne_bytes(),
            br.to_ne_bytes(),
            fract_h,
            fract_v,
        ))
    }
}

pub(crate) struct Rgb888;

impl PixelCodec for Rgb888 {
    const BYTES_PER_PIXEL: usize = 3;
    type Pixel = [u8; 3];

    #[inline(always)]
    fn load(bytes: &[u8]) -> [u8; 3] {
        [bytes[0], bytes[1], bytes[2]]
    }

    #[inline(always)]
    fn store(pixel: [u8; 3], bytes: &mut [u8]) {
        bytes.copy_from_slice(&pixel);
    }

    #[inline(always)]
    fn average(a: [u8; 3], b: [u8; 3]) -> [u8; 3] {
        average_bytes(a, b)
    }

    #[inline(always)]
    fn blend(
        tl: [u8; 3],
        tr: [u8; 3],
        bl: [u8; 3],
        br: [u8; 3],
        fract_h: u32,
        fract_v: u32,
    ) -> [u8; 3] {
        blend_bytes(tl, tr, bl, br, fract_h, fract_v)
    }
}

pub(crate) struct Rgb565;

impl Rgb565 {
    #[inline(always)]
    fn channels(pixel: u16) -> [u32; 3] {
        let pixel = pixel as u32;
        [pixel >> 11, (pixel >> 5) & 63, pixel & 31]
    }
}

impl PixelCodec for Rgb565 {
    const BYTES_PER_PIXEL: usize = 2;
    type Pixel = u16;

    #[inline(always)]
    fn load(bytes: &[u8]) -> u16 {
        u16::from_ne_bytes([bytes[0], bytes[1]])
    }

    #[inline(always)]
    fn store(pixel: u16, bytes: &mut [u8]) {
        bytes.copy_from_slice(&pixel.to_ne_bytes());
    }

    #[inline(always)]
    fn average(a: u16, b: u16) -> u16 {
        average_pixel_rgb565(a, b)
    }

    #[inline(always)]
    fn blend(tl: u16, tr: u16, bl: u16, br: u16, fract_h: u32, fract_v: u32) -> u16 {
        let (tl, tr, bl, br) = (
            Self::channels(tl),
            Self::channels(tr),
            Self::channels(bl),
            Self::channels(br),
        );
        let [r, g, b]: [u32; 3] = std::array::from_fn(|i| {
            bilinear_filter_1_component(tl[i], tr[i], bl[i], br[i], fract_h, fract_v)
        });
        ((r << 11) + (g << 5) + b) as u16
    }
}

/// Two byte pixels such as LA88.
pub(crate) struct ComponentPair;

impl PixelCodec for ComponentPair {
    const BYTES_PER_PIXEL: usize = 2;
    type Pixel = [u8; 2];

    #[inline(always)]
    fn load(bytes: &[u8]) -> [u8; 2] {
        [bytes[0], bytes[1]]
    }

    #[inline(always)]
    fn store(pixel: [u8; 2], bytes: &mut [u8]) {
        bytes.copy_from_slice(&pixel);
    }

    #[inline(always)]
    fn average(a: [u8; 2], b: [u8; 2]) -> [u8; 2] {
        average_bytes(a, b)
    }

    #[inline(always)]
    fn blend(
        tl: [u8; 2],
        tr: [u8; 2],
        bl: [u8; 2],
        br: [u8; 2],
        fract_h: u32,
        fract_v: u32,
    ) -> [u8; 2] {
        blend_bytes(tl, tr, bl, br, fract_h, fract_v)
    }
}

/// One byte pixels, L8 and A8.
pub(crate) struct SingleByte;

impl PixelCodec for SingleByte {
    const BYTES_PER_PIXEL: usize = 1;
    type Pixel = u8;

    #[inline(always)]
    fn load(bytes: &[u8]) -> u8 {
        bytes[0]
    }

    #[inline(always)]
    fn store(pixel: u8, bytes: &mut [u8]) {
        bytes[0] = pixel;
    }

    #[inline(always)]
    fn average(a: u8, b: u8) -> u8 {
        average_component(a as u32, b as u32) as u8
    }

    #[inline(always)]
    fn blend(tl: u8, tr: u8, bl: u8, br: u8, fract_h: u32, fract_v: u32) -> u8 {
        bilinear_filter_1_component(
            tl as u32, tr as u32, bl as u32, br as u32, fract_h, fract_v,
        ) as u8
    }
}

/// Calls `$body` with `$codec` bound to the codec for a packed `$format`,
/// or evaluates `$otherwise` for compressed formats.
macro_rules! with_codec {
    ($format:expr, $codec:ident => $body:expr, _ => $otherwise:expr) => {{
        use $crate::bitmap::PixelFormat as F;
        use $crate::image::pixel as p;
        match $format {
            F::Rgba8888 => {
                type $codec = p::Rgba8888;
                $body
            }
            F::Rgb888 => {
                type $codec = p::Rgb888;
                $body
            }
            F::Rgb565 => {
                type $codec = p::Rgb565;
                $body
            }
            F::La88 => {
                type $codec = p::ComponentPair;
                $body
            }
            F::L8 | F::A8 => {
                type $codec = p::SingleByte;
                $body
            }
            _ => $otherwise,
        }
    }};
}
pub(crate) use with_codec;

/// Box halves the first `width` pixels of a scanline in place.
pub fn halve_scanline_in_place(scanline: &mut [u8], width: usize, format: PixelFormat) {
    if scanline.len() < width * format.bytes_per_pixel() {
        log::warn!(
            "Scanline of {} bytes is too short for {width} {format} pixels",
            scanline.len()
        );
        return;
    }
    with_codec!(format, C => C::halve_scanline(scanline, width), _ => ())
}
