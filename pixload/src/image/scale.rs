//! Power of two box decimation plus nearest and bilinear resampling

use crate::bitmap::PixelFormat;
use crate::request::{FittingMode, ImageDimensions};

use super::pixel::{with_codec, PixelCodec};

/// Which axes must stay at or above the target while box halving.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoxDimensionTest {
    Either,
    Both,
    X,
    Y,
}

impl From<FittingMode> for BoxDimensionTest {
    fn from(mode: FittingMode) -> Self {
        match mode {
            FittingMode::ShrinkToFit => BoxDimensionTest::Either,
            FittingMode::ScaleToFill => BoxDimensionTest::Both,
            FittingMode::FitWidth => BoxDimensionTest::X,
            FittingMode::FitHeight => BoxDimensionTest::Y,
        }
    }
}

/// Whether one more halving still satisfies `test` against the target.
pub fn continue_scaling(
    test: BoxDimensionTest,
    current: ImageDimensions,
    desired: ImageDimensions,
) -> bool {
    let next_w = current.width >> 1;
    let next_h = current.height >> 1;
    if next_w < 1 || next_h < 1 {
        return false;
    }

    match test {
        BoxDimensionTest::Either => next_w >= desired.width || next_h >= desired.height,
        BoxDimensionTest::Both => next_w >= desired.width && next_h >= desired.height,
        BoxDimensionTest::X => next_w >= desired.width,
        BoxDimensionTest::Y => next_h >= desired.height,
    }
}

fn packed_len(dimensions: ImageDimensions, bytes_per_pixel: usize) -> usize {
    dimensions.width as usize * dimensions.height as usize * bytes_per_pixel
}

/// Repeatedly box halves `pixels` in place while `test` allows it and
/// returns the dimensions of the top left region now holding the image.
///
/// A buffer shorter than `input` or a compressed format leaves the pixels
/// untouched and returns `input`.
pub fn downscale_in_place_pow2(
    pixels: &mut [u8],
    format: PixelFormat,
    input: ImageDimensions,
    desired: ImageDimensions,
    test: BoxDimensionTest,
) -> ImageDimensions {
    if pixels.len() < packed_len(input, format.bytes_per_pixel()) {
        log::warn!(
            "Refusing to box filter {}x{} {format}: buffer holds only {} bytes",
            input.width,
            input.height,
            pixels.len()
        );
        return input;
    }

    with_codec!(
        format,
        C => downscale_pow2::<C>(pixels, input, desired, test),
        _ => input
    )
}

fn downscale_pow2<C: PixelCodec>(
    pixels: &mut [u8],
    input: ImageDimensions,
    desired: ImageDimensions,
    test: BoxDimensionTest,
) -> ImageDimensions {
    let bpp = C::BYTES_PER_PIXEL;
    let mut current = input;

    while continue_scaling(test, current, desired) {
        let last_width = current.width as usize;
        current = ImageDimensions::new(current.width >> 1, current.height >> 1);
        let width = current.width as usize;
        let last_stride = last_width * bpp;

        for y in 0..current.height as usize {
            let row1 = 2 * y * last_stride;
            let row2 = row1 + last_stride;
            C::halve_scanline(&mut pixels[row1..row2], last_width);
            C::halve_scanline(&mut pixels[row2..row2 + last_stride], last_width);

            // Output row y never overlaps input rows still to be read
            let out = y * width * bpp;
            for x in 0..width {
                let top = C::read(&pixels[row1..], x);
                let bottom = C::read(&pixels[row2..], x);
                C::write(&mut pixels[out..], x, C::average(top, bottom));
            }
        }
    }

    current
}

fn check_sampling_buffers(
    input: &[u8],
    input_size: ImageDimensions,
    output: &[u8],
    output_size: ImageDimensions,
    bpp: usize,
) -> bool {
    if input_size.area() == 0 || output_size.area() == 0 || bpp == 0 {
        return false;
    }
    if input.len() < packed_len(input_size, bpp) || output.len() < packed_len(output_size, bpp) {
        log::warn!(
            "Sampling buffers too small for {}x{} -> {}x{}",
            input_size.width,
            input_size.height,
            output_size.width,
            output_size.height
        );
        return false;
    }
    true
}

/// Nearest neighbour resample of `input` into `output`.
///
/// Does nothing when any dimension is zero.
pub fn point_sample(
    input: &[u8],
    input_size: ImageDimensions,
    format: PixelFormat,
    output: &mut [u8],
    output_size: ImageDimensions,
) {
    if !check_sampling_buffers(input, input_size, output, output_size, format.bytes_per_pixel()) {
        return;
    }
    with_codec!(
        format,
        C => point_sample_generic::<C>(input, input_size, output, output_size),
        _ => ()
    )
}

fn point_sample_generic<C: PixelCodec>(
    input: &[u8],
    input_size: ImageDimensions,
    output: &mut [u8],
    output_size: ImageDimensions,
) {
    let in_w = input_size.width as u64;
    let in_h = input_size.height as u64;
    let out_w = output_size.width as usize;
    let delta_x = (in_w << 16) / output_size.width as u64;
    let delta_y = (in_h << 16) / output_size.height as u64;
    let stride = input_size.width as usize * C::BYTES_PER_PIXEL;

    let mut in_y = 0u64;
    for out_y in 0..output_size.height as usize {
        let row_index = ((in_y + (1 << 15)) >> 16).min(in_h - 1) as usize;
        let row = &input[row_index * stride..(row_index + 1) * stride];

        let mut in_x = 0u64;
        for out_x in 0..out_w {
            let column = ((in_x + (1 << 15)) >> 16).min(in_w - 1) as usize;
            C::write(output, out_y * out_w + out_x, C::read(row, column));
            in_x += delta_x;
        }
        in_y += delta_y;
    }
}

/// Bilinear resample of `input` into `output`.
///
/// The second tap on each axis is clamped to the last row or column.
pub fn linear_sample(
    input: &[u8],
    input_size: ImageDimensions,
    format: PixelFormat,
    output: &mut [u8],
    output_size: ImageDimensions,
) {
    if !check_sampling_buffers(input, input_size, output, output_size, format.bytes_per_pixel()) {
        return;
    }
    with_codec!(
        format,
        C => linear_sample_generic::<C>(input, input_size, output, output_size),
        _ => ()
    )
}

fn linear_sample_generic<C: PixelCodec>(
    input: &[u8],
    input_size: ImageDimensions,
    output: &mut [u8],
    output_size: ImageDimensions,
) {
    let in_w = input_size.width as u64;
    let in_h = input_size.height as u64;
    let out_w = output_size.width as usize;
    let delta_x = (in_w << 16) / output_size.width as u64;
    let delta_y = (in_h << 16) / output_size.height as u64;
    let stride = input_size.width as usize * C::BYTES_PER_PIXEL;

    let mut in_y = 0u64;
    for out_y in 0..output_size.height as usize {
        let y1 = (in_y >> 16).min(in_h - 1) as usize;
        let y2 = (y1 + 1).min(in_h as usize - 1);
        let fract_v = (in_y & 0xffff) as u32;
        let top = &input[y1 * stride..(y1 + 1) * stride];
        let bottom = &input[y2 * stride..(y2 + 1) * stride];

        let mut in_x = 0u64;
        for out_x in 0..out_w {
            let x1 = (in_x >> 16).min(in_w - 1) as usize;
            let x2 = (x1 + 1).min(in_w as usize - 1);
            let fract_h = (in_x & 0xffff) as u32;

            let blended = C::blend(
                C::read(top, x1),
                C::read(top, x2),
                C::read(bottom, x1),
                C::read(bottom, x2),
                fract_h,
                fract_v,
            );
            C::write(output, out_y * out_w + out_x, blended);
            in_x += delta_x;
        }
        in_y += delta_y;
    }
}

/// Largest rectangle with the aspect ratio of `source` that the fitting
/// mode allows inside `target`. Never larger than `source`.
pub fn fit_to_target(
    mode: FittingMode,
    target: ImageDimensions,
    source: ImageDimensions,
) -> ImageDimensions {
    let scale_x = target.width as f32 / source.width as f32;
    let scale_y = target.height as f32 / source.height as f32;
    let scale = match mode {
        FittingMode::ShrinkToFit => scale_x.min(scale_y),
        FittingMode::ScaleToFill => scale_x.max(scale_y),
        FittingMode::FitWidth => scale_x,
        FittingMode::FitHeight => scale_y,
    };

    if scale >= 1.0 {
        return source;
    }

    ImageDimensions::new(
        (source.width as f32 * scale + 0.5) as u32,
        (source.height as f32 * scale + 0.5) as u32,
    )
}
