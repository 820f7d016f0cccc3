//! Fitting decoded bitmaps to the requested size: downscaling and fill cropping

use crate::bitmap::Bitmap;
use crate::request::{FittingMode, ImageDimensions, SamplingMode};

use super::scale::{self, BoxDimensionTest};

/// Resolves a requested size with zero placeholders against the source.
pub fn calculate_desired_dimensions(
    source: ImageDimensions,
    requested: ImageDimensions,
) -> ImageDimensions {
    match (requested.width, requested.height) {
        (0, 0) => source,
        (0, height) => ImageDimensions::new(
            (source.width as f32 / source.height as f32 * height as f32 + 0.5) as u32,
            height,
        ),
        (width, 0) => ImageDimensions::new(
            width,
            (source.height as f32 / source.width as f32 * width as f32 + 0.5) as u32,
        ),
        _ => requested,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Sampler {
    Point,
    Linear,
}

fn secondary_sampler(sampling: SamplingMode) -> Option<Sampler> {
    match sampling {
        SamplingMode::Nearest | SamplingMode::BoxThenNearest => Some(Sampler::Point),
        SamplingMode::Linear | SamplingMode::BoxThenLinear => Some(Sampler::Linear),
        _ => None,
    }
}

fn should_downscale(source: ImageDimensions, desired: ImageDimensions) -> bool {
    desired.width > 0
        && desired.height > 0
        && (desired.width < source.width || desired.height < source.height)
}

/// Target of the secondary pass, if one runs after box filtering to `shrunk`.
fn secondary_target(
    shrunk: ImageDimensions,
    desired: ImageDimensions,
    fitting: FittingMode,
    sampling: SamplingMode,
) -> Option<(Sampler, ImageDimensions)> {
    let sampler = secondary_sampler(sampling)?;
    let filtered = scale::fit_to_target(fitting, desired, shrunk);
    let smaller = filtered.width < shrunk.width || filtered.height < shrunk.height;
    (smaller && filtered.area() > 0).then_some((sampler, filtered))
}

fn box_filtered_dimensions(
    source: ImageDimensions,
    desired: ImageDimensions,
    fitting: FittingMode,
    sampling: SamplingMode,
) -> ImageDimensions {
    if !sampling.uses_box_filter() {
        return source;
    }
    let test = BoxDimensionTest::from(fitting);
    let mut current = source;
    while scale::continue_scaling(test, current, desired) {
        current = ImageDimensions::new(current.width >> 1, current.height >> 1);
    }
    current
}

/// Shrinks a packed bitmap towards `desired`. Never upscales.
pub fn downscale_bitmap(
    mut bitmap: Bitmap,
    desired: ImageDimensions,
    fitting: FittingMode,
    sampling: SamplingMode,
) -> Bitmap {
    let source = ImageDimensions::from(bitmap.dimensions());
    if !bitmap.is_packed() || !should_downscale(source, desired) {
        return bitmap;
    }

    let format = bitmap.format();
    let shrunk = if sampling.uses_box_filter() {
        scale::downscale_in_place_pow2(
            bitmap.buffer_mut(),
            format,
            source,
            desired,
            fitting.into(),
        )
    } else {
        source
    };

    if let Some((sampler, filtered)) = secondary_target(shrunk, desired, fitting, sampling) {
        let mut output = Bitmap::packed(filtered.width, filtered.height, format);
        let len = shrunk.width as usize * shrunk.height as usize * format.bytes_per_pixel();
        let input = &bitmap.buffer()[..len];
        match sampler {
            Sampler::Point => {
                scale::point_sample(input, shrunk, format, output.buffer_mut(), filtered)
            }
            Sampler::Linear => {
                scale::linear_sample(input, shrunk, format, output.buffer_mut(), filtered)
            }
        }
        log::debug!(
            "Resampled {}x{} -> {}x{} ({sampler:?})",
            shrunk.width,
            shrunk.height,
            filtered.width,
            filtered.height
        );
        return output;
    }

    if shrunk != source {
        bitmap.truncate_packed(shrunk.width, shrunk.height);
    }
    bitmap
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Trim {
    Rows(u32),
    Columns(u32),
}

fn plan_crop(input: ImageDimensions, desired: ImageDimensions) -> Option<(Trim, ImageDimensions)> {
    if desired.width < 1 || desired.height < 1 {
        log::warn!(
            "Cannot crop {}x{} to a degenerate {}x{} box",
            input.width,
            input.height,
            desired.width,
            desired.height
        );
        return None;
    }
    if input == desired {
        return None;
    }

    let (in_w, in_h) = (input.width as f32, input.height as f32);
    let (desired_w, desired_h) = (desired.width as f32, desired.height as f32);
    let widths_ratio = in_w / desired_w;
    let heights_ratio = in_h / desired_h;
    let by_width = (desired_w * widths_ratio, desired_h * widths_ratio);
    let by_height = (desired_w * heights_ratio, desired_h * heights_ratio);

    let plan = if by_width.0 * by_width.1 < by_height.0 * by_height.1 {
        let rows = ((by_width.1 - in_h).abs() * 0.5) as u32;
        (
            Trim::Rows(rows),
            ImageDimensions::new(input.width, input.height.saturating_sub(rows * 2)),
        )
    } else {
        let columns = ((by_height.0 - in_w).abs() * 0.5) as u32;
        (
            Trim::Columns(columns),
            ImageDimensions::new(input.width.saturating_sub(columns * 2), input.height),
        )
    };

    match plan.0 {
        Trim::Rows(0) | Trim::Columns(0) => None,
        _ if plan.1.area() == 0 => None,
        _ => Some(plan),
    }
}

/// Crops a packed bitmap symmetrically to the aspect ratio of `desired`.
pub fn crop_for_scale_to_fill(mut bitmap: Bitmap, desired: ImageDimensions) -> Bitmap {
    let input = ImageDimensions::from(bitmap.dimensions());
    let Some((trim, cropped)) = plan_crop(input, desired) else {
        return bitmap;
    };

    let bpp = bitmap.bytes_per_pixel();
    let stride = bitmap.stride();
    let out_stride = cropped.width as usize * bpp;

    let pixels = match trim {
        Trim::Rows(rows) => {
            let start = rows as usize * stride;
            bitmap.buffer()[start..start + cropped.height as usize * stride].to_vec()
        }
        Trim::Columns(columns) => {
            let offset = columns as usize * bpp;
            let mut pixels = Vec::with_capacity(out_stride * cropped.height as usize);
            for row in bitmap.buffer().chunks_exact(stride) {
                pixels.extend_from_slice(&row[offset..offset + out_stride]);
            }
            pixels
        }
    };

    log::debug!(
        "Cropped {}x{} -> {}x{} for scale to fill",
        input.width,
        input.height,
        cropped.width,
        cropped.height
    );
    bitmap.replace_pixels(cropped.width, cropped.height, pixels);
    bitmap
}

/// Runs the full rescaling pipeline on a freshly decoded bitmap.
///
/// Compressed bitmaps are returned untouched.
pub fn apply_attributes_to_bitmap(
    bitmap: Bitmap,
    requested: ImageDimensions,
    fitting: FittingMode,
    sampling: SamplingMode,
) -> Bitmap {
    if !bitmap.is_packed() {
        return bitmap;
    }

    let desired = calculate_desired_dimensions(bitmap.dimensions().into(), requested);
    let mut bitmap = downscale_bitmap(bitmap, desired, fitting, sampling);

    if fitting == FittingMode::ScaleToFill {
        bitmap = crop_for_scale_to_fill(bitmap, desired);
    }

    if bitmap.format().has_alpha() {
        bitmap.test_for_transparency();
    }

    bitmap
}

/// Dimensions `apply_attributes_to_bitmap` produces for a packed image of
/// size `raw`, without touching any pixels.
pub fn predict_dimensions(
    raw: ImageDimensions,
    requested: ImageDimensions,
    fitting: FittingMode,
    sampling: SamplingMode,
) -> ImageDimensions {
    let desired = calculate_desired_dimensions(raw, requested);

    let mut size = raw;
    if should_downscale(raw, desired) {
        let shrunk = box_filtered_dimensions(raw, desired, fitting, sampling);
        size = secondary_target(shrunk, desired, fitting, sampling)
            .map(|(_, filtered)| filtered)
            .unwrap_or(shrunk);
    }

    if fitting == FittingMode::ScaleToFill && desired.width >= 1 && desired.height >= 1 {
        if let Some((_, cropped)) = plan_crop(size, desired) {
            size = cropped;
        }
    }

    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::PixelFormat;

    fn dims(width: u32, height: u32) -> ImageDimensions {
        ImageDimensions::new(width, height)
    }

    fn bitmap(width: u32, height: u32, format: PixelFormat) -> Bitmap {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        let pixels = (0..len).map(|i| (i % 251) as u8).collect();
        Bitmap::from_pixels(width, height, format, pixels).unwrap()
    }

    #[test]
    fn desired_dimensions_follow_aspect_ratio() {
        let source = dims(400, 200);
        assert_eq!(calculate_desired_dimensions(source, dims(0, 0)), source);
        assert_eq!(calculate_desired_dimensions(source, dims(100, 0)), dims(100, 50));
        assert_eq!(calculate_desired_dimensions(source, dims(0, 50)), dims(100, 50));
        assert_eq!(calculate_desired_dimensions(source, dims(30, 70)), dims(30, 70));
        assert_eq!(calculate_desired_dimensions(dims(3, 2), dims(0, 1)), dims(2, 1));
    }

    #[test]
    fn shrink_to_fit_box_stops_at_power_of_two() {
        let cases: &[(PixelFormat, u32, u32, u32)] = &[
            (PixelFormat::Rgba8888, 47, 7, 11),
            (PixelFormat::Rgb888, 73, 17, 18),
            (PixelFormat::Rgb565, 61, 8, 15),
            (PixelFormat::La88, 19, 5, 9),
            (PixelFormat::L8, 353, 23, 44),
        ];
        for &(format, edge, target, expected) in cases {
            let result = apply_attributes_to_bitmap(
                bitmap(edge, edge, format),
                dims(target, target),
                FittingMode::ShrinkToFit,
                SamplingMode::Box,
            );
            assert_eq!(result.dimensions(), (expected, expected), "{format} {edge}");
            assert_eq!(result.format(), format);
            assert_eq!(
                result.buffer().len(),
                (expected * expected) as usize * format.bytes_per_pixel()
            );
        }
    }

    #[test]
    fn large_images_reach_exact_power_of_two_targets() {
        for format in PixelFormat::iter().filter(|f| !f.is_compressed()) {
            let result = apply_attributes_to_bitmap(
                bitmap(1024, 1024, format),
                dims(8, 8),
                FittingMode::ShrinkToFit,
                SamplingMode::Box,
            );
            assert_eq!(result.dimensions(), (8, 8), "{format}");
            assert_eq!(result.format(), format);
        }
    }

    #[test]
    fn odd_sizes_collapse_to_a_single_pixel() {
        let cases = [
            (PixelFormat::Rgba8888, 773),
            (PixelFormat::Rgb888, 787),
            (PixelFormat::Rgb565, 797),
            (PixelFormat::La88, 803),
            (PixelFormat::L8, 809),
            (PixelFormat::A8, 811),
        ];
        for (format, edge) in cases {
            let result = apply_attributes_to_bitmap(
                bitmap(edge, edge, format),
                dims(1, 1),
                FittingMode::ShrinkToFit,
                SamplingMode::Box,
            );
            assert_eq!(result.dimensions(), (1, 1), "{format} {edge}");
        }
    }

    #[test]
    fn secondary_pass_hits_exact_fit() {
        for sampling in [
            SamplingMode::Linear,
            SamplingMode::Nearest,
            SamplingMode::BoxThenLinear,
        ] {
            let result = apply_attributes_to_bitmap(
                bitmap(400, 300, PixelFormat::Rgb888),
                dims(100, 100),
                FittingMode::ShrinkToFit,
                sampling,
            );
            assert_eq!(result.dimensions(), (100, 75), "{sampling}");
        }
    }

    #[test]
    fn no_filter_keeps_source_size() {
        let source = bitmap(64, 32, PixelFormat::L8);
        let result = apply_attributes_to_bitmap(
            source.clone(),
            dims(8, 8),
            FittingMode::ShrinkToFit,
            SamplingMode::NoFilter,
        );
        assert_eq!(result, source);
    }

    #[test]
    fn larger_target_is_a_no_op() {
        let source = bitmap(30, 20, PixelFormat::Rgb565);
        let result = apply_attributes_to_bitmap(
            source.clone(),
            dims(300, 200),
            FittingMode::ShrinkToFit,
            SamplingMode::BoxThenLinear,
        );
        assert_eq!(result, source);
    }

    #[test]
    fn crop_trims_columns_symmetrically() {
        let pixels = (0..2).flat_map(|_| 0u8..6).collect();
        let source = Bitmap::from_pixels(6, 2, PixelFormat::L8, pixels).unwrap();
        let cropped = crop_for_scale_to_fill(source, dims(2, 2));
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.buffer(), &[2, 3, 2, 3]);
    }

    #[test]
    fn crop_trims_rows_symmetrically() {
        let pixels = (0u8..6).flat_map(|y| [y, y]).collect();
        let source = Bitmap::from_pixels(2, 6, PixelFormat::L8, pixels).unwrap();
        let cropped = crop_for_scale_to_fill(source, dims(2, 2));
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.buffer(), &[2, 2, 3, 3]);
    }

    #[test]
    fn crop_ignores_degenerate_target() {
        let source = bitmap(6, 2, PixelFormat::L8);
        assert_eq!(crop_for_scale_to_fill(source.clone(), dims(0, 4)), source);
        assert_eq!(crop_for_scale_to_fill(source.clone(), dims(6, 2)), source);
    }

    #[test]
    fn scale_to_fill_matches_target_aspect() {
        let result = apply_attributes_to_bitmap(
            bitmap(200, 100, PixelFormat::L8),
            dims(50, 50),
            FittingMode::ScaleToFill,
            SamplingMode::Box,
        );
        assert_eq!(result.dimensions(), (50, 50));
    }

    #[test]
    fn compressed_bitmaps_pass_through() {
        let blob = Bitmap::compressed(64, 64, PixelFormat::Rgb8Etc2, vec![7; 2048]);
        let result = apply_attributes_to_bitmap(
            blob.clone(),
            dims(8, 8),
            FittingMode::ScaleToFill,
            SamplingMode::BoxThenLinear,
        );
        assert_eq!(result, blob);
    }

    #[test]
    fn alpha_formats_record_opacity() {
        let pixels = [9, 9, 9, 255].repeat(16);
        let opaque = Bitmap::from_pixels(4, 4, PixelFormat::Rgba8888, pixels).unwrap();
        let shrink = |bitmap, size| {
            apply_attributes_to_bitmap(bitmap, size, FittingMode::ShrinkToFit, SamplingMode::Box)
        };
        let result = shrink(opaque, dims(2, 2));
        assert!(result.is_fully_opaque());

        let clear = Bitmap::packed(4, 4, PixelFormat::A8);
        let result = shrink(clear, dims(0, 0));
        assert!(!result.is_fully_opaque());
    }

    #[test]
    fn prediction_agrees_with_pipeline() {
        let sizes = [(640, 480), (97, 211), (1000, 10), (33, 33), (8, 8)];
        let targets = [(0, 0), (64, 0), (0, 50), (100, 100), (7, 300), (1000, 1000)];
        let fittings = [
            FittingMode::ShrinkToFit,
            FittingMode::ScaleToFill,
            FittingMode::FitWidth,
            FittingMode::FitHeight,
        ];
        let samplings = [
            SamplingMode::Box,
            SamplingMode::Nearest,
            SamplingMode::Linear,
            SamplingMode::BoxThenNearest,
            SamplingMode::BoxThenLinear,
            SamplingMode::NoFilter,
        ];

        for (w, h) in sizes {
            for (tw, th) in targets {
                for fitting in fittings {
                    for sampling in samplings {
                        let actual = apply_attributes_to_bitmap(
                            Bitmap::packed(w, h, PixelFormat::L8),
                            dims(tw, th),
                            fitting,
                            sampling,
                        );
                        let predicted =
                            predict_dimensions(dims(w, h), dims(tw, th), fitting, sampling);
                        assert_eq!(
                            ImageDimensions::from(actual.dimensions()),
                            predicted,
                            "{w}x{h} -> {tw}x{th} {fitting} {sampling}"
                        );
                    }
                }
            }
        }
    }
}
