//! Image decoding and the rescaling pipeline

mod decode;
mod ktx;
mod pixel;
mod raster;
mod scale;
mod transform;
mod wbmp;

// Re-export public API
pub use decode::{
    closest_image_size, closest_image_size_from_buffer, closest_image_size_from_stream,
    convert_stream_to_bitmap, find_format, Decoder, ImageFileFormat, ImageStream,
};
pub use ktx::{encode_ktx, InternalFormat, KtxDecoder};
pub use pixel::{
    average_component, average_pixel_rgb565, average_pixel_rgba8888,
    bilinear_filter_1_component, halve_scanline_in_place, weighted_blend_fixed1616_to_fixed1632,
    weighted_blend_int_to_fixed1616,
};
pub use raster::RasterDecoder;
pub use scale::{
    continue_scaling, downscale_in_place_pow2, fit_to_target, linear_sample, point_sample,
    BoxDimensionTest,
};
pub use transform::{
    apply_attributes_to_bitmap, calculate_desired_dimensions, crop_for_scale_to_fill,
    downscale_bitmap, predict_dimensions,
};
pub use wbmp::WbmpDecoder;
