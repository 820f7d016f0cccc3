//! Format detection and decoder dispatch
//!
//! The first two bytes of a stream pick the candidate decoders, a file name
//! extension can move one candidate to the front, and formats without magic
//! bytes are tried last.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::Path;

use anyhow::Result;
use arrayvec::ArrayVec;
use imageproc::image::ImageFormat as CodecFormat;
use strum::{Display, EnumCount, EnumIter, IntoStaticStr};

use crate::bitmap::Bitmap;
use crate::error::LoadError;
use crate::loader::InterruptionPoint;
use crate::request::{ImageAttributes, ImageDimensions};

use super::ktx::KtxDecoder;
use super::raster::RasterDecoder;
use super::transform;
use super::wbmp::WbmpDecoder;

/// Sequential, seekable byte source handed to decoders.
pub trait ImageStream: BufRead + Seek {}

impl<T: BufRead + Seek + ?Sized> ImageStream for T {}

/// One image file format.
///
/// The stream position after a failed call is unspecified; callers rewind.
pub trait Decoder: Send + Sync {
    /// Reads just enough of the stream to report the stored dimensions.
    fn header_dimensions(&self, stream: &mut dyn ImageStream) -> Result<ImageDimensions>;

    fn decode(&self, stream: &mut dyn ImageStream, orientation_correction: bool) -> Result<Bitmap>;
}

static PNG: RasterDecoder = RasterDecoder::new(CodecFormat::Png);
static JPEG: RasterDecoder = RasterDecoder::new(CodecFormat::Jpeg);
static BMP: RasterDecoder = RasterDecoder::new(CodecFormat::Bmp);
static GIF: RasterDecoder = RasterDecoder::new(CodecFormat::Gif);
static ICO: RasterDecoder = RasterDecoder::new(CodecFormat::Ico);

/// Supported file formats in probing order.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, EnumCount, EnumIter, Display, IntoStaticStr,
)]
pub enum ImageFileFormat {
    #[strum(serialize = "PNG")]
    Png,
    #[strum(serialize = "JPEG")]
    Jpeg,
    #[strum(serialize = "BMP")]
    Bmp,
    #[strum(serialize = "GIF")]
    Gif,
    #[strum(serialize = "KTX")]
    Ktx,
    #[strum(serialize = "ICO")]
    Ico,
    #[strum(serialize = "WBMP")]
    Wbmp,
}

impl ImageFileFormat {
    pub fn iter() -> impl Iterator<Item = Self> {
        <Self as strum::IntoEnumIterator>::iter()
    }

    pub fn magic(self) -> Option<[u8; 2]> {
        match self {
            ImageFileFormat::Png => Some([0x89, 0x50]),
            ImageFileFormat::Jpeg => Some([0xFF, 0xD8]),
            ImageFileFormat::Bmp => Some([0x42, 0x4D]),
            ImageFileFormat::Gif => Some([0x47, 0x49]),
            ImageFileFormat::Ktx => Some([0xAB, 0x4B]),
            ImageFileFormat::Ico => Some([0x00, 0x00]),
            ImageFileFormat::Wbmp => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFileFormat::Png => ".png",
            ImageFileFormat::Jpeg => ".jpg",
            ImageFileFormat::Bmp => ".bmp",
            ImageFileFormat::Gif => ".gif",
            ImageFileFormat::Ktx => ".ktx",
            ImageFileFormat::Ico => ".ico",
            ImageFileFormat::Wbmp => ".wbmp",
        }
    }

    /// Format named by the extension of `hint`, which must be longer than
    /// the extension itself.
    pub fn from_hint(hint: &str) -> Option<Self> {
        Self::iter().find(|format| {
            let extension = format.extension();
            hint.len() > extension.len() && hint.ends_with(extension)
        })
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Compressed formats skip rescaling.
    pub fn is_compressed(self) -> bool {
        self == ImageFileFormat::Ktx
    }

    fn decoder(self) -> &'static dyn Decoder {
        match self {
            ImageFileFormat::Png => &PNG,
            ImageFileFormat::Jpeg => &JPEG,
            ImageFileFormat::Bmp => &BMP,
            ImageFileFormat::Gif => &GIF,
            ImageFileFormat::Ktx => &KtxDecoder,
            ImageFileFormat::Ico => &ICO,
            ImageFileFormat::Wbmp => &WbmpDecoder,
        }
    }
}

fn candidates(
    magic: [u8; 2],
    hint: Option<&str>,
) -> ArrayVec<ImageFileFormat, { ImageFileFormat::COUNT }> {
    let hinted = hint.and_then(ImageFileFormat::from_hint);
    let mut candidates = ArrayVec::new();

    if let Some(format) = hinted {
        if format.magic().map_or(true, |m| m == magic) {
            candidates.push(format);
        }
    }

    let matching = ImageFileFormat::iter().filter(|f| f.magic() == Some(magic));
    let magicless = ImageFileFormat::iter().filter(|f| f.magic().is_none());
    for format in matching.chain(magicless) {
        if Some(format) != hinted {
            candidates.push(format);
        }
    }

    candidates
}

/// Finds the first decoder that accepts the stream header.
///
/// Leaves the stream rewound to its start.
pub fn find_format(
    stream: &mut dyn ImageStream,
    hint: Option<&str>,
) -> Result<(ImageFileFormat, ImageDimensions), LoadError> {
    stream.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 2];
    match stream.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            log::debug!("Stream too short to hold magic bytes");
            return Err(LoadError::UnsupportedFormat);
        }
        Err(e) => return Err(e.into()),
    }

    for format in candidates(magic, hint) {
        stream.seek(SeekFrom::Start(0))?;
        match format.decoder().header_dimensions(stream) {
            Ok(dimensions) => {
                stream.seek(SeekFrom::Start(0))?;
                log::debug!(
                    "Detected {format} {}x{}",
                    dimensions.width,
                    dimensions.height
                );
                return Ok((format, dimensions));
            }
            Err(e) => log::debug!("{format} rejected header: {e:#}"),
        }
    }

    stream.seek(SeekFrom::Start(0))?;
    Err(LoadError::UnsupportedFormat)
}

/// Decodes a whole stream and fits the result to `attributes`.
///
/// `interruption` is consulted after the header is read and again after the
/// decoder has run.
pub fn convert_stream_to_bitmap(
    stream: &mut dyn ImageStream,
    hint: Option<&str>,
    attributes: &ImageAttributes,
    interruption: &dyn InterruptionPoint,
) -> Result<Bitmap, LoadError> {
    let (format, _) = find_format(stream, hint)?;
    interruption.check()?;

    let bitmap = format
        .decoder()
        .decode(stream, attributes.orientation_correction)
        .map_err(|reason| LoadError::Decode {
            format: format.name(),
            reason,
        })?;
    interruption.check()?;

    Ok(transform::apply_attributes_to_bitmap(
        bitmap,
        attributes.size,
        attributes.fitting,
        attributes.sampling,
    ))
}

/// Dimensions a full load with `attributes` would produce, reading only the
/// header. Zero when no decoder accepts the stream.
pub fn closest_image_size_from_stream(
    stream: &mut dyn ImageStream,
    hint: Option<&str>,
    attributes: &ImageAttributes,
) -> ImageDimensions {
    match find_format(stream, hint) {
        Ok((format, raw)) if format.is_compressed() => raw,
        Ok((_, raw)) => transform::predict_dimensions(
            raw,
            attributes.size,
            attributes.fitting,
            attributes.sampling,
        ),
        Err(e) => {
            log::debug!("Cannot size image: {e}");
            ImageDimensions::ZERO
        }
    }
}

pub fn closest_image_size(path: &Path, attributes: &ImageAttributes) -> ImageDimensions {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            log::debug!("Cannot open {}: {e}", path.display());
            return ImageDimensions::ZERO;
        }
    };
    closest_image_size_from_stream(&mut BufReader::new(file), path.to_str(), attributes)
}

pub fn closest_image_size_from_buffer(
    bytes: &[u8],
    attributes: &ImageAttributes,
) -> ImageDimensions {
    closest_image_size_from_stream(&mut std::io::Cursor::new(bytes), None, attributes)
}
