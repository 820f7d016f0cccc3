//! Load requests and the attributes that shape their results

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Caller chosen id naming one outstanding load.
pub type ResourceId = u32;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Bitmap,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub const ZERO: Self = Self::new(0, 0);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl From<(u32, u32)> for ImageDimensions {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// How a decoded image is fitted into the requested box.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, Display,
)]
pub enum FittingMode {
    /// Keep the whole image inside the box
    #[default]
    ShrinkToFit,
    /// Cover the whole box, cropping the overflow
    ScaleToFill,
    FitWidth,
    FitHeight,
}

#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, Display,
)]
pub enum SamplingMode {
    /// Power of two box filter only
    #[default]
    Box,
    Nearest,
    Linear,
    BoxThenNearest,
    BoxThenLinear,
    NoFilter,
    DontCare,
}

impl SamplingMode {
    pub(crate) fn uses_box_filter(self) -> bool {
        matches!(
            self,
            SamplingMode::Box | SamplingMode::BoxThenNearest | SamplingMode::BoxThenLinear
        )
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadPriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttributes {
    /// Zero on an axis derives it from the other one and the aspect ratio
    pub size: ImageDimensions,
    pub fitting: FittingMode,
    pub sampling: SamplingMode,
    pub orientation_correction: bool,
}

impl Default for ImageAttributes {
    fn default() -> Self {
        Self {
            size: ImageDimensions::ZERO,
            fitting: FittingMode::default(),
            sampling: SamplingMode::default(),
            orientation_correction: true,
        }
    }
}

/// Where the encoded bytes of a request come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceSource {
    /// Filesystem path or `http(s)://` url
    Location(String),
    Memory(Arc<[u8]>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub source: ResourceSource,
    pub attributes: ImageAttributes,
    pub priority: LoadPriority,
}

impl ResourceRequest {
    pub fn bitmap(id: ResourceId, source: ResourceSource, attributes: ImageAttributes) -> Self {
        Self {
            id,
            kind: ResourceKind::Bitmap,
            source,
            attributes,
            priority: LoadPriority::default(),
        }
    }

    pub fn from_location(
        id: ResourceId,
        location: impl Into<String>,
        attributes: ImageAttributes,
    ) -> Self {
        Self::bitmap(id, ResourceSource::Location(location.into()), attributes)
    }

    pub fn from_memory(
        id: ResourceId,
        bytes: impl Into<Arc<[u8]>>,
        attributes: ImageAttributes,
    ) -> Self {
        Self::bitmap(id, ResourceSource::Memory(bytes.into()), attributes)
    }
}
