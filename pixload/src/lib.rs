pub mod bitmap;
pub mod config;
pub mod error;
pub mod image;
pub mod loader;
pub mod net;
pub mod request;

// Re-export commonly used types
pub use bitmap::{Bitmap, PixelFormat, Profile};
pub use config::LoaderConfig;
pub use error::{FailureKind, LoadError};
pub use loader::{LoadStatus, ResourceCache, ResourceLoader};
pub use request::{
    FittingMode, ImageAttributes, ImageDimensions, LoadPriority, ResourceId, ResourceKind,
    ResourceRequest, ResourceSource, SamplingMode,
};
