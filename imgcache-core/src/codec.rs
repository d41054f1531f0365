//! Image codec seam.
//!
//! The coordinator never touches pixel formats directly; it goes through
//! [`ImageCodec`] so tests (and embedders with their own decoder) can swap
//! the implementation.

use std::{fmt, io::Cursor, sync::Arc};

use image::{DynamicImage, ImageFormat};

use crate::{
    color::{ColorValue, average_color},
    error::{FetchError, Result},
};

/// A decoded image, shared by every caller that receives it.
#[derive(Clone)]
pub struct Image(Arc<DynamicImage>);

impl Image {
    pub fn new(image: DynamicImage) -> Self {
        Self(Arc::new(image))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.0
    }

    /// True when both handles point at the same decoded buffer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.0.width() == other.0.width()
                && self.0.height() == other.0.height()
                && self.0.color() == other.0.color()
                && self.0.as_bytes() == other.0.as_bytes())
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.0.width())
            .field("height", &self.0.height())
            .field("color", &self.0.color())
            .finish()
    }
}

impl From<DynamicImage> for Image {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Decode/encode and colour sampling for cached images.
///
/// All methods are synchronous and may be CPU heavy; callers run them on the
/// blocking pool.
pub trait ImageCodec: Send + Sync + 'static {
    /// Decode raw bytes (network body or disk file) into an image.
    fn decode(&self, bytes: &[u8]) -> Result<Image>;

    /// Encode an image into the bytes written to the disk store.
    fn encode(&self, image: &Image) -> Result<Vec<u8>>;

    /// Average colour of the image, `None` when the pixels are degenerate.
    fn average_color(&self, image: &Image) -> Option<ColorValue>;
}

/// Default codec backed by the `image` crate.
#[derive(Debug, Clone, Copy)]
pub struct RasterCodec {
    format: ImageFormat,
}

impl RasterCodec {
    pub fn new() -> Self {
        Self {
            format: ImageFormat::Png,
        }
    }

    /// Encode disk copies in `format` instead of PNG.
    pub fn with_format(format: ImageFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

impl Default for RasterCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Image> {
        if bytes.is_empty() {
            return Err(FetchError::Decode("empty image body".to_string()));
        }
        image::load_from_memory(bytes)
            .map(Image::new)
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn encode(&self, image: &Image) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = Cursor::new(&mut buffer);
        let encoded = match self.format {
            // JPEG has no alpha channel
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.as_dynamic().to_rgb8())
                .write_to(&mut cursor, self.format),
            _ => image.as_dynamic().write_to(&mut cursor, self.format),
        };
        encoded.map_err(|e| FetchError::Internal(format!("image encode failed: {e}")))?;
        Ok(buffer)
    }

    fn average_color(&self, image: &Image) -> Option<ColorValue> {
        average_color(image.as_dynamic())
    }
}
