//! Shared data models used across modules

use bytes::Bytes;
use image::ImageReader;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to read image {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

/// Image formats accepted for listing photos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    pub(crate) fn from_codec(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            image::ImageFormat::Png => Some(ImageFormat::Png),
            image::ImageFormat::WebP => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    pub(crate) fn codec(&self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

/// An uploaded photo. Immutable once built; transformations return a new asset.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    id: String,
    bytes: Bytes,
    format: Option<ImageFormat>,
    dimensions: Option<(u32, u32)>,
}

impl ImageAsset {
    /// Build an asset from raw bytes, sniffing the format from magic bytes.
    ///
    /// Unknown formats are kept as `None` so the vision client can reject
    /// them before spending an external call.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let format = image::guess_format(&bytes)
            .ok()
            .and_then(ImageFormat::from_codec);
        Self::build(bytes, format)
    }

    /// Build an asset using the uploader's declared content type when the
    /// bytes carry no recognisable signature. The declared format is kept
    /// only if the header parses under it.
    pub fn with_declared_format(bytes: impl Into<Bytes>, declared: ImageFormat) -> Self {
        let bytes = bytes.into();
        let sniffed = image::guess_format(&bytes)
            .ok()
            .and_then(ImageFormat::from_codec);
        if sniffed.is_some() {
            return Self::build(bytes, sniffed);
        }

        let mut asset = Self::build(bytes, Some(declared));
        if asset.dimensions.is_none() {
            asset.format = None;
        }
        asset
    }

    pub async fn read(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|source| ImageError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_bytes(data))
    }

    fn build(bytes: Bytes, format: Option<ImageFormat>) -> Self {
        let id = format!("{:x}", Sha256::digest(&bytes));
        let dimensions = format.and_then(|f| {
            ImageReader::with_format(Cursor::new(&bytes[..]), f.codec())
                .into_dimensions()
                .ok()
        });
        Self {
            id,
            bytes,
            format,
            dimensions,
        }
    }

    /// Hex SHA-256 of the encoded bytes
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Pixel dimensions read from the header, if it could be parsed
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }
}

/// Who uploaded the photo and for which listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationContext {
    pub property_id: String,
    pub uploader_id: String,
}

impl ModerationContext {
    pub fn new(property_id: impl Into<String>, uploader_id: impl Into<String>) -> Self {
        Self {
            property_id: property_id.into(),
            uploader_id: uploader_id.into(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{ImageBuffer, Rgb, RgbImage};
    use std::io::Cursor;

    pub fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        ImageBuffer::from_pixel(width, height, Rgb(color))
    }

    pub fn encode(img: &RgbImage, format: image::ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).expect("encode fixture");
        out.into_inner()
    }

    pub fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        encode(&solid_rgb(width, height, color), image::ImageFormat::Png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniffs_png_and_dimensions() {
        let asset = ImageAsset::from_bytes(fixtures::png(64, 32, [10, 20, 30]));
        assert_eq!(asset.format(), Some(ImageFormat::Png));
        assert_eq!(asset.dimensions(), Some((64, 32)));
        assert_eq!(asset.id().len(), 64);
    }

    #[test]
    fn test_unknown_bytes_have_no_format() {
        let asset = ImageAsset::from_bytes(b"GIF89a not really".to_vec());
        assert_eq!(asset.format(), None);
        assert_eq!(asset.dimensions(), None);
    }

    #[test]
    fn test_sniffed_format_wins_over_declared() {
        let asset =
            ImageAsset::with_declared_format(fixtures::png(8, 8, [0, 0, 0]), ImageFormat::Jpeg);
        assert_eq!(asset.format(), Some(ImageFormat::Png));
    }

    #[test]
    fn test_declared_format_needs_parsable_header() {
        let gif = ImageAsset::with_declared_format(
            b"GIF89a\x01\x00\x01\x00".to_vec(),
            ImageFormat::Jpeg,
        );
        assert_eq!(gif.format(), None);
        assert_eq!(gif.dimensions(), None);

        let garbage = ImageAsset::with_declared_format(vec![0u8; 64], ImageFormat::Png);
        assert_eq!(garbage.format(), None);
    }

    #[test]
    fn test_identical_bytes_share_id() {
        let a = ImageAsset::from_bytes(fixtures::png(8, 8, [1, 2, 3]));
        let b = ImageAsset::from_bytes(fixtures::png(8, 8, [1, 2, 3]));
        let c = ImageAsset::from_bytes(fixtures::png(8, 8, [3, 2, 1]));
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(ImageFormat::from_content_type("image/jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_content_type("image/gif"), None);
        assert_eq!(ImageFormat::Webp.mime_type(), "image/webp");
    }
}
