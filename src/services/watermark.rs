//! Brand watermark for approved listing photos.
//!
//! Text is drawn with the built-in bitmap font onto a copy of the decoded
//! pixels and re-encoded in the source format. The canvas is never cropped
//! or resized.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

use super::glyphs::{GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH, is_set};
use crate::constants::DEFAULT_WATERMARK_TEXT;
use crate::models::{ImageAsset, ImageFormat};

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("image could not be decoded: {0}")]
    Decode(#[source] image::ImageError),
    #[error("image could not be encoded: {0}")]
    Encode(#[source] image::ImageError),
    #[error("image format is not supported for watermarking")]
    UnsupportedFormat,
    #[error("invalid watermark spec: {0}")]
    InvalidSpec(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkSpec {
    pub text: String,
    /// Text height as a fraction of image width
    pub font_scale: f32,
    /// Inset from the anchor corner as a fraction of the shorter side
    pub margin: f32,
    pub opacity: f32,
    pub anchor: Anchor,
    /// JPEG quality, 1..=100; PNG and WebP are written lossless
    pub quality: u8,
    pub color: [u8; 3],
}

impl Default for WatermarkSpec {
    fn default() -> Self {
        Self {
            text: DEFAULT_WATERMARK_TEXT.to_string(),
            font_scale: 0.04,
            margin: 0.02,
            opacity: 0.5,
            anchor: Anchor::BottomRight,
            quality: 85,
            color: [255, 255, 255],
        }
    }
}

/// Where the text lands on a given canvas. `x`/`y` may be negative when the
/// text is wider than the image; drawing is clipped to the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkLayout {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    /// Edge length of one font pixel
    pub cell: u32,
}

impl WatermarkLayout {
    pub fn contains(&self, px: u32, py: u32) -> bool {
        let (px, py) = (px as i64, py as i64);
        px >= self.x
            && py >= self.y
            && px < self.x + self.width as i64
            && py < self.y + self.height as i64
    }
}

impl WatermarkSpec {
    pub fn validate(&self) -> Result<(), WatermarkError> {
        let invalid = |msg: String| Err(WatermarkError::InvalidSpec(msg));
        if self.text.trim().is_empty() {
            return invalid("text must not be empty".into());
        }
        if !(self.font_scale > 0.0 && self.font_scale <= 1.0) {
            return invalid(format!("font_scale must be within (0, 1], got {}", self.font_scale));
        }
        if !(0.0..0.5).contains(&self.margin) {
            return invalid(format!("margin must be within [0, 0.5), got {}", self.margin));
        }
        if !(self.opacity > 0.0 && self.opacity <= 1.0) {
            return invalid(format!("opacity must be within (0, 1], got {}", self.opacity));
        }
        if !(1..=100).contains(&self.quality) {
            return invalid(format!("quality must be within 1..=100, got {}", self.quality));
        }
        Ok(())
    }

    pub fn layout(&self, width: u32, height: u32) -> WatermarkLayout {
        let font_px = (self.font_scale * width as f32).round().max(1.0) as u32;
        let cell = (font_px as f32 / GLYPH_HEIGHT as f32).round().max(1.0) as u32;

        let chars = self.text.chars().count() as u32;
        let text_width = (chars * GLYPH_ADVANCE).saturating_sub(1) * cell;
        let text_height = GLYPH_HEIGHT * cell;
        let margin = (self.margin * width.min(height) as f32).round() as i64;

        let right = width as i64 - margin - text_width as i64;
        let bottom = height as i64 - margin - text_height as i64;
        let (x, y) = match self.anchor {
            Anchor::TopLeft => (margin, margin),
            Anchor::TopRight => (right, margin),
            Anchor::BottomLeft => (margin, bottom),
            Anchor::BottomRight => (right, bottom),
        };

        WatermarkLayout {
            x,
            y,
            width: text_width,
            height: text_height,
            cell,
        }
    }
}

/// Stamp `spec.text` onto a copy of `image`. The input asset is untouched.
pub fn apply(image: &ImageAsset, spec: &WatermarkSpec) -> Result<ImageAsset, WatermarkError> {
    spec.validate()?;
    let format = image.format().ok_or(WatermarkError::UnsupportedFormat)?;

    let decoded = image::load_from_memory_with_format(image.bytes(), format.codec())
        .map_err(WatermarkError::Decode)?;
    let has_alpha = decoded.color().has_alpha();

    let mut canvas = decoded.to_rgba8();
    let layout = spec.layout(canvas.width(), canvas.height());
    draw_text(&mut canvas, &spec.text, &layout, spec.color, spec.opacity);

    let stamped = DynamicImage::ImageRgba8(canvas);
    let bytes = encode(&stamped, format, spec.quality, has_alpha)?;
    Ok(ImageAsset::from_bytes(bytes))
}

fn draw_text(canvas: &mut RgbaImage, text: &str, layout: &WatermarkLayout, color: [u8; 3], opacity: f32) {
    let (width, height) = (canvas.width() as i64, canvas.height() as i64);
    let cell = layout.cell as i64;

    for (index, c) in text.chars().enumerate() {
        let origin_x = layout.x + (index as i64) * GLYPH_ADVANCE as i64 * cell;
        for row in 0..GLYPH_HEIGHT {
            for col in 0..GLYPH_WIDTH {
                if !is_set(c, col, row) {
                    continue;
                }
                let block_x = origin_x + col as i64 * cell;
                let block_y = layout.y + row as i64 * cell;
                for py in block_y.max(0)..(block_y + cell).min(height) {
                    for px in block_x.max(0)..(block_x + cell).min(width) {
                        let pixel = canvas.get_pixel_mut(px as u32, py as u32);
                        blend(pixel, color, opacity);
                    }
                }
            }
        }
    }
}

fn blend(pixel: &mut Rgba<u8>, color: [u8; 3], opacity: f32) {
    for (channel, target) in pixel.0.iter_mut().take(3).zip(color) {
        let mixed = *channel as f32 * (1.0 - opacity) + target as f32 * opacity;
        *channel = mixed.round().clamp(0.0, 255.0) as u8;
    }
}

fn encode(
    img: &DynamicImage,
    format: ImageFormat,
    quality: u8,
    keep_alpha: bool,
) -> Result<Vec<u8>, WatermarkError> {
    let mut output = Cursor::new(Vec::new());
    let result = match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut output, quality))
        }
        ImageFormat::Png if keep_alpha => img.write_with_encoder(PngEncoder::new(&mut output)),
        ImageFormat::Png => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_with_encoder(PngEncoder::new(&mut output)),
        ImageFormat::Webp => img.write_with_encoder(WebPEncoder::new_lossless(&mut output)),
    };
    result.map_err(WatermarkError::Encode)?;
    Ok(output.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    fn decode_rgb(asset: &ImageAsset) -> image::RgbImage {
        image::load_from_memory(asset.bytes()).unwrap().to_rgb8()
    }

    #[test]
    fn test_layout_bottom_right() {
        let spec = WatermarkSpec::default();
        let layout = spec.layout(500, 500);

        // 0.04 * 500 = 20px font -> 3px cells
        assert_eq!(layout.cell, 3);
        assert_eq!(layout.height, 21);
        assert_eq!(layout.width, (14 * 6 - 1) * 3);
        assert_eq!(layout.x, 500 - 10 - layout.width as i64);
        assert_eq!(layout.y, 500 - 10 - 21);
    }

    #[test]
    fn test_layout_scales_with_width() {
        let spec = WatermarkSpec::default();
        let thumb = spec.layout(200, 150);
        let full = spec.layout(4000, 3000);
        assert_eq!(thumb.cell, 1);
        assert_eq!(full.cell, 23);
        assert_eq!(spec.layout(4000, 3000).y, 3000 - 60 - 161);
    }

    #[test]
    fn test_layout_anchors() {
        let mut spec = WatermarkSpec::default();
        spec.anchor = Anchor::TopLeft;
        let layout = spec.layout(500, 400);
        assert_eq!((layout.x, layout.y), (8, 8));

        spec.anchor = Anchor::BottomLeft;
        assert_eq!(spec.layout(500, 400).y, 400 - 8 - 21);
    }

    #[test]
    fn test_preserves_dimensions_for_each_format() {
        let img = fixtures::solid_rgb(321, 123, [90, 120, 30]);
        for codec in [
            image::ImageFormat::Png,
            image::ImageFormat::Jpeg,
            image::ImageFormat::WebP,
        ] {
            let asset = ImageAsset::from_bytes(fixtures::encode(&img, codec));
            let stamped = apply(&asset, &WatermarkSpec::default()).unwrap();

            assert_eq!(stamped.dimensions(), Some((321, 123)), "{:?}", codec);
            assert_eq!(stamped.format(), asset.format());
            assert_ne!(stamped.bytes(), asset.bytes());
        }
    }

    #[test]
    fn test_only_watermark_region_changes() {
        let original = ImageAsset::from_bytes(fixtures::png(500, 500, [40, 90, 160]));
        let spec = WatermarkSpec::default();
        let layout = spec.layout(500, 500);

        let stamped = apply(&original, &spec).unwrap();

        let before = decode_rgb(&original);
        let after = decode_rgb(&stamped);
        let mut changed = 0;
        for (x, y, pixel) in after.enumerate_pixels() {
            if pixel != before.get_pixel(x, y) {
                changed += 1;
                assert!(layout.contains(x, y), "pixel ({}, {}) outside watermark", x, y);
            }
        }
        assert!(changed > 0);
    }

    #[test]
    fn test_blend_uses_opacity() {
        let original = ImageAsset::from_bytes(fixtures::png(500, 500, [0, 0, 0]));
        let spec = WatermarkSpec {
            opacity: 0.5,
            ..WatermarkSpec::default()
        };
        let layout = spec.layout(500, 500);
        let after = decode_rgb(&apply(&original, &spec).unwrap());

        let touched: Vec<_> = after
            .enumerate_pixels()
            .filter(|(x, y, _)| layout.contains(*x, *y))
            .map(|(_, _, p)| p.0)
            .filter(|p| *p != [0, 0, 0])
            .collect();
        assert!(!touched.is_empty());
        assert!(touched.iter().all(|p| *p == [128, 128, 128]));
    }

    #[test]
    fn test_input_asset_is_untouched() {
        let bytes = fixtures::png(64, 64, [10, 10, 10]);
        let original = ImageAsset::from_bytes(bytes.clone());
        let stamped = apply(&original, &WatermarkSpec::default()).unwrap();

        assert_eq!(original.bytes().as_ref(), bytes.as_slice());
        assert_ne!(original.id(), stamped.id());
    }

    #[test]
    fn test_text_wider_than_image_is_clipped() {
        let original = ImageAsset::from_bytes(fixtures::png(40, 40, [0, 0, 0]));
        let spec = WatermarkSpec {
            font_scale: 0.5,
            ..WatermarkSpec::default()
        };
        let stamped = apply(&original, &spec).unwrap();
        assert_eq!(stamped.dimensions(), Some((40, 40)));
    }

    #[test]
    fn test_corrupt_image_is_decode_error() {
        let mut bytes = fixtures::encode(
            &fixtures::solid_rgb(64, 64, [1, 1, 1]),
            image::ImageFormat::Jpeg,
        );
        bytes.truncate(40);
        let asset = ImageAsset::from_bytes(bytes);
        assert_eq!(asset.format(), Some(ImageFormat::Jpeg));

        let err = apply(&asset, &WatermarkSpec::default()).unwrap_err();
        assert!(matches!(err, WatermarkError::Decode(_)));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let asset = ImageAsset::from_bytes(b"not an image at all".to_vec());
        let err = apply(&asset, &WatermarkSpec::default()).unwrap_err();
        assert!(matches!(err, WatermarkError::UnsupportedFormat));
    }

    #[test]
    fn test_validate_spec() {
        assert!(WatermarkSpec::default().validate().is_ok());
        let bad = WatermarkSpec {
            opacity: 0.0,
            ..WatermarkSpec::default()
        };
        assert!(matches!(bad.validate(), Err(WatermarkError::InvalidSpec(_))));
        let bad = WatermarkSpec {
            quality: 0,
            ..WatermarkSpec::default()
        };
        assert!(bad.validate().is_err());
    }
}
