//! Screen capture using xcap

use anyhow::{anyhow, Result};
use image::{imageops, RgbaImage};
use xcap::Monitor;

/// Where confirmation prompts render
pub const PROMPT_REGION_FRACTION: f32 = 0.3;

pub trait ScreenSource: Send + Sync {
    fn capture(&self) -> Result<RgbaImage>;

    /// Captured pixels per logical point
    fn scale_factor(&self) -> f32 {
        1.0
    }
}

/// Primary monitor capture
pub struct XcapScreen;

fn primary_monitor() -> Result<Monitor> {
    let monitors = Monitor::all().map_err(|e| anyhow!("Failed to get monitors: {}", e))?;
    monitors
        .into_iter()
        .find(|m| m.is_primary())
        .ok_or_else(|| anyhow!("No primary monitor found"))
}

impl ScreenSource for XcapScreen {
    fn capture(&self) -> Result<RgbaImage> {
        primary_monitor()?
            .capture_image()
            .map_err(|e| anyhow!("Failed to capture screen: {}", e))
    }

    fn scale_factor(&self) -> f32 {
        primary_monitor().map(|m| m.scale_factor()).unwrap_or(1.0)
    }
}

/// Convert a captured-pixel position into the logical points the pointer uses
pub fn to_logical(x: i32, y: i32, scale_factor: f32) -> (i32, i32) {
    if !scale_factor.is_finite() || scale_factor <= 0.0 {
        return (x, y);
    }
    (
        (x as f32 / scale_factor).round() as i32,
        (y as f32 / scale_factor).round() as i32,
    )
}

/// The bottom `fraction` of `image`
pub fn lower_region(image: &RgbaImage, fraction: f32) -> RgbaImage {
    let fraction = fraction.clamp(0.0, 1.0);
    let height = ((image.height() as f32) * fraction).round() as u32;
    let height = height.clamp(1, image.height().max(1));
    let top = image.height().saturating_sub(height);
    imageops::crop_imm(image, 0, top, image.width(), height).to_image()
}

/// Encode an image as base64 PNG
pub fn image_to_base64(image: &RgbaImage) -> Result<String> {
    use base64::Engine;
    use image::ImageEncoder;
    use std::io::Cursor;

    let mut buffer = Cursor::new(Vec::new());
    image::codecs::png::PngEncoder::new(&mut buffer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| anyhow!("Failed to encode PNG: {}", e))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(buffer.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_to_logical_divides_by_scale() {
        assert_eq!(to_logical(1040, 620, 2.0), (520, 310));
        assert_eq!(to_logical(300, 150, 1.5), (200, 100));
        assert_eq!(to_logical(40, 30, 1.0), (40, 30));
        assert_eq!(to_logical(40, 30, 0.0), (40, 30));
    }

    #[test]
    fn test_lower_region_takes_bottom_rows() {
        let mut image = RgbaImage::new(4, 10);
        image.put_pixel(0, 9, Rgba([255, 0, 0, 255]));

        let region = lower_region(&image, 0.3);
        assert_eq!(region.dimensions(), (4, 3));
        assert_eq!(region.get_pixel(0, 2), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_base64_is_png() {
        let encoded = image_to_base64(&RgbaImage::new(2, 2)).unwrap();
        // PNG signature
        assert!(encoded.starts_with("iVBORw0KGgo"));
    }
}
