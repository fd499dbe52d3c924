use super::params::{QrConfig, QrLevel, MAX_SIZE};
use super::QrError;
use image::{DynamicImage, ImageFormat, Rgba};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

/// Turns text into an image. The HTTP layer only ever sees bytes.
pub trait QrRenderer: Send + Sync {
    fn render(&self, text: &str, config: &QrConfig) -> Result<Vec<u8>, QrError>;

    /// MIME type of the bytes `render` produces.
    fn content_type(&self) -> &'static str;
}

/// PNG renderer built on the `qrcode` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngRenderer;

impl From<QrLevel> for EcLevel {
    fn from(level: QrLevel) -> Self {
        match level {
            QrLevel::Low => EcLevel::L,
            QrLevel::Medium => EcLevel::M,
            QrLevel::High => EcLevel::Q,
            QrLevel::Best => EcLevel::H,
        }
    }
}

impl QrRenderer for PngRenderer {
    fn render(&self, text: &str, config: &QrConfig) -> Result<Vec<u8>, QrError> {
        if config.size == 0 {
            return Err(QrError::InvalidParam("size must not be zero".to_string()));
        }

        let code = QrCode::with_error_correction_level(text.as_bytes(), config.level.into())
            .map_err(|e| QrError::Encode(e.to_string()))?;

        let mut renderer = code.render::<Rgba<u8>>();
        renderer
            .quiet_zone(config.border)
            .dark_color(config.fg_color)
            .light_color(config.bg_color);
        if config.size > 0 {
            let side = config.size.unsigned_abs();
            renderer.min_dimensions(side, side);
        } else {
            // Pixels per module, capped so the image side stays within MAX_SIZE.
            let quiet = if config.border { 8 } else { 0 };
            let modules = u32::try_from(code.width() + quiet).unwrap_or(u32::MAX);
            let cap = (MAX_SIZE.unsigned_abs() / modules).max(1);
            let module = config.size.unsigned_abs().min(cap);
            renderer.module_dimensions(module, module);
        }
        let image = renderer.build();

        let mut png = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| QrError::Image(e.to_string()))?;
        Ok(png)
    }

    fn content_type(&self) -> &'static str {
        "image/png"
    }
}
