use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, Luma};
use qrcode::QrCode;
use service_core::error::AppError;

/// Turns an encoded payload into a scannable image.
pub trait QrRenderer: Send + Sync {
    /// Base64 of the rendered image.
    fn render_base64(&self, payload: &str) -> Result<String, AppError>;
}

/// PNG rendering with a quiet zone and a minimum module size large enough
/// for phone cameras.
#[derive(Debug, Clone)]
pub struct PngQrRenderer {
    min_size: u32,
}

impl Default for PngQrRenderer {
    fn default() -> Self {
        Self { min_size: 256 }
    }
}

impl PngQrRenderer {
    pub fn new(min_size: u32) -> Self {
        Self { min_size }
    }
}

impl QrRenderer for PngQrRenderer {
    fn render_base64(&self, payload: &str) -> Result<String, AppError> {
        let code = QrCode::new(payload.as_bytes())
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("QR encoding failed: {}", e)))?;
        let image = code
            .render::<Luma<u8>>()
            .min_dimensions(self.min_size, self.min_size)
            .quiet_zone(true)
            .build();

        let dynamic_image = DynamicImage::ImageLuma8(image);
        let mut buffer = Cursor::new(Vec::new());
        dynamic_image
            .write_to(&mut buffer, image::ImageOutputFormat::Png)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("PNG encoding failed: {}", e)))?;

        Ok(general_purpose::STANDARD.encode(buffer.get_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_png() {
        let encoded = PngQrRenderer::default()
            .render_base64("00020101021226360014BR.GOV.BCB.PIX0114+5511999999999")
            .unwrap();
        let bytes = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
