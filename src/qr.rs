//! Login code persistence and rendering.
//!
//! The current code lives in a plain text file that is replaced whole on
//! every new code. Nothing locks it; a reader racing a writer may see a
//! stale or partial code.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{imageops, DynamicImage, ImageFormat, Luma};
use qrcode::render::unicode::Dense1x2;
use qrcode::{EcLevel, QrCode};

use crate::error::BridgeError;

/// Edge length of the PNG served by `/qr/photo`
pub const PHOTO_SIZE: u32 = 256;

#[derive(Debug, Clone)]
pub struct LoginCodeFile {
    path: PathBuf,
}

impl LoginCodeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, code: &str) -> Result<(), BridgeError> {
        tokio::fs::write(&self.path, code).await?;
        Ok(())
    }

    pub async fn read(&self) -> Result<String, BridgeError> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }
}

fn encode(code: &str) -> Result<QrCode, BridgeError> {
    Ok(QrCode::with_error_correction_level(code.as_bytes(), EcLevel::M)?)
}

/// Render `code` as a `size`×`size` grayscale PNG.
pub fn render_png(code: &str, size: u32) -> Result<Vec<u8>, BridgeError> {
    let qr = encode(code)?;
    let rendered = qr
        .render::<Luma<u8>>()
        .min_dimensions(size, size)
        .build();

    // Module size is integral, so the natural render rarely hits `size` exactly
    let scaled = if rendered.width() == size && rendered.height() == size {
        rendered
    } else {
        imageops::resize(&rendered, size, size, imageops::FilterType::Nearest)
    };

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(scaled).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

/// Render `code` with half-block characters for a terminal.
pub fn render_terminal(code: &str) -> Result<String, BridgeError> {
    let qr = encode(code)?;
    Ok(qr
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
